#![allow(dead_code)]

//! Common test utilities shared across integration tests

use shaderscope_debuginfo::{DebugInfo, EngineConfig, ModuleBuilder};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging for tests (call once per test)
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("off")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Load a built module with the default engine configuration
pub fn load(builder: ModuleBuilder) -> DebugInfo {
    load_with(builder, &EngineConfig::default())
}

pub fn load_with(builder: ModuleBuilder, config: &EngineConfig) -> DebugInfo {
    DebugInfo::load(builder.build(), config).expect("module should load")
}

/// Names of the variables visible at `offset`, innermost first
pub fn visible_names(info: &DebugInfo, offset: u32) -> Vec<String> {
    info.live_variables_at(offset)
        .iter()
        .map(|v| v.name().to_string())
        .collect()
}

/// Register holding the first bit of variable `name` at `offset`
pub fn register_of(info: &DebugInfo, offset: u32, name: &str) -> Option<u32> {
    info.variable_at(offset, name)?.storage()?.register_number()
}
