//! Module loading with Builder pattern and parallel support
//!
//! One load step turns a snapshot into a [`DebugInfo`]: pick the
//! min-precision layout, build the type model, scope tree, line table and
//! register assignment, and reject structurally broken metadata. Several
//! modules (e.g. shader variants) can be loaded concurrently since they share
//! nothing.

use crate::allocator::VirtualRegisterAllocator;
use crate::analyzer::DebugInfo;
use crate::config::EngineConfig;
use crate::core::{DebugInfoError, MinPrecisionLayout, Result};
use crate::data::{DebugTypeModel, ScopeTreeBuilder, SourceLocationIndex};
use shaderscope_protocol::{Capabilities, InstructionKind, ModuleSnapshot, ScopeRecord};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};

/// Configuration for module loading
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Whether to load multiple modules in parallel
    pub parallel_modules: bool,
    /// Maximum number of concurrent module loads
    pub max_module_concurrency: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            parallel_modules: true,
            max_module_concurrency: num_cpus::get(),
        }
    }
}

impl LoadConfig {
    /// Conservative loading (sequential)
    pub fn sequential() -> Self {
        Self {
            parallel_modules: false,
            max_module_concurrency: 1,
        }
    }

    fn from_engine(engine: &EngineConfig) -> Self {
        let max = match engine.loading.max_concurrency {
            0 => num_cpus::get(),
            n => n,
        };
        Self {
            parallel_modules: engine.loading.parallel_modules,
            max_module_concurrency: max.max(1),
        }
    }
}

/// Statistics for one loaded module
#[derive(Debug, Clone)]
pub struct ModuleLoadingStats {
    pub functions: usize,
    pub variables: usize,
    pub types: usize,
    pub load_time_ms: u64,
}

/// Module loading progress events
#[derive(Debug, Clone)]
pub enum ModuleLoadingEvent {
    LoadingStarted {
        module_name: String,
        current: usize,
        total: usize,
    },
    LoadingCompleted {
        module_name: String,
        stats: ModuleLoadingStats,
        current: usize,
        total: usize,
    },
    LoadingFailed {
        module_name: String,
        error: String,
        current: usize,
        total: usize,
    },
}

/// Builder for loading modules with flexible parallelism options
pub struct ModuleLoader {
    modules: Vec<(String, ModuleSnapshot)>,
    engine: EngineConfig,
    config: LoadConfig,
}

impl ModuleLoader {
    pub fn new(engine: EngineConfig) -> Self {
        let config = LoadConfig::from_engine(&engine);
        Self {
            modules: Vec::new(),
            engine,
            config,
        }
    }

    /// Queue a module; `name` only labels progress events and logs
    pub fn add_module(mut self, name: impl Into<String>, snapshot: ModuleSnapshot) -> Self {
        self.modules.push((name.into(), snapshot));
        self
    }

    /// Enable/disable parallel loading of multiple modules
    pub fn parallel_modules(mut self, enable: bool) -> Self {
        self.config.parallel_modules = enable;
        self
    }

    /// Set maximum concurrency for module loading
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_module_concurrency = limit.max(1);
        self
    }

    /// Use predefined sequential configuration
    pub fn sequential(mut self) -> Self {
        self.config = LoadConfig::sequential();
        self
    }

    /// Load modules synchronously (blocking)
    pub fn load_sync(self) -> Result<Vec<DebugInfo>> {
        if self.config.parallel_modules && self.modules.len() > 1 {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(self.load())
        } else {
            self.modules
                .into_iter()
                .map(|(name, snapshot)| {
                    debug!("Loading module '{}'", name);
                    load_module(snapshot, &self.engine)
                })
                .collect()
        }
    }

    /// Load modules asynchronously
    pub async fn load(self) -> Result<Vec<DebugInfo>> {
        self.load_with_progress(|_| {}).await
    }

    /// Load with progress callback
    pub async fn load_with_progress<F>(self, progress_callback: F) -> Result<Vec<DebugInfo>>
    where
        F: Fn(ModuleLoadingEvent) + Send + Sync + 'static,
    {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(if self.config.parallel_modules {
            self.config.max_module_concurrency
        } else {
            1
        }));
        let total = self.modules.len();
        let progress_callback = Arc::new(progress_callback);
        let engine = Arc::new(self.engine);

        let tasks: Vec<_> = self
            .modules
            .into_iter()
            .enumerate()
            .map(|(index, (module_name, snapshot))| {
                let semaphore = Arc::clone(&semaphore);
                let progress_callback = Arc::clone(&progress_callback);
                let engine = Arc::clone(&engine);

                task::spawn(async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| DebugInfoError::ModuleLoadError(e.to_string()))?;

                    progress_callback(ModuleLoadingEvent::LoadingStarted {
                        module_name: module_name.clone(),
                        current: index + 1,
                        total,
                    });

                    let start_time = std::time::Instant::now();
                    let result =
                        task::spawn_blocking(move || load_module(snapshot, &engine)).await?;
                    let load_time_ms = start_time.elapsed().as_millis() as u64;

                    match result {
                        Ok(module) => {
                            let stats = module.module_stats();
                            progress_callback(ModuleLoadingEvent::LoadingCompleted {
                                module_name,
                                stats: ModuleLoadingStats {
                                    functions: stats.functions,
                                    variables: stats.variable_instances,
                                    types: stats.types,
                                    load_time_ms,
                                },
                                current: index + 1,
                                total,
                            });
                            Ok(module)
                        }
                        Err(e) => {
                            progress_callback(ModuleLoadingEvent::LoadingFailed {
                                module_name,
                                error: e.to_string(),
                                current: index + 1,
                                total,
                            });
                            Err(e)
                        }
                    }
                })
            })
            .collect();

        let results = futures::future::try_join_all(tasks).await?;
        results.into_iter().collect::<Result<Vec<_>>>()
    }
}

/// Pick the min-precision layout: packed only when the module has native
/// 16-bit types. An explicit packing request without the capability is
/// reported and falls back to the unpacked layout.
fn select_layout(
    capabilities: Capabilities,
    engine: &EngineConfig,
    diagnostics: &mut Vec<DebugInfoError>,
) -> MinPrecisionLayout {
    match (engine.layout.pack_min_precision, capabilities.native_16bit_types) {
        (Some(false), _) | (None, false) => MinPrecisionLayout::Unpacked,
        (None, true) | (Some(true), true) => MinPrecisionLayout::Packed16,
        (Some(true), false) => {
            let err = DebugInfoError::UnsupportedFeature(
                "16-bit min-precision packing requested but the module lacks native 16-bit types"
                    .to_string(),
            );
            warn!("{}; using unpacked layout", err);
            diagnostics.push(err);
            MinPrecisionLayout::Unpacked
        }
    }
}

/// Cross-record reference checks the index builders do not cover
fn validate_snapshot(snapshot: &ModuleSnapshot) -> Result<()> {
    let files = snapshot.files.len();
    let types = snapshot.types.len();
    let count = snapshot.instruction_count() as u32;

    for (idx, scope) in snapshot.scopes.iter().enumerate() {
        if scope.file().index() >= files {
            return Err(DebugInfoError::malformed(format!(
                "scope {idx} references missing {}",
                scope.file()
            )));
        }
    }
    for (idx, var) in snapshot.variables.iter().enumerate() {
        if var.ty.0 as usize >= types {
            return Err(DebugInfoError::malformed(format!(
                "variable {idx} '{}' references missing {}",
                var.name, var.ty
            )));
        }
        if snapshot.scope(var.scope).is_none() || var.file.index() >= files {
            return Err(DebugInfoError::malformed(format!(
                "variable {idx} '{}' references a missing scope or file",
                var.name
            )));
        }
    }
    for func in &snapshot.functions {
        if let Some(sp) = func.subprogram {
            if !matches!(snapshot.scope(sp), Some(ScopeRecord::Subprogram { .. })) {
                return Err(DebugInfoError::malformed(format!(
                    "function '{}' names {} which is not a subprogram",
                    func.name, sp
                )));
            }
        }
    }
    for (offset, _fi, inst) in snapshot.instructions() {
        let target = match &inst.kind {
            InstructionKind::Store { address, .. } => Some(address.base),
            InstructionKind::DbgDeclare { storage, .. } => Some(*storage),
            InstructionKind::DbgValue { value, .. } => Some(*value),
            InstructionKind::MemCopy { dst, src, .. } => Some((*dst).max(*src)),
            _ => None,
        };
        if let Some(target) = target {
            if target >= count {
                return Err(DebugInfoError::malformed(format!(
                    "instruction @{offset} references @{target} past the module end"
                )));
            }
        }
        if let Some(loc) = inst.location {
            if snapshot.location(loc).is_none() {
                return Err(DebugInfoError::malformed(format!(
                    "instruction @{offset} references missing {loc}"
                )));
            }
        }
    }
    Ok(())
}

/// The load step for one module
pub(crate) fn load_module(snapshot: ModuleSnapshot, engine: &EngineConfig) -> Result<DebugInfo> {
    let start_time = std::time::Instant::now();
    let mut diagnostics = Vec::new();

    validate_snapshot(&snapshot)?;
    let layout = select_layout(snapshot.capabilities, engine, &mut diagnostics);
    let types = DebugTypeModel::from_records(&snapshot.types, layout)?;
    let scopes = ScopeTreeBuilder::new(&snapshot).build()?;
    let lines = SourceLocationIndex::from_snapshot(&snapshot, engine.path_match_options())?;
    let allocator = VirtualRegisterAllocator::build(&snapshot, &scopes, &types)?;

    let info = DebugInfo::from_parts(
        snapshot,
        types,
        scopes,
        lines,
        allocator,
        engine.clone(),
        diagnostics,
    );
    let stats = info.module_stats();
    info!(
        "Loaded module: {} functions, {} instructions, {} scopes, {} vars, {} regs in {}ms",
        stats.functions,
        stats.instructions,
        stats.scopes,
        stats.variable_instances,
        stats.registers,
        start_time.elapsed().as_millis()
    );
    Ok(info)
}
