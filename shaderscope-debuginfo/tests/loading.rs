//! Snapshot decoding, malformed input and multi-module loading

mod common;

use common::init;
use shaderscope_debuginfo::{
    DebugInfo, DebugInfoError, EngineConfig, ModuleBuilder, ModuleLoader, ModuleLoadingEvent,
    ModuleSnapshot,
};
use shaderscope_protocol::{
    LocationRecord, LocationRef, ResourceKind, ScopeRecord, ScopeRef, TypeRecord, TypeRef,
};
use std::sync::{Arc, Mutex};

fn variant(entry: &str) -> ModuleSnapshot {
    let mut b = ModuleBuilder::new();
    let file = b.add_file("/shaders/variants.hlsl");
    let float = b.float_type();
    let main = b.subprogram(entry, file, 1);
    let x = b.variable("x", float, main, file, 2);
    b.begin_function(entry, Some(main));
    let loc = b.location(2, 5, main);
    let slot = b.alloca_for(float, Some(loc));
    b.dbg_declare(x, slot, Some(loc));
    let end = b.location(3, 1, main);
    b.ret(Some(end));
    b.build()
}

#[test]
fn test_json_file_round_trip() {
    init();
    let json = serde_json::to_string_pretty(&variant("vs_main")).unwrap();
    assert!(json.contains("\"op\": \"alloca\""));

    let path = std::env::temp_dir().join(format!("shaderscope-{}.json", std::process::id()));
    std::fs::write(&path, &json).unwrap();
    let info = DebugInfo::from_json_file(&path, &EngineConfig::default()).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(info.function_name(0).as_deref(), Some("vs_main"));
    let stats = info.module_stats();
    assert_eq!(stats.functions, 1);
    assert_eq!(stats.instructions, 3);
    assert_eq!(stats.variable_instances, 1);
    assert_eq!(stats.registers, 1);
    assert_eq!(stats.line_entries, 2);

    let missing = std::env::temp_dir().join("shaderscope-does-not-exist.json");
    assert!(matches!(
        DebugInfo::from_json_file(&missing, &EngineConfig::default()),
        Err(DebugInfoError::Io(_))
    ));
}

#[test]
fn test_resource_members_survive_json() {
    init();
    let mut b = ModuleBuilder::new();
    let file = b.add_file("/shaders/material.hlsl");
    let float = b.float_type();
    let tex = b.resource(ResourceKind::RwTexture, "RWTexture2D<float4>");
    let layout = b
        .struct_type("Material")
        .field(&b, "albedo", tex)
        .field(&b, "gloss", float);
    let material = b.finish_struct(layout);
    let main = b.subprogram("main", file, 1);
    let mat = b.variable("mat", material, main, file, 2);
    b.begin_function("main", Some(main));
    let loc = b.location(2, 5, main);
    let slot = b.alloca_for(material, Some(loc));
    b.dbg_declare(mat, slot, Some(loc));
    let end = b.ret(Some(loc));
    let snapshot = b.build();

    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(json.contains("\"resource_kind\":\"rw_texture\""));
    let decoded: ModuleSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.types, snapshot.types);

    let info = DebugInfo::from_json_str(&json, &EngineConfig::default()).unwrap();
    let var = info.variable_at(end, "mat").unwrap();
    let leaves: Vec<String> = var
        .flatten()
        .unwrap()
        .members
        .into_iter()
        .map(|m| m.name_path)
        .collect();
    assert_eq!(leaves, vec!["mat.gloss"]);
}

#[test]
fn test_cyclic_metadata_is_rejected() {
    init();

    let mut lexical_cycle = variant("main");
    lexical_cycle.scopes.push(ScopeRecord::LexicalBlock {
        parent: ScopeRef(2),
        file: lexical_cycle.scopes[0].file(),
        line: 1,
        column: 1,
    });
    lexical_cycle.scopes.push(ScopeRecord::LexicalBlock {
        parent: ScopeRef(1),
        file: lexical_cycle.scopes[0].file(),
        line: 1,
        column: 1,
    });
    assert!(matches!(
        DebugInfo::load(lexical_cycle, &EngineConfig::default()),
        Err(DebugInfoError::MalformedDebugInfo(_))
    ));

    let mut inline_cycle = variant("main");
    let first = LocationRef(inline_cycle.locations.len() as u32);
    inline_cycle.locations.push(LocationRecord {
        line: 1,
        column: 1,
        scope: ScopeRef(0),
        inlined_at: Some(LocationRef(first.0 + 1)),
    });
    inline_cycle.locations.push(LocationRecord {
        line: 1,
        column: 1,
        scope: ScopeRef(0),
        inlined_at: Some(first),
    });
    assert!(matches!(
        DebugInfo::load(inline_cycle, &EngineConfig::default()),
        Err(DebugInfoError::MalformedDebugInfo(_))
    ));

    let mut type_cycle = variant("main");
    let own = TypeRef(type_cycle.types.len() as u32);
    type_cycle.types.push(TypeRecord::Typedef {
        name: "Loop".to_string(),
        underlying: own,
    });
    assert!(matches!(
        DebugInfo::load(type_cycle, &EngineConfig::default()),
        Err(DebugInfoError::MalformedDebugInfo(_))
    ));
}

#[test]
fn test_large_module_resolves_declares_in_later_functions() {
    init();
    let mut b = ModuleBuilder::new();
    let file = b.add_file("/shaders/large.hlsl");
    let float = b.float_type();
    let mut returns = Vec::new();
    for f in 0..8u32 {
        let name = format!("fn{f}");
        let sp = b.subprogram(&name, file, f * 1000 + 1);
        b.begin_function(&name, Some(sp));
        let loc = b.location(f * 1000 + 2, 1, sp);
        for i in 0..500u32 {
            let var = b.variable(&format!("v{i}"), float, sp, file, f * 1000 + 2);
            let slot = b.alloca_for(float, Some(loc));
            b.dbg_declare(var, slot, Some(loc));
        }
        b.variable("never_bound", float, sp, file, f * 1000 + 3);
        returns.push(b.ret(Some(loc)));
    }
    let info = common::load(b);

    assert_eq!(info.module_stats().registers, 8 * 500);
    let last = *returns.last().unwrap();
    assert_eq!(common::register_of(&info, last, "v0"), Some(7 * 500));
    assert_eq!(common::register_of(&info, last, "v499"), Some(8 * 500 - 1));
    assert!(info.variable_at(last, "never_bound").unwrap().storage().is_none());
}

#[test]
fn test_load_many_in_parallel() {
    init();
    let modules = ModuleLoader::new(EngineConfig::default())
        .max_concurrency(2)
        .add_module("vs", variant("vs_main"))
        .add_module("ps", variant("ps_main"))
        .add_module("cs", variant("cs_main"))
        .load_sync()
        .unwrap();

    let names: Vec<Option<String>> = modules.iter().map(|m| m.function_name(0)).collect();
    assert_eq!(
        names,
        vec![
            Some("vs_main".to_string()),
            Some("ps_main".to_string()),
            Some("cs_main".to_string())
        ]
    );
}

#[tokio::test]
async fn test_progress_events_and_failure() {
    init();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let mut broken = variant("broken");
    broken.types.push(TypeRecord::Array {
        element: TypeRef(999),
        dimensions: vec![2],
    });

    let result = ModuleLoader::new(EngineConfig::default())
        .sequential()
        .add_module("good", variant("main"))
        .add_module("bad", broken)
        .load_with_progress(move |event| {
            let label = match &event {
                ModuleLoadingEvent::LoadingStarted { module_name, .. } => {
                    format!("start:{module_name}")
                }
                ModuleLoadingEvent::LoadingCompleted { module_name, .. } => {
                    format!("done:{module_name}")
                }
                ModuleLoadingEvent::LoadingFailed { module_name, .. } => {
                    format!("fail:{module_name}")
                }
            };
            if let Ok(mut guard) = sink.lock() {
                guard.push(label);
            }
        })
        .await;

    assert!(matches!(result, Err(DebugInfoError::MalformedDebugInfo(_))));
    let events = events.lock().unwrap();
    assert!(events.contains(&"done:good".to_string()));
    assert!(events.contains(&"fail:bad".to_string()));
}
