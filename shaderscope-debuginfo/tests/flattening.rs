//! Member flattening, storage navigation and register layout of aggregates

mod common;

use common::{init, load, load_with};
use shaderscope_debuginfo::{
    coverage_report, DebugInfo, DebugInfoError, EngineConfig, MinPrecisionLayout, ModuleBuilder,
    RegisterRange,
};
use shaderscope_protocol::{Capabilities, InstructionKind, ResourceKind, TypeRef};

/// Declare one variable of type `ty` in its own alloca; returns the builder
/// and the offset of the alloca
fn declare_one(mut b: ModuleBuilder, name: &str, ty: TypeRef) -> (ModuleBuilder, u32) {
    let file = b.add_file("/shaders/types.hlsl");
    let main = b.subprogram("main", file, 1);
    let var = b.variable(name, ty, main, file, 2);
    b.begin_function("main", Some(main));
    let loc = b.location(2, 5, main);
    let slot = b.alloca_for(ty, Some(loc));
    b.dbg_declare(var, slot, Some(loc));
    (b, slot)
}

fn leaf_names(info: &DebugInfo, at: u32, name: &str) -> Vec<String> {
    info.variable_at(at, name)
        .unwrap()
        .flatten()
        .unwrap()
        .members
        .into_iter()
        .map(|m| m.name_path)
        .collect()
}

#[test]
fn test_two_dimensional_array() {
    init();
    let mut b = ModuleBuilder::new();
    let float = b.float_type();
    let arr = b.array_of(float, &[2, 2]);
    let (b, slot) = declare_one(b, "m", arr);
    let info = load(b);

    assert_eq!(
        leaf_names(&info, slot, "m"),
        vec!["m[0][0]", "m[0][1]", "m[1][0]", "m[1][1]"]
    );
    assert_eq!(
        info.register_for_variable(slot, "m"),
        Some(RegisterRange {
            base: 0,
            count: 4,
            span: 4
        })
    );

    let storage = info.variable_at(slot, "m").unwrap().storage().unwrap();
    let row = storage.index(1).unwrap();
    assert_eq!(row.name_path(), "m[1]");
    assert_eq!(row.bit_size(), 64);
    let row_leaves: Vec<String> = row
        .flatten()
        .unwrap()
        .members
        .into_iter()
        .map(|m| m.name_path)
        .collect();
    assert_eq!(row_leaves, vec!["m[1][0]", "m[1][1]"]);

    let cell = row.index(0).unwrap();
    assert_eq!(cell.name_path(), "m[1][0]");
    assert_eq!(cell.bit_offset(), 64);
    assert_eq!(cell.register_number(), Some(2));
    assert!(row.index(2).is_none());
    assert!(storage.index(2).is_none());
}

#[test]
fn test_derived_struct_includes_base_leaves() {
    init();
    let mut b = ModuleBuilder::new();
    let float = b.float_type();
    let int = b.int_type();
    let float2 = b.vector_of(float, 2);
    let base_layout = b
        .struct_type("Base")
        .field(&b, "a", float)
        .field(&b, "b", float2);
    let base = b.finish_struct(base_layout);
    let derived_layout = b
        .struct_type("Derived")
        .base(&b, base)
        .field(&b, "c", float)
        .field(&b, "d", int);
    let derived = b.finish_struct(derived_layout);
    let (b, slot) = declare_one(b, "obj", derived);
    let info = load(b);

    assert_eq!(
        leaf_names(&info, slot, "obj"),
        vec!["obj.a", "obj.b.x", "obj.b.y", "obj.c", "obj.d"]
    );

    let derived_id = derived.into();
    assert_eq!(info.struct_field_count(derived_id), 3);
    let base_field = info.struct_field_by_index(derived_id, 2).unwrap();
    assert!(base_field.is_base);
    assert_eq!(base_field.name, "");
    assert_eq!(base_field.offset_in_bits, 0);
    assert_eq!(info.struct_base_type(derived_id), Some(base.into()));
    assert_eq!(info.type_name(derived_id), "Derived");

    let storage = info.variable_at(slot, "obj").unwrap().storage().unwrap();
    let inherited = storage.access_field("a").unwrap();
    assert_eq!((inherited.name_path(), inherited.bit_offset()), ("obj.a", 0));
    let base_part = storage.access_field("").unwrap();
    assert_eq!(base_part.name_path(), "obj");
    assert_eq!(base_part.flatten().unwrap().len(), 3);
    let c = storage.access_field("c").unwrap();
    assert_eq!(c.bit_offset(), 96);
    assert_eq!(c.register_number(), Some(3));
    assert!(storage.access_field("missing").is_none());
}

#[test]
fn test_bitfields_share_a_64_bit_unit() {
    init();
    let mut b = ModuleBuilder::new();
    let u64_ty = b.base_type("uint64_t", 64, gimli::constants::DW_ATE_unsigned);
    let layout = b
        .struct_type("Flags")
        .bitfield(&b, "a", u64_ty, 20)
        .bitfield(&b, "b", u64_ty, 20)
        .bitfield(&b, "c", u64_ty, 24)
        .field(&b, "d", u64_ty);
    let flags = b.finish_struct(layout);
    let (mut b, slot) = declare_one(b, "s", flags);
    let whole_unit = b.store(slot, 0, 64, None);
    let d_store = b.store(slot, 64, 64, None);
    let misaligned = b.store(slot, 8, 32, None);
    let other = b.alloca(128, None);
    let copy = b.emit(
        InstructionKind::MemCopy {
            dst: slot,
            src: other,
            bit_size: 128,
        },
        None,
    );
    let info = load(b);

    let var = info.variable_at(slot, "s").unwrap();
    let leaves = var.flatten().unwrap();
    let layout: Vec<(u64, u64)> = leaves
        .members
        .iter()
        .map(|m| (m.bit_offset, m.bit_size))
        .collect();
    assert_eq!(layout, vec![(0, 20), (20, 20), (40, 24), (64, 64)]);
    assert!(!leaves.partial_coverage);

    let storage = var.storage().unwrap();
    let reg = |name: &str| storage.access_field(name).unwrap().register_number();
    assert_eq!(reg("a"), reg("b"));
    assert_eq!(reg("b"), reg("c"));
    assert_ne!(reg("c"), reg("d"));
    assert_eq!(storage.access_field("b").unwrap().bit_size(), 20);

    assert_eq!(
        info.register_for_variable(slot, "s"),
        Some(RegisterRange {
            base: 0,
            count: 4,
            span: 2
        })
    );

    let write = info.record_write(d_store).unwrap();
    assert_eq!(write.member_name_path, "s.d");
    assert_eq!((write.register_base, write.register_index), (0, 1));
    let unit_write = info.record_write(whole_unit).unwrap();
    assert_eq!(unit_write.register_index, 0);

    assert!(matches!(
        info.record_write(misaligned),
        Err(DebugInfoError::NotAStructuredWrite { .. })
    ));
    assert!(matches!(
        info.record_write(copy),
        Err(DebugInfoError::NotAStructuredWrite { .. })
    ));
    // Undeclared 128-bit alloca follows the declared one
    assert_eq!(info.register_for_instruction(other).map(|r| r.base), Some(2));
}

#[test]
fn test_resource_members_have_no_leaves() {
    init();
    let mut b = ModuleBuilder::new();
    let float = b.float_type();
    let float4 = b.vector_of(float, 4);
    let tex = b.resource(ResourceKind::Texture, "Texture2D<float4>");
    let layout = b
        .struct_type("Material")
        .field(&b, "albedo", tex)
        .field(&b, "color", float4);
    let material = b.finish_struct(layout);
    let (b, slot) = declare_one(b, "mat", material);
    let info = load(b);

    assert_eq!(
        leaf_names(&info, slot, "mat"),
        vec!["mat.color.x", "mat.color.y", "mat.color.z", "mat.color.w"]
    );
    let storage = info.variable_at(slot, "mat").unwrap().storage().unwrap();
    let albedo = storage.access_field("albedo").unwrap();
    assert_eq!(albedo.register_number(), None);
    assert!(albedo.flatten().unwrap().is_empty());
    assert!(storage.access_field("color").unwrap().register_number().is_some());
}

fn min16_module(capabilities: Capabilities) -> (ModuleBuilder, u32) {
    let mut b = ModuleBuilder::new().with_capabilities(capabilities);
    let half = b.base_type("min16float", 16, gimli::constants::DW_ATE_float);
    let arr = b.array_of(half, &[2]);
    declare_one(b, "h", arr)
}

fn leaf_offsets(info: &DebugInfo, at: u32) -> Vec<(u64, u64)> {
    info.variable_at(at, "h")
        .unwrap()
        .flatten()
        .unwrap()
        .members
        .iter()
        .map(|m| (m.bit_offset, m.bit_size))
        .collect()
}

#[test]
fn test_min_precision_layout_follows_capability() {
    init();
    let (b, slot) = min16_module(Capabilities::default());
    let info = load(b);
    assert_eq!(info.layout(), MinPrecisionLayout::Unpacked);
    assert_eq!(leaf_offsets(&info, slot), vec![(0, 32), (32, 32)]);
    assert!(info.diagnostics().is_empty());

    let (b, slot) = min16_module(Capabilities {
        native_16bit_types: true,
    });
    let info = load(b);
    assert_eq!(info.layout(), MinPrecisionLayout::Packed16);
    assert_eq!(leaf_offsets(&info, slot), vec![(0, 16), (16, 16)]);
}

#[test]
fn test_packing_request_without_capability_falls_back() {
    init();
    let mut config = EngineConfig::default();
    config.layout.pack_min_precision = Some(true);

    let (b, slot) = min16_module(Capabilities::default());
    let info = load_with(b, &config);
    assert_eq!(info.layout(), MinPrecisionLayout::Unpacked);
    assert_eq!(leaf_offsets(&info, slot), vec![(0, 32), (32, 32)]);
    assert_eq!(info.diagnostics().len(), 1);
    assert!(matches!(
        info.diagnostics()[0],
        DebugInfoError::UnsupportedFeature(_)
    ));

    config.layout.pack_min_precision = Some(false);
    let (b, slot) = min16_module(Capabilities {
        native_16bit_types: true,
    });
    let info = load_with(b, &config);
    assert_eq!(leaf_offsets(&info, slot), vec![(0, 32), (32, 32)]);
}

#[test]
fn test_crossing_bitfield_reports_partial_coverage() {
    init();
    let mut b = ModuleBuilder::new();
    let uint = b.uint_type();
    let layout = b
        .struct_type("Straddle")
        .field_at("lo", uint, 0, Some(20))
        .field_at("hi", uint, 20, Some(20))
        .size(64);
    let straddle = b.finish_struct(layout);
    let (b, slot) = declare_one(b, "p", straddle);
    let info = load(b);

    let leaves = info.variable_at(slot, "p").unwrap().flatten().unwrap();
    assert!(leaves.partial_coverage);
    let hi = leaves.find("p.hi").unwrap();
    assert_eq!((hi.bit_offset, hi.bit_size), (20, 20));
    assert!(hi.crosses_storage_unit);
    assert!(matches!(
        leaves.into_complete("p"),
        Err(DebugInfoError::PartialCoverage { .. })
    ));
}

#[test]
fn test_leaves_account_for_declared_size() {
    init();
    let mut b = ModuleBuilder::new();
    let float = b.float_type();
    let dbl = b.add_type(shaderscope_protocol::TypeRecord::float(64));
    let bool_ty = b.bool_type();
    let float3 = b.vector_of(float, 3);
    let inner_layout = b
        .struct_type("Inner")
        .field(&b, "flag", bool_ty)
        .field(&b, "dir", float3);
    let inner = b.finish_struct(inner_layout);
    let arr = b.array_of(inner, &[3]);
    let outer_layout = b
        .struct_type("Outer")
        .field(&b, "items", arr)
        .field(&b, "weight", dbl);
    let outer = b.finish_struct(outer_layout);
    let (b, slot) = declare_one(b, "o", outer);
    let info = load(b);

    let leaves = info.variable_at(slot, "o").unwrap().flatten().unwrap();
    assert_eq!(leaves.len(), 3 * 4 + 1);
    let declared = info.types().bit_size(outer.into()).unwrap();
    let report = coverage_report(&leaves.members, declared);
    assert!(report.overlaps.is_empty());
    assert!(report.is_consistent());
    assert_eq!(report.leaf_bits + report.padding_bits, declared);
}
