//! Type decomposition

pub mod member_flattener;

pub use member_flattener::{
    coverage_report, CoverageReport, FlattenedMember, Flattening, MemberFlattener, StorageUnit,
};

pub(crate) use member_flattener::component_suffix;
