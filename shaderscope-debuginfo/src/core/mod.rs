//! Core types and utilities for shaderscope-debuginfo

pub mod errors;
pub mod types;

pub use errors::*;
pub use types::*;
