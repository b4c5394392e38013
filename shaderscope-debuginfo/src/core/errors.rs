//! Error types for the debug-info engine

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum DebugInfoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot decode error: {0}")]
    Json(#[from] serde_json::Error),
    /// Cyclic or self-inconsistent metadata; the module is rejected
    #[error("Malformed debug info: {0}")]
    MalformedDebugInfo(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// A bitfield crosses its storage unit; offsets are right but register
    /// adjacency is not guaranteed
    #[error("Partial coverage for '{variable}': bitfield crosses its storage unit")]
    PartialCoverage { variable: String },
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("Instruction {offset} is not a structured write: {reason}")]
    NotAStructuredWrite { offset: u32, reason: String },
    #[error("Module load task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
    #[error("Module load error: {0}")]
    ModuleLoadError(String),
}

impl DebugInfoError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        DebugInfoError::MalformedDebugInfo(msg.into())
    }

    pub(crate) fn not_structured(offset: u32, reason: impl Into<String>) -> Self {
        DebugInfoError::NotAStructuredWrite {
            offset,
            reason: reason.into(),
        }
    }
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, DebugInfoError>;
