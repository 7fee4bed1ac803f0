pub mod internal {
    /// Boxed error for trait-object boundaries where the concrete error type
    /// is connector-specific.
    pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
}

use thiserror::Error;

/// Failure to parse or render a native type string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("cannot parse native type: {0:?}")]
    UnparsableNativeType(String),
    #[error("no target rendering for canonical type {0}")]
    NoTargetRendering(String),
}
