//! Error types for the engine facade.

use snafu::Snafu;

/// Boxed error type carried by policy callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by [`crate::Engine`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    /// The policy's compute callback failed; the node value was left
    /// untouched and no shadow update was produced.
    #[snafu(display("rate policy callback failed: {source}"))]
    Callback {
        /// The callback's error.
        source: BoxError,
    },

    /// `calculate` was invoked after `shutdown`.
    #[snafu(display("engine is shutting down"))]
    ShuttingDown,

    /// Keys are opaque but must be non-empty.
    #[snafu(display("key must be non-empty"))]
    EmptyKey,
}
