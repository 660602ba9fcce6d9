//! Error types for the limiter service.

use floodgate_engine::EngineError;
use snafu::Snafu;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced by [`crate::LimiterService`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    /// The request named a time unit the service does not understand.
    #[snafu(display("unknown time unit {unit:?} (expected \"s\", \"ms\", or \"us\")"))]
    InvalidUnit {
        /// The offending unit string.
        unit: String,
    },

    /// Bucket capacity must be at least one token.
    #[snafu(display("capacity must be positive, got {capacity}"))]
    InvalidCapacity {
        /// The offending capacity.
        capacity: i64,
    },

    /// Refill interval must be positive.
    #[snafu(display("interval must be positive, got {interval}"))]
    InvalidInterval {
        /// The offending interval.
        interval: i32,
    },

    /// The underlying engine rejected or failed the request.
    #[snafu(display("rate limit lookup failed: {source}"))]
    Engine {
        /// The engine error.
        source: EngineError,
    },
}
