//! The limiter service: parameter validation and verdict mapping over the
//! engine facade.

use std::sync::Arc;

use floodgate_engine::{Engine, EngineConfig};
use snafu::{ensure, ResultExt};
use tracing::debug;

use crate::{
    bucket::{BucketParams, Decision, RefillUnit, TokenBucketPolicy},
    error::{EngineSnafu, InvalidCapacitySnafu, InvalidIntervalSnafu, Result},
};

/// Outcome reported to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The request is within budget.
    Ok,
    /// The request exceeded the key's budget.
    Limited,
}

impl Verdict {
    /// Wire spelling of the verdict.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Limited => "LIMITED",
        }
    }
}

/// Per-key token-bucket rate limiter backed by the two-tree engine.
pub struct LimiterService {
    engine: Arc<Engine<TokenBucketPolicy>>,
}

impl LimiterService {
    /// Creates the service and starts the engine's background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        Self { engine: Engine::new(TokenBucketPolicy, config) }
    }

    /// Applies one request against `key`'s bucket.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown unit or non-positive
    /// capacity/interval, and [`ServiceError::Engine`](crate::ServiceError::Engine)
    /// when the engine rejects the request (empty key, shutdown in progress).
    pub async fn limit(
        &self,
        key: &str,
        capacity: i64,
        interval: i32,
        unit: &str,
    ) -> Result<Verdict> {
        ensure!(capacity > 0, InvalidCapacitySnafu { capacity });
        ensure!(interval > 0, InvalidIntervalSnafu { interval });
        let unit: RefillUnit = unit.parse()?;

        let params = BucketParams { capacity, interval, unit };
        let decision = self.engine.calculate(key, &params).await.context(EngineSnafu)?;
        debug!(key, ?decision, "rate limit decision");

        Ok(match decision {
            Decision::Allowed => Verdict::Ok,
            Decision::Limited => Verdict::Limited,
        })
    }

    /// Stops the engine's background tasks. Idempotent.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }

    /// The underlying engine, for diagnostics.
    pub fn engine(&self) -> &Arc<Engine<TokenBucketPolicy>> {
        &self.engine
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use floodgate_engine::EngineError;

    use super::*;
    use crate::error::ServiceError;

    fn service() -> LimiterService {
        LimiterService::new(EngineConfig::default())
    }

    #[tokio::test]
    async fn test_burst_then_limited_then_refill() {
        let service = service();

        // One token per 6ms.
        for _ in 0..10 {
            let verdict = service.limit("tenant", 10, 60, "ms").await.unwrap();
            assert_eq!(verdict, Verdict::Ok);
        }
        let verdict = service.limit("tenant", 10, 60, "ms").await.unwrap();
        assert_eq!(verdict, Verdict::Limited);

        tokio::time::sleep(Duration::from_millis(7)).await;
        let verdict = service.limit("tenant", 10, 60, "ms").await.unwrap();
        assert_eq!(verdict, Verdict::Ok);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let service = service();

        let verdict = service.limit("a", 1, 60, "s").await.unwrap();
        assert_eq!(verdict, Verdict::Ok);
        let verdict = service.limit("a", 1, 60, "s").await.unwrap();
        assert_eq!(verdict, Verdict::Limited);

        // A different key has its own bucket.
        let verdict = service.limit("b", 1, 60, "s").await.unwrap();
        assert_eq!(verdict, Verdict::Ok);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let service = service();

        let err = service.limit("k", 0, 60, "s").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCapacity { capacity: 0 }));

        let err = service.limit("k", 10, -1, "s").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInterval { interval: -1 }));

        let err = service.limit("k", 10, 60, "hours").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidUnit { .. }));

        let err = service.limit("", 10, 60, "s").await.unwrap_err();
        assert!(matches!(err, ServiceError::Engine { source: EngineError::EmptyKey }));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_limit_after_shutdown_fails_cleanly() {
        let service = service();
        service.shutdown().await;

        let err = service.limit("k", 10, 60, "s").await.unwrap_err();
        assert!(matches!(err, ServiceError::Engine { source: EngineError::ShuttingDown }));
    }

    #[test]
    fn test_verdict_strings() {
        assert_eq!(Verdict::Ok.as_str(), "OK");
        assert_eq!(Verdict::Limited.as_str(), "LIMITED");
    }
}
