//! Engine tuning knobs.

use std::time::Duration;

/// Configuration for the engine's imbalance accounting and swap supervision.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum per-node balance factor that contributes to the imbalance
    /// sum during foreground traversals.
    pub bf_threshold: i32,
    /// Value of `imbalance_sum / total_ops` at which the supervisor promotes
    /// the shadow tree.
    pub trigger_threshold: f64,
    /// Period between supervisor trigger checks.
    pub supervisor_tick: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bf_threshold: 5,
            trigger_threshold: 40.0,
            supervisor_tick: Duration::from_secs(1),
        }
    }
}
