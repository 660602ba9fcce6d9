//! Server configuration.
//!
//! All options are available as CLI flags and environment variables; flags
//! win when both are set.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use floodgate_engine::EngineConfig;

/// Floodgate: an in-memory token-bucket rate-limiting service.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
pub struct Config {
    /// Address to bind the HTTP listener on.
    #[arg(long, env = "FLOODGATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP listener on.
    #[arg(long, env = "FLOODGATE_PORT", default_value_t = 8123)]
    pub port: u16,

    /// Log filter (tracing `EnvFilter` syntax, e.g. "info" or
    /// "floodgate_engine=debug,info").
    #[arg(long, env = "FLOODGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Minimum per-node balance factor that counts toward the foreground
    /// imbalance metric.
    #[arg(long, env = "FLOODGATE_BF_THRESHOLD", default_value_t = 5)]
    pub bf_threshold: i32,

    /// Imbalance-per-operation value at which the shadow tree is promoted.
    #[arg(long, env = "FLOODGATE_TRIGGER_THRESHOLD", default_value_t = 40.0)]
    pub trigger_threshold: f64,

    /// Milliseconds between swap supervisor checks.
    #[arg(long, env = "FLOODGATE_SUPERVISOR_TICK_MS", default_value_t = 1000)]
    pub supervisor_tick_ms: u64,
}

impl Config {
    /// The listen address, if `host:port` parses.
    ///
    /// # Errors
    ///
    /// Returns the parse error for a malformed host.
    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Engine tuning derived from the server flags.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            bf_threshold: self.bf_threshold,
            trigger_threshold: self.trigger_threshold,
            supervisor_tick: Duration::from_millis(self.supervisor_tick_ms),
        }
    }
}
