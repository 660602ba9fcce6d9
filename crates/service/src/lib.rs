//! floodgate-service: per-key token-bucket rate limiting over the
//! floodgate-engine two-tree store.
//!
//! The engine core is policy-agnostic; this crate supplies the token-bucket
//! arithmetic as the engine's compute/evict callbacks and wraps the whole
//! thing in a small service facade:
//!
//! - [`TokenBucketPolicy`] — continuous refill at `capacity / interval`
//!   tokens per unit, one token consumed per allowed request, self-computed
//!   expiry for the shadow sweep.
//! - [`LimiterService`] — validates request parameters and maps engine
//!   decisions onto wire verdicts (`OK` / `LIMITED`).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod error;
pub mod service;

pub use bucket::{BucketParams, BucketState, Decision, RefillUnit, TokenBucketPolicy};
pub use error::{Result, ServiceError};
pub use service::{LimiterService, Verdict};
