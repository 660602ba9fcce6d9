//! Token-bucket state transition.
//!
//! The bucket arithmetic lives entirely here; the engine treats it as an
//! opaque callback pair. Each key's bucket refills continuously at
//! `capacity / interval` tokens per unit and each allowed request consumes
//! one token. A bucket also computes its own expiry: the instant it would be
//! full again, after which the record carries no information and is fair
//! game for the shadow sweep.

use std::str::FromStr;
use std::time::{Duration, Instant};

use floodgate_engine::{BoxError, Policy};

use crate::error::ServiceError;

/// Time unit the refill interval is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillUnit {
    /// Seconds (`"s"`).
    Seconds,
    /// Milliseconds (`"ms"`).
    Millis,
    /// Microseconds (`"us"`).
    Micros,
}

impl RefillUnit {
    /// Duration of one unit.
    pub fn span(self) -> Duration {
        match self {
            Self::Seconds => Duration::from_secs(1),
            Self::Millis => Duration::from_millis(1),
            Self::Micros => Duration::from_micros(1),
        }
    }

    /// The wire spelling of the unit.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "s",
            Self::Millis => "ms",
            Self::Micros => "us",
        }
    }

    fn elapsed_units(self, elapsed: Duration) -> f64 {
        match self {
            Self::Seconds => elapsed.as_secs_f64(),
            Self::Millis => elapsed.as_millis() as f64,
            Self::Micros => elapsed.as_micros() as f64,
        }
    }
}

impl FromStr for RefillUnit {
    type Err = ServiceError;

    fn from_str(unit: &str) -> Result<Self, Self::Err> {
        match unit {
            "s" => Ok(Self::Seconds),
            "ms" => Ok(Self::Millis),
            "us" => Ok(Self::Micros),
            other => Err(ServiceError::InvalidUnit { unit: other.to_string() }),
        }
    }
}

/// Bucket parameters supplied with every request.
#[derive(Debug, Clone)]
pub struct BucketParams {
    /// Maximum tokens the bucket holds.
    pub capacity: i64,
    /// Refill interval: the bucket goes from empty to full in this many
    /// units.
    pub interval: i32,
    /// Unit the interval is expressed in.
    pub unit: RefillUnit,
}

/// Per-key bucket state stored in the engine.
#[derive(Debug, Clone)]
pub struct BucketState {
    available_tokens: i64,
    last_refilled: Instant,
    expires_at: Instant,
}

impl BucketState {
    /// Tokens currently available.
    pub fn available_tokens(&self) -> i64 {
        self.available_tokens
    }

    /// Instant after which this record is evictable.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

/// Allow/deny outcome of one bucket transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request fit within the budget.
    Allowed,
    /// The bucket was empty.
    Limited,
}

/// The token-bucket policy plugged into the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenBucketPolicy;

impl Policy for TokenBucketPolicy {
    type Value = BucketState;
    type Params = BucketParams;
    type Decision = Decision;

    fn compute(
        &self,
        current: Option<&BucketState>,
        params: &BucketParams,
    ) -> Result<(BucketState, Decision), BoxError> {
        let now = Instant::now();
        let mut state = match current {
            Some(state) => state.clone(),
            // First sighting of this key: a full bucket.
            None => BucketState {
                available_tokens: params.capacity,
                last_refilled: now,
                expires_at: now,
            },
        };

        let refill_rate = params.capacity as f64 / f64::from(params.interval);
        let elapsed = params.unit.elapsed_units(now.duration_since(state.last_refilled));
        let refilled = (elapsed * refill_rate) as i64;
        // The refill clock only advances once at least one whole token has
        // accrued, otherwise slow drips would never accumulate.
        if refilled > 0 {
            state.last_refilled = now;
            state.available_tokens = params.capacity.min(state.available_tokens + refilled);
        }

        let allowed = state.available_tokens > 0;
        if allowed {
            state.available_tokens -= 1;
        }

        // Expiry is the instant the bucket would be full again; an untouched
        // full bucket is indistinguishable from no bucket at all.
        let deficit = (params.capacity - state.available_tokens) as f64;
        state.expires_at = now + params.unit.span().mul_f64(deficit / refill_rate);

        Ok((state, if allowed { Decision::Allowed } else { Decision::Limited }))
    }

    fn evict(&self, value: &BucketState) -> bool {
        Instant::now() >= value.expires_at
    }
}
