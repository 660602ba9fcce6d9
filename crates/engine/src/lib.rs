//! floodgate-engine: a two-tree concurrent key-value core for per-key rate
//! limiting.
//!
//! The engine pairs two trees over the same node type:
//!
//! - **Foreground BST** — absorbs all request traffic with hand-over-hand
//!   per-node locking. Never rebalances, never deletes; instead it tracks an
//!   aggregate imbalance metric as it degrades.
//! - **Shadow AVL** — kept in sync asynchronously through an update channel
//!   by a single worker task, swept for evictable entries on every update,
//!   and always height-balanced.
//!
//! A supervisor task watches `imbalance_sum / total_ops`; past a threshold it
//! takes the engine's writer gate, waits for the channel to drain, and
//! promotes the shadow root to foreground in one pointer move. Eviction
//! therefore costs requests nothing: expired keys simply fail to survive the
//! next promotion.
//!
//! ## Quick start
//!
//! ```no_run
//! use floodgate_engine::{BoxError, Engine, EngineConfig, Policy};
//!
//! struct Counter;
//!
//! impl Policy for Counter {
//!     type Value = u64;
//!     type Params = ();
//!     type Decision = u64;
//!
//!     fn compute(&self, current: Option<&u64>, _params: &())
//!         -> Result<(u64, u64), BoxError>
//!     {
//!         let next = current.copied().unwrap_or(0) + 1;
//!         Ok((next, next))
//!     }
//!
//!     fn evict(&self, _value: &u64) -> bool {
//!         false
//!     }
//! }
//!
//! # async fn demo() -> Result<(), floodgate_engine::EngineError> {
//! let engine = Engine::new(Counter, EngineConfig::default());
//! let seen = engine.calculate("tenant-1", &()).await?;
//! assert_eq!(seen, 1);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod avl;
pub mod bst;
pub mod config;
pub mod engine;
pub mod error;
pub mod node;

pub use avl::Avl;
pub use bst::Bst;
pub use config::EngineConfig;
pub use engine::{Engine, EngineMetrics, Policy, Update};
pub use error::{BoxError, EngineError, Result};
pub use node::LockedNode;
