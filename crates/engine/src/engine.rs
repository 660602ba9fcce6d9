//! Engine facade: the public entry points over the two-tree store.
//!
//! A [`calculate`](Engine::calculate) call runs under an engine-wide read
//! gate, locates (or creates) the key's node in the foreground BST with the
//! node mutex held, applies the caller-supplied policy transition, and
//! enqueues the new value for the shadow tree. Two background tasks complete
//! the picture:
//!
//! - the **shadow worker** drains the update channel into the shadow AVL and
//!   sweeps it for evictable entries after every update;
//! - the **swap supervisor** ticks on a timer and, once the foreground's
//!   imbalance metric crosses the configured threshold, atomically promotes
//!   the shadow root to foreground under the writer side of the gate.
//!
//! The swap is the only moment the foreground changes shape other than
//! leaf-level insertions; requests observe either the old tree or the new
//! one, never a mixture.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use snafu::{ensure, ResultExt};
use tokio::{
    sync::{mpsc, watch, RwLock},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::{
    avl::Avl,
    bst::Bst,
    config::EngineConfig,
    error::{BoxError, CallbackSnafu, EmptyKeySnafu, Result, ShuttingDownSnafu},
};

/// Per-key state transition and eviction rules supplied by the caller.
///
/// `compute` is invoked with the node's mutex held, so transitions on a
/// shared key are serialized; it should be pure apart from reading the
/// clock. `evict` runs under the shadow lock on every worker cycle and must
/// be fast and side-effect free.
pub trait Policy: Send + Sync + 'static {
    /// Per-key state owned by the store.
    type Value: Clone + Send + Sync + 'static;
    /// Request parameters handed through `calculate` unchanged.
    type Params: Send + Sync;
    /// Outcome returned to the caller.
    type Decision: Send;

    /// Produces the next value and the decision for one request.
    ///
    /// `current` is `None` on the first request for a key.
    ///
    /// # Errors
    ///
    /// Any error is propagated out of `calculate` verbatim; the stored value
    /// is left untouched and no shadow update is emitted.
    fn compute(
        &self,
        current: Option<&Self::Value>,
        params: &Self::Params,
    ) -> std::result::Result<(Self::Value, Self::Decision), BoxError>;

    /// Returns `true` when a value's entry should be dropped from the
    /// shadow tree (and thus disappear at the next swap).
    fn evict(&self, value: &Self::Value) -> bool;
}

/// One foreground-to-shadow message: the latest value written for a key.
pub struct Update<V> {
    /// The node's key.
    pub key: String,
    /// The value as of the producing request.
    pub value: V,
}

/// Point-in-time counters for observability and tests.
#[derive(Debug, Clone, Copy)]
pub struct EngineMetrics {
    /// Imbalance accumulator of the foreground tree.
    pub imbalance_sum: i64,
    /// Operations since the last swap (1-based; reset to 1 on swap).
    pub total_ops: u64,
    /// Updates enqueued but not yet applied to the shadow tree.
    pub backlog: usize,
    /// Root height of the foreground tree.
    pub foreground_height: i32,
}

/// The rate-limiting store.
///
/// Created with [`Engine::new`], which spawns the shadow worker and swap
/// supervisor onto the ambient Tokio runtime. Request traffic goes through
/// [`calculate`](Engine::calculate); [`shutdown`](Engine::shutdown) stops the
/// background tasks and drains the update channel.
pub struct Engine<P: Policy> {
    policy: P,
    foreground: Bst<P::Value>,
    /// The shadow tree; this mutex is the only synchronization between the
    /// worker and the supervisor.
    shadow: Mutex<Avl<P::Value>>,
    /// Readers = request processing, writer = swap or shutdown.
    gate: RwLock<()>,
    /// Producer half of the update channel; taken on shutdown so the worker
    /// sees the channel close.
    updates_tx: Mutex<Option<mpsc::UnboundedSender<Update<P::Value>>>>,
    /// Updates sent but not yet applied to the shadow tree. The swap's
    /// drain-wait polls this to zero.
    backlog: AtomicUsize,
    total_ops: AtomicU64,
    shutting_down: AtomicBool,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: EngineConfig,
}

impl<P: Policy> Engine<P> {
    /// Builds the engine and spawns its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(policy: P, config: EngineConfig) -> Arc<Self> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let engine = Arc::new(Self {
            policy,
            foreground: Bst::new(config.bf_threshold),
            shadow: Mutex::new(Avl::new()),
            gate: RwLock::new(()),
            updates_tx: Mutex::new(Some(updates_tx)),
            backlog: AtomicUsize::new(0),
            total_ops: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
            config,
        });

        let worker = tokio::spawn(Arc::clone(&engine).run_worker(updates_rx));
        let supervisor = tokio::spawn(Arc::clone(&engine).run_supervisor(stop_rx));
        engine.tasks.lock().extend([worker, supervisor]);

        engine
    }

    /// Applies one request for `key` and returns the policy's decision.
    ///
    /// Runs concurrently with other requests; only a swap or shutdown
    /// excludes it. Requests for the same key serialize on that node's
    /// mutex, so the second caller observes the value written by the first.
    ///
    /// # Errors
    ///
    /// - [`EngineError::EmptyKey`](crate::EngineError::EmptyKey) for an empty key.
    /// - [`EngineError::ShuttingDown`](crate::EngineError::ShuttingDown) after `shutdown`.
    /// - [`EngineError::Callback`](crate::EngineError::Callback) when the policy fails; the stored
    ///   value, the shadow tree, and the operation counter are all left untouched.
    pub async fn calculate(&self, key: &str, params: &P::Params) -> Result<P::Decision> {
        ensure!(!key.is_empty(), EmptyKeySnafu);
        ensure!(!self.shutting_down.load(Ordering::Acquire), ShuttingDownSnafu);

        let _gate = self.gate.read().await;

        let mut node = self.foreground.in_search(key);
        let (next, decision) = self.policy.compute(node.value(), params).context(CallbackSnafu)?;
        node.replace(next.clone());
        drop(node);

        self.enqueue_update(key, next)?;
        self.total_ops.fetch_add(1, Ordering::AcqRel);
        Ok(decision)
    }

    /// Stops the background tasks and waits for them to finish. Idempotent;
    /// once it returns, `calculate` is rejected with `ShuttingDown`.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            // Writer side: waits out in-flight requests, then stops the
            // supervisor and closes the channel so the worker drains and
            // exits.
            let _gate = self.gate.write().await;
            let _ = self.stop_tx.send(true);
            self.updates_tx.lock().take();
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(error) = task.await {
                warn!(%error, "background task failed during shutdown");
            }
        }
        info!("engine shut down");
    }

    /// Current counters.
    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            imbalance_sum: self.foreground.imbalance_sum(),
            total_ops: self.total_ops.load(Ordering::Acquire),
            backlog: self.backlog.load(Ordering::Acquire),
            foreground_height: self.foreground.height(),
        }
    }

    /// The supervisor's trigger value: `imbalance_sum / total_ops`.
    pub fn trigger_metric(&self) -> f64 {
        let ops = self.total_ops.load(Ordering::Acquire).max(1);
        self.foreground.imbalance_sum() as f64 / ops as f64
    }

    /// In-order snapshot of the foreground keys. Quiescent use only.
    pub fn keys(&self) -> Vec<String> {
        self.foreground.get_keys()
    }

    fn enqueue_update(&self, key: &str, value: P::Value) -> Result<()> {
        let sender = self.updates_tx.lock();
        let Some(sender) = sender.as_ref() else {
            return ShuttingDownSnafu.fail();
        };
        // Count before sending so the swap's drain-wait can never observe
        // an empty backlog with a message still in flight.
        self.backlog.fetch_add(1, Ordering::AcqRel);
        if sender.send(Update { key: key.to_string(), value }).is_err() {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Shadow worker: single consumer of the update channel.
    async fn run_worker(self: Arc<Self>, mut updates: mpsc::UnboundedReceiver<Update<P::Value>>) {
        while let Some(update) = updates.recv().await {
            {
                let mut shadow = self.shadow.lock();
                shadow.insert(&update.key, update.value);
                // Sweep on every update so the shadow stays compact.
                let expired = shadow.survey(|value| self.policy.evict(value));
                for key in &expired {
                    shadow.delete(key);
                }
            }
            self.backlog.fetch_sub(1, Ordering::AcqRel);
        }
        debug!("update channel closed, shadow worker exiting");
    }

    /// Swap supervisor: periodic trigger check.
    async fn run_supervisor(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.config.supervisor_tick);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let trigger = self.trigger_metric();
                    if trigger > self.config.trigger_threshold {
                        debug!(trigger, "imbalance trigger exceeded");
                        self.swap().await;
                    }
                },
            }
        }
        debug!("swap supervisor exiting");
    }

    /// Promotes the shadow tree to foreground.
    ///
    /// Holds the writer gate for the whole operation: new requests block,
    /// in-flight ones finish first. The update channel is drained fully
    /// before the roots change hands, so the promoted tree carries the
    /// latest value of every surviving key.
    async fn swap(&self) {
        let _gate = self.gate.write().await;

        loop {
            let backlog = self.backlog.load(Ordering::Acquire);
            if backlog == 0 {
                break;
            }
            let pause = Duration::from_micros(50).saturating_mul(backlog.min(1024) as u32);
            time::sleep(pause).await;
        }

        let promoted_height;
        {
            let mut shadow = self.shadow.lock();
            let root = shadow.take_root();
            self.foreground.promote(root);
            *shadow = Avl::new();
            promoted_height = self.foreground.height();
        }
        self.total_ops.store(1, Ordering::Release);
        info!(height = promoted_height, "shadow tree promoted to foreground");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Counts calls per key; the decision is the running count.
    struct CountPolicy;

    impl Policy for CountPolicy {
        type Value = u64;
        type Params = ();
        type Decision = u64;

        fn compute(
            &self,
            current: Option<&u64>,
            _params: &(),
        ) -> std::result::Result<(u64, u64), BoxError> {
            let next = current.copied().unwrap_or(0) + 1;
            Ok((next, next))
        }

        fn evict(&self, _value: &u64) -> bool {
            false
        }
    }

    /// Always fails.
    struct FailPolicy;

    impl Policy for FailPolicy {
        type Value = u64;
        type Params = ();
        type Decision = ();

        fn compute(
            &self,
            _current: Option<&u64>,
            _params: &(),
        ) -> std::result::Result<(u64, ()), BoxError> {
            Err("compute refused".into())
        }

        fn evict(&self, _value: &u64) -> bool {
            false
        }
    }

    /// Evicts everything it sees.
    struct EvictAllPolicy;

    impl Policy for EvictAllPolicy {
        type Value = u64;
        type Params = ();
        type Decision = u64;

        fn compute(
            &self,
            current: Option<&u64>,
            _params: &(),
        ) -> std::result::Result<(u64, u64), BoxError> {
            let next = current.copied().unwrap_or(0) + 1;
            Ok((next, next))
        }

        fn evict(&self, _value: &u64) -> bool {
            true
        }
    }

    async fn drained<P: Policy>(engine: &Arc<Engine<P>>) {
        for _ in 0..400 {
            if engine.metrics().backlog == 0 {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("update backlog did not drain");
    }

    #[tokio::test]
    async fn test_calculate_counts_per_key() {
        let engine = Engine::new(CountPolicy, EngineConfig::default());
        assert_eq!(engine.calculate("tenant-a", &()).await.unwrap(), 1);
        assert_eq!(engine.calculate("tenant-a", &()).await.unwrap(), 2);
        assert_eq!(engine.calculate("tenant-b", &()).await.unwrap(), 1);
        assert_eq!(engine.metrics().total_ops, 4);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_callback_error_leaves_state_untouched() {
        let engine = Engine::new(FailPolicy, EngineConfig::default());
        let err = engine.calculate("k", &()).await.unwrap_err();
        assert!(matches!(err, crate::EngineError::Callback { .. }));
        // No shadow update and no operation counted.
        assert_eq!(engine.metrics().total_ops, 1);
        assert_eq!(engine.metrics().backlog, 0);
        assert!(engine.shadow.lock().get_keys().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let engine = Engine::new(CountPolicy, EngineConfig::default());
        let err = engine.calculate("", &()).await.unwrap_err();
        assert!(matches!(err, crate::EngineError::EmptyKey));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_requests() {
        let engine = Engine::new(CountPolicy, EngineConfig::default());
        engine.calculate("k", &()).await.unwrap();
        engine.shutdown().await;
        engine.shutdown().await;

        let err = engine.calculate("k", &()).await.unwrap_err();
        assert!(matches!(err, crate::EngineError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_worker_mirrors_foreground_into_shadow() {
        let engine = Engine::new(CountPolicy, EngineConfig::default());
        for key in ["m", "c", "x", "c"] {
            engine.calculate(key, &()).await.unwrap();
        }
        drained(&engine).await;

        assert_eq!(engine.shadow.lock().get_keys(), ["c", "m", "x"]);
        assert!(engine.shadow.lock().is_balanced());
        // The duplicate "c" converged to its latest value.
        assert_eq!(engine.shadow.lock().survey(|count| *count == 2), ["c"]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_evicting_policy_keeps_shadow_empty() {
        let engine = Engine::new(EvictAllPolicy, EngineConfig::default());
        for key in ["a", "b", "c"] {
            engine.calculate(key, &()).await.unwrap();
        }
        drained(&engine).await;

        assert!(engine.shadow.lock().get_keys().is_empty());
        // The foreground still carries everything until a swap.
        assert_eq!(engine.keys(), ["a", "b", "c"]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_swap_promotes_shadow_and_resets_counters() {
        let engine = Engine::new(CountPolicy, EngineConfig::default());
        for i in 0..64 {
            engine.calculate(&format!("{i:03}"), &()).await.unwrap();
        }
        drained(&engine).await;

        let before = engine.keys();
        let spine_height = engine.metrics().foreground_height;
        assert_eq!(spine_height, 63);

        engine.swap().await;

        assert_eq!(engine.keys(), before);
        let metrics = engine.metrics();
        assert_eq!(metrics.total_ops, 1);
        assert_eq!(metrics.imbalance_sum, 0);
        assert!(metrics.foreground_height <= 7, "promoted tree height {}", metrics.foreground_height);
        assert!(engine.shadow.lock().get_keys().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_keys_absent_from_shadow_vanish_on_swap() {
        let engine = Engine::new(EvictAllPolicy, EngineConfig::default());
        for key in ["a", "b", "c"] {
            engine.calculate(key, &()).await.unwrap();
        }
        drained(&engine).await;
        engine.swap().await;

        assert!(engine.keys().is_empty());
        engine.shutdown().await;
    }
}
