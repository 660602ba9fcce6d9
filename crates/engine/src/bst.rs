//! Foreground binary search tree.
//!
//! Serves all request traffic with hand-over-hand (lock-coupling) per-node
//! locking: a descending caller always holds exactly one lock — the current
//! node's — acquired before the previous one was released. Distinct
//! root-to-leaf paths proceed in parallel; two operations on the same key are
//! serialized by that node's mutex.
//!
//! The tree never rebalances and never deletes. Instead it accumulates a
//! threshold-truncated sum of per-ancestor balance factors on every
//! traversal; the swap supervisor divides that sum by the operation count to
//! decide when the tree has degraded enough to be replaced wholesale by the
//! shadow AVL (see [`crate::engine`]).

use std::cmp::Ordering::{Equal, Greater, Less};
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::node::{audit_heights, collect_keys, Branch, LockedNode, Node, NodeRef};

/// The foreground tree.
///
/// Concurrent lookups and insertions are safe from any number of threads.
/// [`Bst::get_keys`] and [`Bst::audit_heights`] are diagnostics and require
/// external quiescence.
pub struct Bst<V> {
    /// Root link; guarded by a dedicated mutex because the root has no
    /// parent lock to hand off from.
    root: Mutex<Option<NodeRef<V>>>,
    /// Accumulated balance-factor contributions since the last promotion.
    imbalance_sum: AtomicI64,
    /// Minimum per-node balance factor that contributes to the sum.
    bf_threshold: i32,
}

impl<V> Bst<V> {
    /// Creates an empty tree.
    pub fn new(bf_threshold: i32) -> Self {
        Self {
            root: Mutex::new(None),
            imbalance_sum: AtomicI64::new(0),
            bf_threshold,
        }
    }

    /// Finds the node for `key`, inserting a fresh one if absent, and returns
    /// it with its mutex held.
    ///
    /// On the way out, every ancestor touched by the traversal has its height
    /// refreshed (monotone, lock-free) and contributes its balance factor to
    /// the imbalance sum when the factor meets the configured threshold.
    /// Insertion happens at most once per call; a duplicate key returns the
    /// existing node with no structural change.
    pub fn in_search(&self, key: &str) -> LockedNode<V> {
        let mut path: Vec<NodeRef<V>> = Vec::new();

        let mut root_guard = self.root.lock();
        let Some(root) = root_guard.as_ref().map(Arc::clone) else {
            let node = Node::new(key);
            let locked = LockedNode::acquire(Arc::clone(&node));
            *root_guard = Some(node);
            return locked;
        };
        // Lock the root node before releasing the root mutex so no other
        // caller can slip past us.
        let mut locked = LockedNode::acquire(root);
        drop(root_guard);

        let target = loop {
            match key.cmp(locked.key()) {
                Equal => break locked,
                Less => match locked.node().child(Branch::Left) {
                    Some(child) => {
                        path.push(Arc::clone(locked.node()));
                        // Child lock is acquired before the parent guard is
                        // dropped by the assignment.
                        locked = LockedNode::acquire(child);
                    },
                    None => {
                        let child = Node::new(key);
                        let child_locked = LockedNode::acquire(Arc::clone(&child));
                        locked.node().set_child(Branch::Left, Some(child));
                        locked.node().refresh_height();
                        path.push(Arc::clone(locked.node()));
                        locked = child_locked;
                        break locked;
                    },
                },
                Greater => match locked.node().child(Branch::Right) {
                    Some(child) => {
                        path.push(Arc::clone(locked.node()));
                        locked = LockedNode::acquire(child);
                    },
                    None => {
                        let child = Node::new(key);
                        let child_locked = LockedNode::acquire(Arc::clone(&child));
                        locked.node().set_child(Branch::Right, Some(child));
                        locked.node().refresh_height();
                        path.push(Arc::clone(locked.node()));
                        locked = child_locked;
                        break locked;
                    },
                },
            }
        };

        // Heights are atomics, so the walk back up needs no locks. A small
        // undercount from interleaved traversals is tolerable: the sum is a
        // trigger heuristic, not a correctness invariant.
        let mut contribution: i64 = 0;
        for ancestor in path.iter().rev() {
            ancestor.refresh_height();
            let factor = ancestor.balance_factor().abs();
            if factor >= self.bf_threshold {
                contribution += i64::from(factor);
            }
        }
        if contribution != 0 {
            self.imbalance_sum.fetch_add(contribution, Ordering::Relaxed);
        }

        target
    }

    /// Read-only lookup; returns the node with its mutex held, or `None` if
    /// the key is absent.
    pub fn search(&self, key: &str) -> Option<LockedNode<V>> {
        let root_guard = self.root.lock();
        let root = Arc::clone(root_guard.as_ref()?);
        let mut locked = LockedNode::acquire(root);
        drop(root_guard);

        loop {
            match key.cmp(locked.key()) {
                Equal => return Some(locked),
                Less => {
                    let child = locked.node().child(Branch::Left)?;
                    locked = LockedNode::acquire(child);
                },
                Greater => {
                    let child = locked.node().child(Branch::Right)?;
                    locked = LockedNode::acquire(child);
                },
            }
        }
    }

    /// In-order key snapshot. Quiescent use only; not safe against concurrent
    /// writers.
    pub fn get_keys(&self) -> Vec<String> {
        let root = self.root.lock().clone();
        let mut keys = Vec::new();
        collect_keys(root.as_ref(), &mut keys);
        keys
    }

    /// Height of the root (−1 when empty).
    pub fn height(&self) -> i32 {
        Node::height_of(self.root.lock().as_ref())
    }

    /// Current imbalance accumulator value.
    pub fn imbalance_sum(&self) -> i64 {
        self.imbalance_sum.load(Ordering::Relaxed)
    }

    /// Counts nodes whose stored height disagrees with a full recomputation.
    /// Diagnostic; quiescent use only.
    pub fn audit_heights(&self) -> usize {
        let root = self.root.lock().clone();
        audit_heights(root.as_ref()).1
    }

    /// Replaces the root wholesale and zeroes the imbalance accumulator.
    ///
    /// Called by the swap supervisor under the engine's writer gate; the old
    /// tree becomes unreachable and drops with its last outstanding guard.
    pub(crate) fn promote(&self, root: Option<NodeRef<V>>) {
        *self.root.lock() = root;
        self.imbalance_sum.store(0, Ordering::Release);
    }
}
