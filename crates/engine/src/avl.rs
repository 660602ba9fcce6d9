//! Shadow AVL tree.
//!
//! A classical height-balanced tree mutated by exactly one task at a time:
//! the shadow worker applies inserts and eviction deletes, and the swap
//! supervisor takes the root during a promotion. Both coordinate through the
//! engine's shadow mutex, so rotations need no internal locking. Nodes are
//! the same [`crate::node`] type the foreground uses — a promoted root must
//! be ready to serve concurrent traffic the instant it becomes foreground.

use std::cmp::Ordering::{Equal, Greater, Less};
use std::sync::Arc;

use crate::node::{collect_keys, Branch, Node, NodeRef};

/// The shadow tree.
///
/// All operations assume exclusive access; the engine enforces that with a
/// mutex around the whole tree.
pub struct Avl<V> {
    root: Option<NodeRef<V>>,
}

impl<V> Default for Avl<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Avl<V> {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Inserts `key`, rebalancing on the way back up.
    ///
    /// An existing key refreshes its value and leaves the structure
    /// untouched, so the tree converges to the latest value per key as the
    /// update stream drains.
    pub fn insert(&mut self, key: &str, value: V) {
        let mut value = Some(value);
        self.root = Some(Self::insert_at(self.root.take(), key, &mut value));
    }

    fn insert_at(link: Option<NodeRef<V>>, key: &str, value: &mut Option<V>) -> NodeRef<V> {
        let Some(node) = link else {
            let node = Node::new(key);
            if let Some(value) = value.take() {
                node.set_value(value);
            }
            return node;
        };

        match key.cmp(node.key()) {
            Equal => {
                if let Some(value) = value.take() {
                    node.set_value(value);
                }
                node
            },
            Less => {
                let left = Self::insert_at(node.take_child(Branch::Left), key, value);
                node.set_child(Branch::Left, Some(left));
                Self::rebalance(node)
            },
            Greater => {
                let right = Self::insert_at(node.take_child(Branch::Right), key, value);
                node.set_child(Branch::Right, Some(right));
                Self::rebalance(node)
            },
        }
    }

    /// Removes `key` if present, rebalancing on the return path.
    pub fn delete(&mut self, key: &str) {
        self.root = Self::delete_at(self.root.take(), key);
    }

    fn delete_at(link: Option<NodeRef<V>>, key: &str) -> Option<NodeRef<V>> {
        let node = link?;
        match key.cmp(node.key()) {
            Less => {
                let left = Self::delete_at(node.take_child(Branch::Left), key);
                node.set_child(Branch::Left, left);
                Some(Self::rebalance(node))
            },
            Greater => {
                let right = Self::delete_at(node.take_child(Branch::Right), key);
                node.set_child(Branch::Right, right);
                Some(Self::rebalance(node))
            },
            Equal => {
                let left = node.take_child(Branch::Left);
                let right = node.take_child(Branch::Right);
                match (left, right) {
                    (None, None) => None,
                    (Some(only), None) | (None, Some(only)) => Some(only),
                    (Some(left), Some(right)) => {
                        // Two children: the in-order successor (leftmost of
                        // the right subtree) takes this node's place. Keys
                        // are immutable on live nodes, so the successor's
                        // key and value move into a replacement node rather
                        // than being written over the target.
                        let (successor_key, successor_value) = Self::peel_min(&right);
                        let right = Self::delete_at(Some(right), &successor_key);
                        let replacement = Node::new(&successor_key);
                        if let Some(value) = successor_value {
                            replacement.set_value(value);
                        }
                        replacement.set_child(Branch::Left, Some(left));
                        replacement.set_child(Branch::Right, right);
                        Some(Self::rebalance(replacement))
                    },
                }
            },
        }
    }

    /// Clones the leftmost key of the subtree and takes its value out.
    ///
    /// The emptied node is deleted by the caller immediately afterwards.
    fn peel_min(subtree: &NodeRef<V>) -> (String, Option<V>) {
        let mut current = Arc::clone(subtree);
        while let Some(left) = current.child(Branch::Left) {
            current = left;
        }
        (current.key().to_string(), current.take_value())
    }

    /// Restores the height and, when the balance factor reaches ±2, applies
    /// the appropriate single or double rotation.
    fn rebalance(node: NodeRef<V>) -> NodeRef<V> {
        node.recompute_height();
        let factor = node.balance_factor();
        if factor > 1 {
            if let Some(left) = node.child(Branch::Left) {
                if left.balance_factor() < 0 {
                    // Left-Right: rotate the left child left, then this node
                    // right.
                    node.set_child(Branch::Left, Some(Self::rotate_left(left)));
                }
                return Self::rotate_right(node);
            }
        } else if factor < -1 {
            if let Some(right) = node.child(Branch::Right) {
                if right.balance_factor() > 0 {
                    // Right-Left: mirror of the above.
                    node.set_child(Branch::Right, Some(Self::rotate_right(right)));
                }
                return Self::rotate_left(node);
            }
        }
        node
    }

    fn rotate_right(node: NodeRef<V>) -> NodeRef<V> {
        let Some(pivot) = node.take_child(Branch::Left) else {
            return node;
        };
        node.set_child(Branch::Left, pivot.take_child(Branch::Right));
        // Heights: demoted node first, new subtree root second.
        node.recompute_height();
        pivot.set_child(Branch::Right, Some(node));
        pivot.recompute_height();
        pivot
    }

    fn rotate_left(node: NodeRef<V>) -> NodeRef<V> {
        let Some(pivot) = node.take_child(Branch::Right) else {
            return node;
        };
        node.set_child(Branch::Right, pivot.take_child(Branch::Left));
        node.recompute_height();
        pivot.set_child(Branch::Left, Some(node));
        pivot.recompute_height();
        pivot
    }

    /// In-order traversal collecting every key whose value satisfies
    /// `predicate`. Pure; does not mutate the tree.
    ///
    /// The predicate runs under the shadow lock on the worker's hot path, so
    /// it must be fast and side-effect free.
    pub fn survey(&self, predicate: impl Fn(&V) -> bool) -> Vec<String> {
        let mut matched = Vec::new();
        Self::survey_at(self.root.as_ref(), &predicate, &mut matched);
        matched
    }

    fn survey_at(
        link: Option<&NodeRef<V>>,
        predicate: &impl Fn(&V) -> bool,
        matched: &mut Vec<String>,
    ) {
        if let Some(node) = link {
            Self::survey_at(node.child(Branch::Left).as_ref(), predicate, matched);
            if node.with_value(|value| value.is_some_and(|value| predicate(value))) {
                matched.push(node.key().to_string());
            }
            Self::survey_at(node.child(Branch::Right).as_ref(), predicate, matched);
        }
    }

    /// In-order key list.
    pub fn get_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_keys(self.root.as_ref(), &mut keys);
        keys
    }

    /// Height of the root (−1 when empty).
    pub fn height(&self) -> i32 {
        Node::height_of(self.root.as_ref())
    }

    /// Verifies the AVL invariant over the whole tree: stored heights are
    /// exact and every balance factor is within ±1. Diagnostic.
    pub fn is_balanced(&self) -> bool {
        Self::check_balance(self.root.as_ref()).1
    }

    fn check_balance(link: Option<&NodeRef<V>>) -> (i32, bool) {
        let Some(node) = link else {
            return (-1, true);
        };
        let (left, left_ok) = Self::check_balance(node.child(Branch::Left).as_ref());
        let (right, right_ok) = Self::check_balance(node.child(Branch::Right).as_ref());
        let expected = 1 + left.max(right);
        let ok = left_ok && right_ok && node.height() == expected && (left - right).abs() <= 1;
        (expected, ok)
    }

    /// Transfers the root out, leaving the tree empty. Used by the swap.
    pub(crate) fn take_root(&mut self) -> Option<NodeRef<V>> {
        self.root.take()
    }
}
