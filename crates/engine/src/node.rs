//! Tree node shared by the foreground BST and the shadow AVL.
//!
//! A node carries an immutable key, a mutex-guarded value slot, an atomic
//! height, and its child links. The value mutex doubles as the per-node lock
//! used for hand-over-hand traversal: holding it grants the exclusive right
//! to mutate this node's child links. Child links live behind their own
//! `RwLock` so that height and balance audits can read them cheaply without
//! participating in the traversal locking protocol.

use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex, RwLock};

/// Shared handle to a tree node.
pub(crate) type NodeRef<V> = Arc<Node<V>>;

/// Owning guard over a node's value slot.
type ValueGuard<V> = ArcMutexGuard<RawMutex, Option<V>>;

/// Which child link an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Branch {
    Left,
    Right,
}

/// A single tree node.
///
/// Heights follow the AVL convention: a missing child has height −1 and a
/// leaf has height 0.
pub(crate) struct Node<V> {
    key: String,
    height: AtomicI32,
    value: Arc<Mutex<Option<V>>>,
    children: RwLock<Children<V>>,
}

struct Children<V> {
    left: Option<NodeRef<V>>,
    right: Option<NodeRef<V>>,
}

impl<V> Node<V> {
    /// Creates a fresh leaf with an empty value slot.
    pub(crate) fn new(key: &str) -> NodeRef<V> {
        Arc::new(Self {
            key: key.to_string(),
            height: AtomicI32::new(0),
            value: Arc::new(Mutex::new(None)),
            children: RwLock::new(Children { left: None, right: None }),
        })
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn height(&self) -> i32 {
        self.height.load(Ordering::Acquire)
    }

    /// Height of an optional link (−1 for a missing child).
    pub(crate) fn height_of(link: Option<&NodeRef<V>>) -> i32 {
        link.map_or(-1, |node| node.height())
    }

    pub(crate) fn child(&self, branch: Branch) -> Option<NodeRef<V>> {
        let children = self.children.read();
        match branch {
            Branch::Left => children.left.clone(),
            Branch::Right => children.right.clone(),
        }
    }

    pub(crate) fn take_child(&self, branch: Branch) -> Option<NodeRef<V>> {
        let mut children = self.children.write();
        match branch {
            Branch::Left => children.left.take(),
            Branch::Right => children.right.take(),
        }
    }

    pub(crate) fn set_child(&self, branch: Branch, child: Option<NodeRef<V>>) {
        let mut children = self.children.write();
        match branch {
            Branch::Left => children.left = child,
            Branch::Right => children.right = child,
        }
    }

    fn child_heights(&self) -> (i32, i32) {
        let children = self.children.read();
        (Self::height_of(children.left.as_ref()), Self::height_of(children.right.as_ref()))
    }

    /// `height(left) − height(right)`.
    pub(crate) fn balance_factor(&self) -> i32 {
        let (left, right) = self.child_heights();
        left - right
    }

    /// Recomputes and stores the exact height.
    ///
    /// Shadow-tree use only: requires exclusive access to the subtree.
    pub(crate) fn recompute_height(&self) {
        let (left, right) = self.child_heights();
        self.height.store(1 + left.max(right), Ordering::Release);
    }

    /// Raises the height to match the children if it is stale.
    ///
    /// Foreground insertions never remove nodes, so heights are monotone
    /// non-decreasing; the CAS loop retries only while the candidate still
    /// exceeds the observed value and tolerates concurrent raisers on a
    /// shared ancestor chain.
    pub(crate) fn refresh_height(&self) {
        let (left, right) = self.child_heights();
        let candidate = 1 + left.max(right);
        let mut observed = self.height.load(Ordering::Acquire);
        while candidate > observed {
            match self.height.compare_exchange_weak(
                observed,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => observed = current,
            }
        }
    }

    fn lock_value(self: &Arc<Self>) -> ValueGuard<V> {
        self.value.lock_arc()
    }

    pub(crate) fn set_value(&self, value: V) {
        *self.value.lock() = Some(value);
    }

    pub(crate) fn take_value(&self) -> Option<V> {
        self.value.lock().take()
    }

    pub(crate) fn with_value<R>(&self, read: impl FnOnce(Option<&V>) -> R) -> R {
        let guard = self.value.lock();
        read(guard.as_ref())
    }
}

/// A node whose value mutex is held by the current caller.
///
/// Returned by the foreground tree's lookup operations; the lock is released
/// when the guard is dropped. While held, no other traversal can pass through
/// or link children onto this node.
pub struct LockedNode<V> {
    node: NodeRef<V>,
    guard: ValueGuard<V>,
}

impl<V> LockedNode<V> {
    /// Blocks until the node's mutex is acquired.
    pub(crate) fn acquire(node: NodeRef<V>) -> Self {
        let guard = node.lock_value();
        Self { node, guard }
    }

    /// The node's key.
    pub fn key(&self) -> &str {
        self.node.key()
    }

    /// The current value, if one has been written.
    pub fn value(&self) -> Option<&V> {
        (*self.guard).as_ref()
    }

    /// Writes a new value, returning the previous one.
    pub fn replace(&mut self, value: V) -> Option<V> {
        (*self.guard).replace(value)
    }

    pub(crate) fn node(&self) -> &NodeRef<V> {
        &self.node
    }
}

/// Appends the subtree's keys to `keys` in order.
///
/// Callers must guarantee quiescence; child links are read without honoring
/// the traversal locking protocol.
pub(crate) fn collect_keys<V>(link: Option<&NodeRef<V>>, keys: &mut Vec<String>) {
    if let Some(node) = link {
        collect_keys(node.child(Branch::Left).as_ref(), keys);
        keys.push(node.key().to_string());
        collect_keys(node.child(Branch::Right).as_ref(), keys);
    }
}

/// Recomputes subtree heights bottom-up and counts stored heights that
/// disagree. Returns `(true_height, mismatches)`.
pub(crate) fn audit_heights<V>(link: Option<&NodeRef<V>>) -> (i32, usize) {
    let Some(node) = link else {
        return (-1, 0);
    };
    let (left, left_bad) = audit_heights(node.child(Branch::Left).as_ref());
    let (right, right_bad) = audit_heights(node.child(Branch::Right).as_ref());
    let expected = 1 + left.max(right);
    let bad = usize::from(node.height() != expected);
    (expected, left_bad + right_bad + bad)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_leaf() {
        let node: NodeRef<u32> = Node::new("a");
        assert_eq!(node.key(), "a");
        assert_eq!(node.height(), 0);
        assert_eq!(node.balance_factor(), 0);
        assert!(node.with_value(|value| value.is_none()));
    }

    #[test]
    fn test_height_of_missing_link() {
        assert_eq!(Node::<u32>::height_of(None), -1);
    }

    #[test]
    fn test_refresh_height_raises() {
        let parent: NodeRef<u32> = Node::new("m");
        parent.set_child(Branch::Left, Some(Node::new("a")));
        parent.refresh_height();
        assert_eq!(parent.height(), 1);
        assert_eq!(parent.balance_factor(), 1);
    }

    #[test]
    fn test_refresh_height_never_lowers() {
        let parent: NodeRef<u32> = Node::new("m");
        parent.set_child(Branch::Left, Some(Node::new("a")));
        parent.refresh_height();
        assert_eq!(parent.height(), 1);

        // Detaching the child leaves the stored height untouched.
        parent.take_child(Branch::Left);
        parent.refresh_height();
        assert_eq!(parent.height(), 1);
    }

    #[test]
    fn test_recompute_height_is_exact() {
        let parent: NodeRef<u32> = Node::new("m");
        parent.set_child(Branch::Left, Some(Node::new("a")));
        parent.recompute_height();
        assert_eq!(parent.height(), 1);

        parent.take_child(Branch::Left);
        parent.recompute_height();
        assert_eq!(parent.height(), 0);
    }

    #[test]
    fn test_locked_node_replace() {
        let node: NodeRef<u32> = Node::new("k");
        let mut locked = LockedNode::acquire(Arc::clone(&node));
        assert!(locked.value().is_none());
        assert_eq!(locked.replace(7), None);
        assert_eq!(locked.replace(9), Some(7));
        drop(locked);
        assert!(node.with_value(|value| value == Some(&9)));
    }

    #[test]
    fn test_collect_keys_in_order() {
        let root: NodeRef<u32> = Node::new("m");
        root.set_child(Branch::Left, Some(Node::new("a")));
        root.set_child(Branch::Right, Some(Node::new("z")));
        let mut keys = Vec::new();
        collect_keys(Some(&root), &mut keys);
        assert_eq!(keys, ["a", "m", "z"]);
    }
}
