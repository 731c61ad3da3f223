//! Lock-free allocation registry.
//!
//! The registry is a singly-linked chain of nodes running from `head` to
//! `tail`. Producers append at the tail with a compare-and-swap on the
//! successor pointer of the node they observed as last; nothing is ever
//! inserted anywhere else. Boundary nodes carry no payload and split the
//! chain into epochs:
//!
//! ```text
//!  head                                              tail
//!   |                                                  |
//!  [B] -> [D] -> [D] -> [B] -> [D] -> [D] -> [D] -> [B] -> [D] -> [D]
//!   `---- closed span ---'      `---- closed span ---'  `-- open --'
//! ```
//!
//! Once a boundary has been linked every later append lands after it, so the
//! data nodes between two boundaries form a closed set that a single collector
//! can inspect and unlink while producers keep appending past the newest
//! boundary.
//!
//! Unlinked nodes are handed to `crossbeam-epoch` and freed once every thread
//! that could still be reading them has unpinned.

use core_types::{HeapError, NodeKind};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use std::fmt;
use std::sync::atomic::Ordering;

enum Payload<T> {
    Boundary,
    Data(T),
}

/// A registry node: either a boundary or a data node owning one payload.
pub struct Node<T> {
    payload: Payload<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn boundary() -> Self {
        Node {
            payload: Payload::Boundary,
            next: Atomic::null(),
        }
    }

    fn data(datum: T) -> Self {
        Node {
            payload: Payload::Data(datum),
            next: Atomic::null(),
        }
    }

    /// Returns the kind of this node.
    pub fn kind(&self) -> NodeKind {
        match self.payload {
            Payload::Boundary => NodeKind::Boundary,
            Payload::Data(_) => NodeKind::Data,
        }
    }

    /// Returns true if this node is a boundary.
    pub fn is_boundary(&self) -> bool {
        matches!(self.payload, Payload::Boundary)
    }

    /// Returns the payload of a data node.
    ///
    /// Calling this on a boundary node is a contract violation and yields
    /// [`HeapError::WrongNodeKind`].
    pub fn datum(&self) -> Result<&T, HeapError> {
        match &self.payload {
            Payload::Data(datum) => Ok(datum),
            Payload::Boundary => Err(HeapError::WrongNodeKind {
                expected: NodeKind::Data,
                found: NodeKind::Boundary,
            }),
        }
    }

    /// Returns the successor of this node, if any.
    pub fn next<'g>(&'g self, guard: &'g Guard) -> Option<&'g Node<T>> {
        let next = self.next.load(Ordering::Acquire, guard);
        // SAFETY: nodes reachable through the chain are only destroyed through
        // `defer_destroy`, so they stay valid while `guard` is pinned.
        unsafe { next.as_ref() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Boundary => f.write_str("Boundary"),
            Payload::Data(datum) => f.debug_tuple("Data").field(datum).finish(),
        }
    }
}

/// Boundary-segmented lock-free singly-linked list.
///
/// Appends (`push_back`, `push_back_boundary`) are lock-free and may run from
/// any number of threads. Removals (`remove_successor`, `remove_head`) are
/// `unsafe`: they must be serialized by the caller. They never remove the last
/// node, and they move a lagging tail past whatever they unlink.
///
/// # Examples
///
/// ```
/// use crossbeam_epoch as epoch;
/// use memory_manager::Registry;
///
/// let registry = Registry::new();
/// let guard = epoch::pin();
///
/// let first = registry.push_back_boundary(&guard);
/// registry.push_back(1, &guard);
/// registry.push_back(2, &guard);
/// let second = registry.push_back_boundary(&guard);
///
/// let data: Vec<i32> = registry
///     .span(first, second, &guard)
///     .filter_map(|node| node.datum().ok().copied())
///     .collect();
/// assert_eq!(data, vec![1, 2]);
/// ```
pub struct Registry<T> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
}

impl<T> Registry<T> {
    /// Creates a registry holding a single sentinel boundary (`head == tail`).
    pub fn new() -> Self {
        // SAFETY: the sentinel is not shared with any other thread yet.
        let sentinel = Owned::new(Node::boundary()).into_shared(unsafe { epoch::unprotected() });
        Registry {
            head: Atomic::from(sentinel),
            tail: Atomic::from(sentinel),
        }
    }

    /// Appends a boundary node and returns it.
    pub fn push_back_boundary<'g>(&'g self, guard: &'g Guard) -> &'g Node<T> {
        self.append(Node::boundary(), guard)
    }

    /// Appends a data node carrying `datum` and returns it.
    pub fn push_back<'g>(&'g self, datum: T, guard: &'g Guard) -> &'g Node<T> {
        self.append(Node::data(datum), guard)
    }

    fn append<'g>(&'g self, node: Node<T>, guard: &'g Guard) -> &'g Node<T> {
        let new = Owned::new(node).into_shared(guard);
        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // SAFETY: `tail` is never null and never unlinked while it is the
            // last node; stale values stay readable while pinned.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            if !next.is_null() {
                // Lagging tail: help it forward, then retry from the new tail.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            if tail_ref
                .next
                .compare_exchange(
                    Shared::null(),
                    new,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                )
                .is_ok()
            {
                // Best effort: a failure means another thread already helped.
                let _ = self.tail.compare_exchange(
                    tail,
                    new,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                // SAFETY: `new` was just linked and is protected by `guard`.
                return unsafe { new.deref() };
            }
        }
    }

    /// Returns the first node of the chain.
    pub fn head<'g>(&'g self, guard: &'g Guard) -> &'g Node<T> {
        // SAFETY: head is never null and retired heads are deferred.
        unsafe { self.head.load(Ordering::Acquire, guard).deref() }
    }

    /// Returns the node the shared tail reference currently points at.
    ///
    /// The tail may lag behind the true end of the chain by a few nodes.
    pub fn tail<'g>(&'g self, guard: &'g Guard) -> &'g Node<T> {
        // SAFETY: tail is never null and is never unlinked.
        unsafe { self.tail.load(Ordering::Acquire, guard).deref() }
    }

    /// Returns true if the chain has been drained down to a single node.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head(&guard).next(&guard).is_none()
    }

    /// Helps the shared tail forward until it reaches a node with no
    /// successor.
    ///
    /// The tail never moves backwards, so afterwards it lies beyond every
    /// node that had a successor when this was called.
    fn settle_tail(&self, guard: &Guard) {
        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // SAFETY: the tail is never null and is never unlinked.
            let next = unsafe { tail.deref() }.next.load(Ordering::Acquire, guard);
            if next.is_null() {
                return;
            }
            let _ = self.tail.compare_exchange(
                tail,
                next,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            );
        }
    }

    /// Unlinks the node immediately following `node`.
    ///
    /// Returns false if `node` has no successor or if its successor is the
    /// last node of the chain, which is never removed. A shared tail that
    /// still points at or before the removed node is moved past it first.
    ///
    /// # Safety
    ///
    /// `node` must belong to this registry and must still be linked. Calls to
    /// `remove_successor` and [`remove_head`](Self::remove_head) must not run
    /// concurrently with each other.
    pub unsafe fn remove_successor(&self, node: &Node<T>, guard: &Guard) -> bool {
        let victim = node.next.load(Ordering::Acquire, guard);
        let Some(victim_ref) = victim.as_ref() else {
            return false;
        };
        let after = victim_ref.next.load(Ordering::Acquire, guard);
        if after.is_null() {
            return false;
        }
        // Producers only link after a node with no successor, so neither
        // `node` nor `victim` can gain a new one. The tail is the only other
        // reference that can still reach `victim`.
        self.settle_tail(guard);
        node.next.store(after, Ordering::Release);
        guard.defer_destroy(victim);
        true
    }

    /// Advances `head` past the first node.
    ///
    /// Returns false when the chain holds a single node and nothing was
    /// removed.
    ///
    /// # Safety
    ///
    /// Same contract as [`remove_successor`](Self::remove_successor).
    pub unsafe fn remove_head(&self, guard: &Guard) -> bool {
        let head = self.head.load(Ordering::Acquire, guard);
        let next = head.deref().next.load(Ordering::Acquire, guard);
        if next.is_null() {
            return false;
        }
        self.settle_tail(guard);
        self.head.store(next, Ordering::Release);
        guard.defer_destroy(head);
        true
    }

    /// Iterates from `head` to the current end of the chain.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            current: Some(self.head(guard)),
            stop: None,
            guard,
        }
    }

    /// Iterates over the nodes strictly between `from` and `to`.
    ///
    /// If `to` is never reached the walk ends at the end of the chain.
    pub fn span<'g>(&'g self, from: &'g Node<T>, to: &'g Node<T>, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            current: from.next(guard),
            stop: Some(to),
            guard,
        }
    }

    /// Returns the number of nodes currently in the chain.
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        self.iter(&guard).count()
    }

    /// Returns the number of data nodes currently in the chain.
    pub fn data_len(&self) -> usize {
        let guard = epoch::pin();
        self.iter(&guard).filter(|node| !node.is_boundary()).count()
    }

    /// Returns the number of boundary nodes currently in the chain.
    pub fn boundary_len(&self) -> usize {
        let guard = epoch::pin();
        self.iter(&guard).filter(|node| node.is_boundary()).count()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Registry<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can reach the chain.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let next = current.deref().next.load(Ordering::Relaxed, guard);
                drop(current.into_owned());
                current = next;
            }
        }
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("boundaries", &self.boundary_len())
            .finish()
    }
}

/// Iterator over registry nodes.
pub struct Iter<'g, T> {
    current: Option<&'g Node<T>>,
    stop: Option<&'g Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g Node<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        if let Some(stop) = self.stop {
            if std::ptr::eq(node, stop) {
                self.current = None;
                return None;
            }
        }
        self.current = node.next(self.guard);
        Some(node)
    }
}
