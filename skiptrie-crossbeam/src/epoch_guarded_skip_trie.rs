use crossbeam_epoch::{self as epoch, Guard};
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr;

use skiptrie_core::{Node, SkipTrie};

/// The concurrent `u32` set, with epoch-based memory reclamation layered
/// over the lock-free core.
///
/// # Design
///
/// ```text
/// User code
///    ↓ calls
/// EpochGuardedSkipTrie (this)   ← pins a guard per operation,
///    ↓ wraps                      retires removed nodes
/// SkipTrie                      ← lock-free algorithm on raw pointers
/// ```
///
/// Every operation pins an epoch guard before touching shared nodes, so a
/// node retired by a concurrent delete stays allocated until all pinned
/// readers have moved on. `delete` hands the unlinked node to
/// `defer_unchecked`; `predecessor` returns a [`PredecessorRef`] that
/// keeps its own pin alive for as long as the caller holds the result.
///
/// All operations are linearizable: insert at its level-0 publish CAS,
/// delete at its mark CAS, contains and predecessor at the atomic read
/// that witnesses their answer.
pub struct EpochGuardedSkipTrie {
    inner: ManuallyDrop<SkipTrie>,
}

/// The result of [`EpochGuardedSkipTrie::predecessor`]: the predecessor's
/// key, borrowed straight out of its skip-list node, bundled with the
/// epoch pin that keeps that node allocated.
///
/// Returning a bare `&u32` would be unsound — the guard pinned inside
/// `predecessor` would be released on return while the borrow still
/// pointed into a node a concurrent `delete` may retire. Carrying the
/// guard in the result ties the borrow's lifetime to the pin: while the
/// caller holds a `PredecessorRef`, the predecessor node can be marked and
/// unlinked but not reclaimed. Dropping it unpins the epoch.
pub struct PredecessorRef<'g> {
    _guard: Guard,
    key: &'g u32,
}

impl PredecessorRef<'_> {
    /// The predecessor key.
    pub fn key(&self) -> u32 {
        *self.key
    }
}

impl Deref for PredecessorRef<'_> {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        self.key
    }
}

impl EpochGuardedSkipTrie {
    /// Create an empty set.
    pub fn new() -> Self {
        EpochGuardedSkipTrie {
            inner: ManuallyDrop::new(SkipTrie::new()),
        }
    }

    /// Insert `key`. Returns true if the key was added, false if it was
    /// already present.
    pub fn insert(&self, key: u32) -> bool {
        // The insert traverses existing nodes that a concurrent delete may
        // retire, so the guard is required even though nothing is freed here
        let _guard = epoch::pin();
        self.inner.insert_internal(key).is_some()
    }

    /// Whether `key` is currently a member.
    pub fn contains(&self, key: u32) -> bool {
        let _guard = epoch::pin();
        self.inner.contains_internal(key)
    }

    /// Delete `key`. Returns true if this call removed it.
    ///
    /// The unlinked node is retired through the guard and freed once every
    /// thread pinned at retirement time has unpinned.
    pub fn delete(&self, key: u32) -> bool {
        let guard = epoch::pin();
        match self.inner.remove_internal(key) {
            Some(node) => {
                unsafe {
                    guard.defer_unchecked(move || {
                        Node::dealloc_ptr(node);
                    });
                }
                true
            }
            None => false,
        }
    }

    /// The largest live key strictly below `key`, or `None`.
    ///
    /// The result stays readable for as long as it is held: it carries the
    /// epoch pin that blocks reclamation of the predecessor node.
    pub fn predecessor(&self, key: u32) -> Option<PredecessorRef<'_>> {
        let guard = epoch::pin();
        let node = self.inner.predecessor_internal(key)?;

        // Safety: the node was reachable under `guard`, and the bundle
        // keeps `guard` pinned for the borrow's whole lifetime
        let key_ptr = unsafe { (*node).key_ref() as *const u32 };
        let key_ref = unsafe { &*key_ptr };
        Some(PredecessorRef {
            _guard: guard,
            key: key_ref,
        })
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for EpochGuardedSkipTrie {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for EpochGuardedSkipTrie {}
unsafe impl Sync for EpochGuardedSkipTrie {}

impl Drop for EpochGuardedSkipTrie {
    fn drop(&mut self) {
        let guard = epoch::pin();

        // Safety: we are in Drop and own the value; `inner` is not touched
        // again afterwards
        let inner = unsafe { ptr::read(&*self.inner) };

        // Readers from this epoch may still hold nodes, so the whole tree
        // rides out through the same deferral as individual deletes
        unsafe {
            guard.defer_unchecked(move || {
                drop(inner);
            });
        }
    }
}
