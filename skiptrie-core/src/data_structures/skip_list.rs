use std::ptr;
use std::thread;

use crate::data_structures::node::{Node, MAX_HEIGHT};

// =============================================================================
// TRUNCATED SKIP LIST
// =============================================================================
//
// A lock-free skip list capped at MAX_HEIGHT levels. Nodes that reach the
// cap additionally maintain a backward `prev` pointer on the top level,
// forming a repairable doubly-linked list that predecessor queries walk.
//
// Level 4:  HEAD ──────────────────────────────► 30 ────────────────► TAIL
//             │                                 ◄─┘ (prev)             │
// Level 3:  HEAD ─────────► 10 ───────────────► 30 ────────────────► TAIL
// Level 2:  HEAD ─────────► 10 ──────► 20 ────► 30 ────────────────► TAIL
// Level 1:  HEAD ─────────► 10 ──────► 20 ────► 30 ────────────────► TAIL
// Level 0:  HEAD ─────────► 10 ──────► 20 ────► 30 ───────► 40 ────► TAIL
//
// INVARIANTS:
// 1. Every level is sorted strictly ascending between the sentinels
// 2. The node set at level L is a subset of the node set at level L-1
// 3. `marked` flips false -> true once; marked nodes are invisible to
//    membership but stay traversable until cooperatively unlinked
// 4. The sentinels are never marked or removed
// 5. A retired top-level node is erased from every live `prev` pointer
//    before its memory may be reclaimed
//
// Every retry loop carries an iteration budget. Hitting the budget returns
// a best-effort result; callers revalidate via CAS on use and later
// operations repair any residue.
// =============================================================================

/// Iteration budget for a single `list_search` call.
const SEARCH_BOUND: usize = 1000;
/// Searches past this many iterations start yielding to break livelock.
const SEARCH_YIELD_AFTER: usize = 100;
/// Retry budget for `fix_prev`.
const FIX_PREV_BOUND: usize = 100;
/// Fix-prev retries past this threshold yield.
const FIX_PREV_YIELD_AFTER: usize = 10;
/// Hop budget for the backward walk on the top level.
const BACK_WALK_BOUND: usize = 1000;

/// Lock-free skip list truncated at [`MAX_HEIGHT`] levels.
///
/// The head sentinel carries key 0 and the tail sentinel key `u32::MAX`;
/// both are distinguished from real nodes by pointer identity, which keeps
/// key 0 insertable. `u32::MAX` itself is shadowed by the tail and reports
/// "already present" on insert.
pub struct TruncatedSkipList {
    head: *mut Node,
    tail: *mut Node,
}

impl TruncatedSkipList {
    pub fn new() -> Self {
        let head = Node::alloc_sentinel(0);
        let tail = Node::alloc_sentinel(u32::MAX);
        unsafe {
            for level in 0..MAX_HEIGHT {
                (*head).set_next(level, tail);
            }
            (*tail).set_prev(head);
        }
        TruncatedSkipList { head, tail }
    }

    #[inline]
    pub fn head(&self) -> *mut Node {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> *mut Node {
        self.tail
    }

    #[inline]
    pub fn is_sentinel(&self, node: *mut Node) -> bool {
        node == self.head || node == self.tail
    }

    /// Sample a tower height: geometric with p = 0.5, clamped to the cap.
    ///
    /// A single random word replaces the coin-flip loop: each trailing one
    /// bit is one successful flip.
    #[inline]
    fn random_height() -> usize {
        let random_bits = fastrand::u32(..);
        (1 + (!random_bits).trailing_zeros() as usize).min(MAX_HEIGHT)
    }

    /// Locate the (left, right) bracket for `key` on `level`, starting the
    /// walk at `start`.
    ///
    /// Marked successors encountered on the way are cooperatively unlinked
    /// via CAS. On return `right` was unmarked and `left.next[level] ==
    /// right` held at some point during the call — except after the
    /// iteration budget runs out, where the best-known bracket is returned
    /// and the caller's CAS revalidates it.
    pub fn list_search(&self, key: u32, start: *mut Node, level: usize) -> (*mut Node, *mut Node) {
        let mut left = start;
        let mut right = ptr::null_mut();
        let mut iterations = 0;

        while iterations < SEARCH_BOUND {
            iterations += 1;
            left = start;

            unsafe {
                right = (*left).next(level);

                // Unlink marked nodes sitting right after `left`
                while !right.is_null() && (*right).is_marked() {
                    let next_right = (*right).next(level);
                    if (*left).cas_next(level, right, next_right).is_ok() {
                        right = next_right;
                    } else {
                        break;
                    }
                }

                // Advance toward the key
                while !right.is_null() && (*right).key() < key && !(*right).is_marked() {
                    left = right;
                    right = (*left).next(level);

                    while !right.is_null() && (*right).is_marked() {
                        let next_right = (*right).next(level);
                        if (*left).cas_next(level, right, next_right).is_ok() {
                            right = next_right;
                        } else {
                            break;
                        }
                    }
                }

                // Validate the bracket before handing it out
                if (right.is_null() || !(*right).is_marked())
                    && (*left).next(level) == right
                    && !(*left).is_marked()
                {
                    return (left, right);
                }
            }

            if iterations > SEARCH_YIELD_AFTER {
                thread::yield_now();
            }
        }

        // Budget exhausted: hand back what we have rather than spin
        (left, right)
    }

    /// Insert `key`, returning the new node, or `None` when an unmarked
    /// node with the same key is already present.
    ///
    /// The tower is linked bottom-up; the level-0 CAS is the linearization
    /// point. A concurrent deleter that wins the race mid-build sets the
    /// node's `stop` flag, upon which promotion is abandoned and the links
    /// already published are left for the deleter to retire.
    pub fn insert(&self, key: u32) -> Option<*mut Node> {
        let height = Self::random_height();

        let mut preds: [*mut Node; MAX_HEIGHT] = [ptr::null_mut(); MAX_HEIGHT];
        let mut succs: [*mut Node; MAX_HEIGHT] = [ptr::null_mut(); MAX_HEIGHT];

        // Bracket every level top-down, threading each left hand down as
        // the next level's starting point
        let mut start = self.head;
        for level in (0..MAX_HEIGHT).rev() {
            let (left, right) = self.list_search(key, start, level);
            if level < height {
                unsafe {
                    if !right.is_null() && (*right).key() == key && !(*right).is_marked() {
                        return None;
                    }
                }
                preds[level] = left;
                succs[level] = right;
            }
            start = left;
        }

        let node = Node::alloc(key, height);

        for level in 0..height {
            loop {
                unsafe {
                    if (*node).is_stopped() {
                        // A deleter claimed the half-built tower; whatever
                        // is linked so far is theirs to unlink
                        return Some(node);
                    }

                    (*node).set_next(level, succs[level]);
                    if (*preds[level]).cas_next(level, succs[level], node).is_ok() {
                        break;
                    }

                    let (left, right) = self.list_search(key, preds[level], level);
                    if level == 0
                        && !right.is_null()
                        && (*right).key() == key
                        && !(*right).is_marked()
                    {
                        // Lost the level-0 race to a concurrent insert of
                        // the same key
                        Node::dealloc_ptr(node);
                        return None;
                    }
                    preds[level] = left;
                    succs[level] = right;
                }
            }
        }

        if height == MAX_HEIGHT {
            self.fix_prev(preds[MAX_HEIGHT - 1], node);
        }

        Some(node)
    }

    /// Install the top-level `prev` pointer of a freshly promoted node.
    ///
    /// Bounded: after the retry budget the node is forced ready without a
    /// prev and backward walkers fall back to a head rescan.
    pub fn fix_prev(&self, mut pred: *mut Node, node: *mut Node) {
        let mut retries = 0;

        unsafe {
            while !(*node).is_marked() && retries < FIX_PREV_BOUND {
                let (left, right) = self.list_search((*node).key(), pred, MAX_HEIGHT - 1);
                if right == node {
                    (*node).set_prev(left);
                    if (*left).is_marked() {
                        // The deleter of `left` may already have run its
                        // repair scan past us; the head is always safe
                        (*node).set_prev(self.head);
                    }
                    (*node).set_ready();
                    return;
                }
                pred = left;
                retries += 1;
                if retries > FIX_PREV_YIELD_AFTER {
                    thread::yield_now();
                }
            }

            (*node).set_ready();
        }
    }

    /// Logically delete `node`, then physically unlink it top-down.
    ///
    /// Returns false when another thread already owns the deletion. The
    /// mark CAS is the linearization point. For a top-level node, the
    /// moment it leaves the top level its `back` escape pointer is
    /// installed and every live `prev` still naming it is repaired, so the
    /// node can be retired once the caller's epoch ends.
    pub fn delete(&self, node: *mut Node) -> bool {
        unsafe {
            if !(*node).try_mark() {
                return false;
            }
            (*node).set_stop();

            let key = (*node).key();
            let height = (*node).height();

            for level in (0..height).rev() {
                loop {
                    let (left, right) = self.list_search(key, self.head, level);
                    if right != node {
                        // Already off this level (usually by the search's
                        // own cooperative unlinking)
                        break;
                    }
                    let next = (*node).next(level);
                    if (*left).cas_next(level, node, next).is_ok() {
                        break;
                    }
                }

                if height == MAX_HEIGHT && level == MAX_HEIGHT - 1 {
                    let (left, _right) = self.top_neighbors(key);
                    (*node).set_back(left);
                    self.repair_top_prev(node, left);
                }
            }

            true
        }
    }

    /// Top-level (left, right) neighbours of `key`.
    #[inline]
    pub fn top_neighbors(&self, key: u32) -> (*mut Node, *mut Node) {
        self.list_search(key, self.head, MAX_HEIGHT - 1)
    }

    /// Erase `node` from every live `prev` on the top level.
    ///
    /// The original design leaves stale prev pointers for the collector to
    /// keep alive; with deferred reclamation the deleter must scrub them
    /// before the node is retired.
    fn repair_top_prev(&self, node: *mut Node, left: *mut Node) {
        unsafe {
            let mut curr = self.head;
            let mut steps = 0;
            loop {
                let _ = (*curr).cas_prev(node, left);
                if curr == self.tail || steps >= SEARCH_BOUND {
                    break;
                }
                let next = (*curr).next(MAX_HEIGHT - 1);
                if next.is_null() {
                    break;
                }
                curr = next;
                steps += 1;
            }
            let _ = (*self.tail).cas_prev(node, left);
        }
    }

    /// Walk backward from `curr` along the top level until reaching a live
    /// node with key strictly below `key`.
    ///
    /// Marked nodes are escaped through `back`; unmarked ones through
    /// `prev` once `ready`. Any dead end (missing pointer, hop budget)
    /// resolves to the head sentinel, which degrades the caller to a full
    /// rescan but never blocks.
    pub fn back_walk(&self, mut curr: *mut Node, key: u32) -> *mut Node {
        let mut steps = 0;
        unsafe {
            while curr != self.head {
                if curr != self.tail && !(*curr).is_marked() && (*curr).key() < key {
                    return curr;
                }

                let hop = if (*curr).is_marked() {
                    (*curr).back()
                } else if (*curr).is_ready() {
                    (*curr).prev()
                } else {
                    ptr::null_mut()
                };

                if hop.is_null() {
                    return self.head;
                }
                curr = hop;

                steps += 1;
                if steps > BACK_WALK_BOUND {
                    return self.head;
                }
            }
        }
        self.head
    }

    /// Strict predecessor of `key` reachable from `start`, which must sit
    /// on the top level (a trie leaf, a back-walk result, or the head).
    ///
    /// Descends level by level, carrying the left bracket down. Returns the
    /// head sentinel when no smaller key exists.
    pub fn strict_pred_from(&self, key: u32, start: *mut Node) -> *mut Node {
        let mut left = start;
        for level in (0..MAX_HEIGHT).rev() {
            let (l, _r) = self.list_search(key, left, level);
            left = l;
        }
        left
    }

    /// Find the live node with exactly `key` by scanning level 0 forward
    /// from `start` (typically the strict predecessor).
    ///
    /// The scan re-reads `start.next[0]`, so a key whose level-0 link was
    /// published after the predecessor search is still observed.
    pub fn find(&self, key: u32, start: *mut Node) -> Option<*mut Node> {
        unsafe {
            let mut curr = (*start).next(0);
            while !curr.is_null() && curr != self.tail {
                if (*curr).is_marked() {
                    curr = (*curr).next(0);
                    continue;
                }
                if (*curr).key() >= key {
                    return if (*curr).key() == key { Some(curr) } else { None };
                }
                curr = (*curr).next(0);
            }
            None
        }
    }
}

impl Default for TruncatedSkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TruncatedSkipList {
    fn drop(&mut self) {
        unsafe {
            // Every linked node is on level 0; unlinked nodes were handed
            // to the caller for retirement when they were removed
            let mut curr = (*self.head).next(0);
            while !curr.is_null() && curr != self.tail {
                let next = (*curr).next(0);
                Node::dealloc_ptr(curr);
                curr = next;
            }
            Node::dealloc_ptr(self.head);
            Node::dealloc_ptr(self.tail);
        }
    }
}

// Safety: all shared state is behind atomics; node lifetime is managed by
// the owning wrapper's reclamation scheme
unsafe impl Send for TruncatedSkipList {}
unsafe impl Sync for TruncatedSkipList {}
