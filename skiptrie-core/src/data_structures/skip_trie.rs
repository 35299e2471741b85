use std::sync::atomic::{AtomicUsize, Ordering};

use crate::data_structures::node::{Node, MAX_HEIGHT};
use crate::data_structures::skip_list::TruncatedSkipList;
use crate::data_structures::x_fast_trie::XFastTrie;

/// A concurrent ordered set of `u32` keys with O(log log u) expected
/// predecessor queries.
///
/// The truncated skip list is the membership source of truth; nodes whose
/// sampled tower reaches [`MAX_HEIGHT`] are additionally indexed by the
/// x-fast trie, whose prefix table narrows predecessor queries to a
/// top-level neighbourhood before the skip list finishes the search.
///
/// All methods traverse shared nodes and hand out raw pointers: callers
/// that share a `SkipTrie` across threads must hold an epoch guard for the
/// duration of each call and retire the node returned by
/// [`SkipTrie::remove_internal`] through that guard. The
/// `skiptrie-crossbeam` crate provides the safe wrapper.
pub struct SkipTrie {
    list: TruncatedSkipList,
    trie: XFastTrie,
    count: AtomicUsize,
}

impl SkipTrie {
    pub fn new() -> Self {
        SkipTrie {
            list: TruncatedSkipList::new(),
            trie: XFastTrie::new(),
            count: AtomicUsize::new(0),
        }
    }

    /// Insert `key`. Returns the new node, or `None` when the key is
    /// already present.
    ///
    /// Linearizes at the level-0 CAS inside the list insert. Full-height
    /// nodes are promoted into the trie after their tower is complete.
    pub fn insert_internal(&self, key: u32) -> Option<*mut Node> {
        let node = self.list.insert(key)?;
        self.count.fetch_add(1, Ordering::AcqRel);

        unsafe {
            if (*node).height() == MAX_HEIGHT {
                self.trie.insert_node(node);
            }
        }

        Some(node)
    }

    /// Remove `key`. Returns the unlinked node for the caller to retire,
    /// or `None` when the key is absent or another thread won the mark.
    ///
    /// Linearizes at the mark CAS inside the list delete.
    pub fn remove_internal(&self, key: u32) -> Option<*mut Node> {
        let start = self.predecessor_internal(key).unwrap_or_else(|| self.list.head());
        let node = self.list.find(key, start)?;

        if !self.list.delete(node) {
            return None;
        }
        self.count.fetch_sub(1, Ordering::AcqRel);

        unsafe {
            if (*node).height() == MAX_HEIGHT {
                self.trie.remove_node(node, &self.list);
            }
        }

        Some(node)
    }

    /// Whether `key` is a live member.
    ///
    /// Resolves the predecessor, then re-scans forward on level 0 from the
    /// predecessor's current successor, so an insert that published its
    /// level-0 link after the predecessor search is still observed.
    pub fn contains_internal(&self, key: u32) -> bool {
        let start = self.predecessor_internal(key).unwrap_or_else(|| self.list.head());
        self.list.find(key, start).is_some()
    }

    /// The live node with the largest key strictly below `key`, or `None`.
    ///
    /// Trie binary search lands near the key on the top level; the
    /// backward walk finds the top-level strict predecessor; the skip list
    /// descent sharpens it to the exact answer. Every degraded path
    /// (stale trie slot, abandoned prev, hop budget) collapses to a clean
    /// head-to-bottom rescan.
    pub fn predecessor_internal(&self, key: u32) -> Option<*mut Node> {
        let ancestor = self.trie.lowest_ancestor(key, self.list.head());
        let start = self.list.back_walk(ancestor, key);
        let mut pred = self.list.strict_pred_from(key, start);

        unsafe {
            if pred != self.list.head() && (*pred).is_marked() {
                // A bounded-out search handed back a stale bracket
                pred = self.list.strict_pred_from(key, self.list.head());
            }
        }

        if pred == self.list.head() {
            None
        } else {
            Some(pred)
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of prefixes currently held by the trie index.
    pub fn prefix_count(&self) -> usize {
        self.trie.len()
    }

    pub(crate) fn list(&self) -> &TruncatedSkipList {
        &self.list
    }

    pub(crate) fn trie(&self) -> &XFastTrie {
        &self.trie
    }
}

impl Default for SkipTrie {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: composed of Send + Sync parts; raw node pointers are only
// dereferenced under the caller's guard
unsafe impl Send for SkipTrie {}
unsafe impl Sync for SkipTrie {}
