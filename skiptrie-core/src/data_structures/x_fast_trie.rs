use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::data_structures::node::Node;
use crate::data_structures::prefix::Prefix;
use crate::data_structures::skip_list::TruncatedSkipList;

/// One trie record: the two descendant pointers below a prefix.
///
/// Slot 0 tracks the largest top-level key in the 0-subtree, slot 1 the
/// smallest in the 1-subtree. Slots are a best-effort cache over the skip
/// list; every read is validated against the referenced node before use.
pub struct TrieNode {
    pointers: [AtomicPtr<Node>; 2],
}

impl TrieNode {
    fn new() -> Self {
        TrieNode {
            pointers: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
        }
    }

    #[inline]
    pub fn load(&self, direction: usize) -> *mut Node {
        self.pointers[direction].load(Ordering::Acquire)
    }

    #[inline]
    fn cas(
        &self,
        direction: usize,
        expected: *mut Node,
        new: *mut Node,
    ) -> Result<*mut Node, *mut Node> {
        self.pointers[direction].compare_exchange(
            expected,
            new,
            Ordering::Release,
            Ordering::Relaxed,
        )
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.load(0).is_null() && self.load(1).is_null()
    }
}

/// The x-fast trie index over top-level skip-list nodes.
///
/// A concurrent map from every binary prefix of every top-level key to its
/// descendant pair. The skip list remains the source of truth; the trie
/// only accelerates predecessor queries and is lazily repaired by the
/// inserts and deletes that pass through each prefix.
pub struct XFastTrie {
    pub(crate) prefixes: SkipMap<Prefix, TrieNode>,
}

impl XFastTrie {
    pub fn new() -> Self {
        XFastTrie {
            prefixes: SkipMap::new(),
        }
    }

    /// Number of prefixes currently indexed.
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Register a freshly promoted top-level node under each of its 32
    /// ancestor prefixes.
    ///
    /// A slot is only swung when the node tightens it (larger key in a
    /// 0-subtree, smaller in a 1-subtree). The walk aborts as soon as the
    /// node is marked; the concurrent deleter owns the cleanup from there.
    pub fn insert_node(&self, node: *mut Node) {
        let key = unsafe { (*node).key() };

        for len in 1..=32 {
            let prefix = Prefix::of(key, len);
            let direction = Prefix::next_bit(key, len);

            loop {
                if unsafe { (*node).is_marked() } {
                    return;
                }

                let entry = self.prefixes.get_or_insert(prefix, TrieNode::new());
                let record = entry.value();

                let curr = record.load(direction);
                if curr.is_null() {
                    if record.cas(direction, ptr::null_mut(), node).is_ok() {
                        break;
                    }
                    continue;
                }

                let curr_key = unsafe { (*curr).key() };
                if direction == 0 && curr_key >= key {
                    break;
                }
                if direction == 1 && curr_key <= key {
                    break;
                }

                if record.cas(direction, curr, node).is_ok() {
                    break;
                }
            }
        }
    }

    /// Remove every reference to a deleted top-level node, replacing each
    /// occupied slot with the node's current top-level neighbour when that
    /// neighbour still lies under the prefix, and nil otherwise. Entries
    /// whose both slots drain to nil are dropped from the map.
    pub fn remove_node(&self, node: *mut Node, list: &TruncatedSkipList) {
        let key = unsafe { (*node).key() };

        for len in 1..=32 {
            let prefix = Prefix::of(key, len);
            let direction = Prefix::next_bit(key, len);

            let entry = match self.prefixes.get(&prefix) {
                Some(entry) => entry,
                None => continue,
            };
            let record = entry.value();

            let mut curr = record.load(direction);
            while curr == node {
                let (left, right) = list.top_neighbors(key);
                let candidate = if direction == 0 { left } else { right };

                let replacement = unsafe {
                    if !candidate.is_null()
                        && !list.is_sentinel(candidate)
                        && !(*candidate).is_marked()
                        && prefix.is_prefix_of((*candidate).key())
                    {
                        candidate
                    } else {
                        ptr::null_mut()
                    }
                };

                let _ = record.cas(direction, curr, replacement);
                curr = record.load(direction);
            }

            if record.is_empty() {
                self.prefixes.remove(&prefix);
            }
        }
    }

    /// Binary search on prefix length for a top-level node close to `key`.
    ///
    /// Keeps the candidate whose key is nearest to `key` among all matched
    /// committed prefixes, falling back to the head sentinel when the trie
    /// holds no ancestor of the key.
    pub fn lowest_ancestor(&self, key: u32, head: *mut Node) -> *mut Node {
        let mut ancestor: *mut Node = ptr::null_mut();
        let mut start = 0;
        let mut size = 16;

        while size > 0 {
            let len = start + size;
            let prefix = Prefix::of(key, len);

            if let Some(entry) = self.prefixes.get(&prefix) {
                let direction = Prefix::next_bit(key, len);
                let candidate = entry.value().load(direction);

                if !candidate.is_null() {
                    let candidate_key = unsafe { (*candidate).key() };
                    // A slot may lag behind the skip list; only commit the
                    // prefix when the descendant actually lies under it
                    if prefix.is_prefix_of(candidate_key) {
                        let closer = ancestor.is_null() || {
                            let ancestor_key = unsafe { (*ancestor).key() };
                            key.abs_diff(candidate_key) < key.abs_diff(ancestor_key)
                        };
                        if closer {
                            ancestor = candidate;
                        }
                        start += size;
                    }
                }
            }

            size /= 2;
        }

        if ancestor.is_null() {
            head
        } else {
            ancestor
        }
    }
}

impl Default for XFastTrie {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: the map and the slots are atomic; referenced nodes are kept
// alive by the caller's reclamation scheme
unsafe impl Send for XFastTrie {}
unsafe impl Sync for XFastTrie {}
