//! Lock-free SkipTrie building blocks.
//!
//! # Organization
//!
//! - [`node`] - The skip-list node record shared by both indexes
//! - [`skip_list`] - The truncated skip list (membership source of truth)
//! - [`prefix`] - Packed bit-string prefixes of `u32` keys
//! - [`x_fast_trie`] - The concurrent prefix index over top-level nodes
//! - [`skip_trie`] - The composed structure and its predecessor engine
//!
//! Everything here operates on raw `*mut Node` pointers and performs no
//! memory reclamation of its own. Callers that share a structure across
//! threads must hold an epoch guard for the duration of each operation and
//! retire removed nodes through it; the `skiptrie-crossbeam` crate wraps
//! this core accordingly.

pub mod node;
pub mod prefix;
pub mod skip_list;
pub mod skip_trie;
pub mod x_fast_trie;

pub use node::{Node, MAX_HEIGHT};
pub use prefix::Prefix;
pub use skip_list::TruncatedSkipList;
pub use skip_trie::SkipTrie;
pub use x_fast_trie::XFastTrie;
