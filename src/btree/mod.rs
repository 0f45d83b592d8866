//! # Copy-on-Write B+ Tree
//!
//! Ordered byte-string key-value storage over fixed-size pages. The tree
//! never modifies a page in place: every mutation builds replacement pages
//! bottom-up and releases the originals, so the previously committed tree
//! remains intact until the pager publishes the new root.
//!
//! ## Structure
//!
//! - All keys and values live in leaf pages; internal pages hold separator
//!   keys and child pointers.
//! - The key at index `i` of an internal page equals the smallest key of
//!   the subtree under child `i`, so index 0 duplicates the separator
//!   inherited from the parent and lookups skip it.
//! - The leftmost leaf starts with a sentinel entry with an empty key.
//!   It is installed when the first key is inserted and never removed,
//!   which keeps "greatest key ≤ target" well defined everywhere.
//!
//! ## Mutation Shape
//!
//! Inserts build an oversized scratch node and cut it into one to three
//! pages afterwards; a root split adds a level. Deletes merge an
//! underfull page (quarter page or less) into a sibling when the result
//! fits, and a single-child internal root is unwrapped, removing a level.

mod tree;

pub use tree::{BTree, UpdateMode};
