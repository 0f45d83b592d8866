//! # Configuration Constants
//!
//! This module centralizes the on-disk geometry of the database. Constants
//! that depend on each other are co-located and the relationships are
//! enforced through compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> NODE_HEADER_SIZE (4 bytes: type u16 + nkeys u16)
//!       │
//!       ├─> MAX_KEY_SIZE / MAX_VALUE_SIZE
//!       │     One maximum-size key-value pair plus the sentinel entry must
//!       │     fit into a single leaf page, or splitting can never converge.
//!       │
//!       ├─> FREE_LIST_CAP (derived: (PAGE_SIZE - FREE_LIST_HEADER_SIZE) / 8)
//!       │
//!       └─> INITIAL_MMAP_SIZE (must be a PAGE_SIZE multiple; the chunk
//!             walk in the pager expresses chunk boundaries in whole pages)
//!
//! META_PAGE_SIZE (40 bytes)
//!       │
//!       └─> SIGNATURE_SIZE (16) + 3 × 8-byte fields (root, used, free head)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. A maximum-size entry plus the sentinel fits one page.
//! 2. `INITIAL_MMAP_SIZE % PAGE_SIZE == 0` (chunk boundaries are page
//!    boundaries).
//! 3. `FREE_LIST_CAP > 0` (a free-list page can hold at least one pointer).

/// Size of a single database page in bytes. Every on-disk structure is laid
/// out in units of this size; the file is a flat array of such pages.
pub const PAGE_SIZE: usize = 4096;

/// Tree page header: `type: u16 LE` followed by `nkeys: u16 LE`.
pub const NODE_HEADER_SIZE: usize = 4;

/// Size of one child-pointer slot in a tree page (and of a page pointer
/// everywhere else on disk).
pub const CHILD_PTR_SIZE: usize = 8;

/// Size of one entry-offset slot in a tree page.
pub const OFFSET_SLOT_SIZE: usize = 2;

/// Per-entry prefix in the KV region: `klen: u16 LE` + `vlen: u16 LE`.
pub const KV_META_SIZE: usize = 4;

/// Maximum key length accepted by the store.
pub const MAX_KEY_SIZE: usize = 1000;

/// Maximum value length accepted by the store.
pub const MAX_VALUE_SIZE: usize = 3000;

/// Free-list page header: `type: u16, size: u16, total: u64, next: u64`.
pub const FREE_LIST_HEADER_SIZE: usize = 20;

/// Number of page pointers a single free-list page can hold.
pub const FREE_LIST_CAP: usize = (PAGE_SIZE - FREE_LIST_HEADER_SIZE) / CHILD_PTR_SIZE;

/// Meta-page payload at file offset 0: 16-byte signature plus the root
/// pointer, the flushed page count, and the free-list head.
pub const META_PAGE_SIZE: usize = 40;

/// Length of the zero-padded signature field in the meta-page.
pub const SIGNATURE_SIZE: usize = 16;

/// Size of the first memory-mapped chunk. Subsequent chunks double the
/// total mapped range, so the chunk chain stays short.
pub const INITIAL_MMAP_SIZE: usize = 64 << 20;

// The sentinel entry (empty key, empty value) and one maximum-size entry
// must fit a single leaf page together, otherwise inserting a maximum-size
// pair into a fresh tree could not produce a valid root.
const _: () = assert!(
    NODE_HEADER_SIZE
        + 2 * (CHILD_PTR_SIZE + OFFSET_SLOT_SIZE + KV_META_SIZE)
        + MAX_KEY_SIZE
        + MAX_VALUE_SIZE
        <= PAGE_SIZE,
    "a maximum-size entry plus the sentinel must fit one page"
);

const _: () = assert!(
    INITIAL_MMAP_SIZE % PAGE_SIZE == 0,
    "mmap chunks must be page-aligned"
);

const _: () = assert!(FREE_LIST_CAP > 0, "free-list pages must hold pointers");

// Entry offsets are stored as u16; a transient scratch node may be two
// pages large, which must still be addressable.
const _: () = assert!(2 * PAGE_SIZE <= u16::MAX as usize + 1);
