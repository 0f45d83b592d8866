//! # Pager
//!
//! The pager owns the mapped file and the state of the in-flight
//! transaction, and implements the [`PageStore`] interface the tree and the
//! free list are written against.
//!
//! ## Pending Update Set
//!
//! Copy-on-write mutation never touches mapped bytes. Every page the tree
//! produces or releases lands in an in-memory map from page pointer to
//! either a fresh buffer or a tombstone:
//!
//! ```text
//! updates: { ptr -> Some(node) }   pending-new or rewritten page
//!          { ptr -> None }         pending-free (tombstone)
//! ```
//!
//! Reads check this map first, so a transaction observes its own writes
//! while the mapped file still holds the previous committed state.
//!
//! ## Allocation
//!
//! [`Pager::allocate`] recycles free-list pointers before claiming fresh
//! slots past the flushed region. The raw [`PageTable`] beneath it always
//! appends — the free list rebuilds itself through that store, so its own
//! page allocations cannot disturb the recycling cursor mid-update.
//!
//! ## Commit
//!
//! ```text
//! write_pages:  tombstones -> free list update -> extend file & mmap
//!               -> copy pending pages into the mapping
//! sync_pages:   fsync -> advance flushed, reset transaction state
//!               -> rewrite the meta page -> fsync
//! ```
//!
//! The first fsync makes the new pages durable while the meta-page still
//! points at the old state; a crash in between leaves the previous commit
//! intact. Only the second fsync, after the meta-page swap, publishes the
//! transaction.

use std::path::Path;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use tracing::{debug, trace};

use super::freelist::FreeList;
use super::meta::MetaPage;
use super::mmap::MmapFile;
use super::page::Node;
use super::PageStore;
use crate::config::{META_PAGE_SIZE, PAGE_SIZE};

/// The pending update set layered over the mapped file. Its `allocate`
/// always appends past the flushed region.
#[derive(Debug)]
pub(crate) struct PageTable {
    mmap: MmapFile,
    /// Committed page count, the meta-page at slot 0 included.
    flushed: u64,
    /// Fresh slots claimed past `flushed` this transaction.
    n_append: u64,
    updates: HashMap<u64, Option<Node>>,
}

impl PageStore for PageTable {
    fn get(&self, ptr: u64) -> Node {
        match self.updates.get(&ptr) {
            Some(Some(node)) => node.clone(),
            Some(None) => panic!("read of page {ptr} freed in this transaction"),
            None => Node::from_bytes(self.mmap.page_at(ptr)),
        }
    }

    fn allocate(&mut self, node: Node) -> u64 {
        assert!(node.len() == PAGE_SIZE, "allocating a non-page-sized node");
        let ptr = self.flushed + self.n_append;
        self.n_append += 1;
        self.updates.insert(ptr, Some(node));
        ptr
    }

    fn write(&mut self, ptr: u64, node: Node) {
        assert!(node.len() == PAGE_SIZE, "writing a non-page-sized node");
        self.updates.insert(ptr, Some(node));
    }

    fn free(&mut self, ptr: u64) {
        self.updates.insert(ptr, None);
    }
}

/// The recycling allocator and commit engine over a [`PageTable`].
#[derive(Debug)]
pub struct Pager {
    table: PageTable,
    free: FreeList,
    /// Free-list pointers consumed by `allocate` this transaction.
    n_free: usize,
    root: u64,
}

impl Pager {
    /// Opens (or creates) the database file, maps it, and loads the
    /// meta-page. A zero-length file is a fresh database: slot 0 is
    /// reserved for the meta-page and everything else is empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mmap = MmapFile::open(path.as_ref())
            .wrap_err_with(|| format!("failed to open '{}'", path.as_ref().display()))?;

        let mut pager = Pager {
            table: PageTable {
                mmap,
                flushed: 1,
                n_append: 0,
                updates: HashMap::new(),
            },
            free: FreeList::new(0),
            n_free: 0,
            root: 0,
        };

        if pager.table.mmap.file_size() > 0 {
            let file_pages = pager.table.mmap.file_pages();
            let meta = MetaPage::read(
                &pager.table.mmap.page_at(0)[..META_PAGE_SIZE],
                file_pages,
            )
            .wrap_err_with(|| format!("failed to load '{}'", path.as_ref().display()))?;

            pager.root = meta.root();
            pager.table.flushed = meta.flushed();
            pager.free = FreeList::new(meta.free_head());
        }

        debug!(
            root = pager.root,
            flushed = pager.table.flushed,
            free_head = pager.free.head(),
            "pager ready"
        );
        Ok(pager)
    }

    /// Root pointer recorded by the last committed meta-page.
    pub fn root(&self) -> u64 {
        self.root
    }

    /// Committed page count, the meta-page included.
    pub fn flushed(&self) -> u64 {
        self.table.flushed
    }

    pub fn freelist_head(&self) -> u64 {
        self.free.head()
    }

    pub fn freelist_len(&self) -> u64 {
        self.free.len(&self.table)
    }

    /// Persists the transaction and publishes `root` as the new tree root.
    ///
    /// On error the pending update set still reflects the attempted
    /// mutation and the pager must not be reused; close and reopen to fall
    /// back to the last committed state.
    pub fn commit(&mut self, root: u64) -> Result<()> {
        self.write_pages()?;
        self.sync_pages(root)
    }

    fn write_pages(&mut self) -> Result<()> {
        // hand this transaction's deallocations to the free list; the list
        // may allocate (append-only) and write pages of its own
        let freed: Vec<u64> = self
            .table
            .updates
            .iter()
            .filter(|(_, node)| node.is_none())
            .map(|(&ptr, _)| ptr)
            .collect();
        self.free.update(&mut self.table, self.n_free, freed);

        let required = self.table.flushed + self.table.n_append;
        self.table.mmap.extend_file(required)?;
        self.table.mmap.extend_mmap(required)?;

        for (&ptr, node) in &self.table.updates {
            if let Some(node) = node {
                self.table.mmap.page_at_mut(ptr).copy_from_slice(node.as_slice());
            }
        }
        Ok(())
    }

    fn sync_pages(&mut self, root: u64) -> Result<()> {
        self.table.mmap.sync()?;

        self.table.flushed += self.table.n_append;
        self.table.n_append = 0;
        self.n_free = 0;
        self.table.updates.clear();
        self.root = root;

        trace!(root, flushed = self.table.flushed, "publishing commit");
        MetaPage::new(root, self.table.flushed, self.free.head())
            .store(self.table.mmap.file())?;
        self.table.mmap.sync()
    }
}

impl PageStore for Pager {
    fn get(&self, ptr: u64) -> Node {
        self.table.get(ptr)
    }

    fn allocate(&mut self, node: Node) -> u64 {
        assert!(node.len() == PAGE_SIZE, "allocating a non-page-sized node");
        if (self.n_free as u64) < self.free.len(&self.table) {
            let ptr = self.free.get(&self.table, self.n_free);
            self.n_free += 1;
            self.table.updates.insert(ptr, Some(node));
            ptr
        } else {
            self.table.allocate(node)
        }
    }

    fn write(&mut self, ptr: u64, node: Node) {
        self.table.write(ptr, node);
    }

    fn free(&mut self, ptr: u64) {
        self.table.free(ptr);
    }
}
