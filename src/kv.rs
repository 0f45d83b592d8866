//! # Key-Value Store Façade
//!
//! [`KV`] binds the tree to the pager and exposes the public byte-string
//! interface: `get`, `set`, `update`, `delete`. Every mutation is a full
//! read-modify-commit cycle — when a call returns successfully, the change
//! has been fsynced twice and the meta-page points at the new root.
//!
//! There is no concurrency model here: operations are synchronous and the
//! handle is single-threaded by design. A failed commit leaves the handle
//! poisoned (the pending update set still holds the attempted mutation);
//! recovery is closing and reopening, which falls back to the last
//! committed state.

use std::path::Path;

use eyre::{ensure, Result};
use tracing::debug;

use crate::btree::{BTree, UpdateMode};
use crate::config::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::storage::{Node, PageStore, Pager};

/// An open database handle over a single file.
#[derive(Debug)]
pub struct KV {
    pager: Pager,
    tree: BTree,
}

impl KV {
    /// Opens the database at `path`, creating the file when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pager = Pager::open(path.as_ref())?;
        let tree = BTree::new(pager.root());
        debug!(path = %path.as_ref().display(), "database open");
        Ok(KV { pager, tree })
    }

    /// Closes the handle, unmapping the file. Callers must have committed;
    /// nothing is flushed here.
    pub fn close(self) {}

    /// Looks up `key`, returning its value if present.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tree.get(&self.pager, key)
    }

    /// Inserts `key` or overwrites its value, durably.
    pub fn set(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        self.update(key, val, UpdateMode::Upsert).map(|_| ())
    }

    /// Inserts or updates `key` according to `mode`, durably. Returns
    /// whether a new key was added (false for replacements and no-ops).
    pub fn update(&mut self, key: &[u8], val: &[u8], mode: UpdateMode) -> Result<bool> {
        check_key(key)?;
        ensure!(
            val.len() <= MAX_VALUE_SIZE,
            "value length {} exceeds the {MAX_VALUE_SIZE}-byte limit",
            val.len()
        );

        let added = self.tree.insert(&mut self.pager, key, val, mode);
        self.pager.commit(self.tree.root())?;
        Ok(added)
    }

    /// Removes `key`, durably. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        check_key(key)?;

        let deleted = self.tree.delete(&mut self.pager, key);
        self.pager.commit(self.tree.root())?;
        Ok(deleted)
    }

    /* --- introspection, for diagnostics and structural tests --- */

    /// Current tree root pointer (0 when no key was ever inserted).
    pub fn root_ptr(&self) -> u64 {
        self.tree.root()
    }

    /// Committed page count, the meta-page at slot 0 included.
    pub fn flushed_pages(&self) -> u64 {
        self.pager.flushed()
    }

    /// Number of reusable pointers in the free list.
    pub fn freelist_len(&self) -> u64 {
        self.pager.freelist_len()
    }

    /// Head page of the free-list chain (0 when empty).
    pub fn freelist_head(&self) -> u64 {
        self.pager.freelist_head()
    }

    /// Reads the committed page at `ptr`.
    pub fn page(&self, ptr: u64) -> Node {
        self.pager.get(ptr)
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    ensure!(!key.is_empty(), "empty keys are not allowed");
    ensure!(
        key.len() <= MAX_KEY_SIZE,
        "key length {} exceeds the {MAX_KEY_SIZE}-byte limit",
        key.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db(dir: &tempfile::TempDir) -> KV {
        KV::open(dir.path().join("test.db")).unwrap()
    }

    #[test]
    fn fresh_database_is_empty() {
        let dir = tempfile::tempdir().unwrap();

        let db = open_db(&dir);

        assert_eq!(db.flushed_pages(), 1);
        assert_eq!(db.root_ptr(), 0);
        assert_eq!(db.freelist_len(), 0);
        assert_eq!(db.get(b"a"), None);
    }

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);

        db.set(b"k", b"v").unwrap();

        assert_eq!(db.get(b"k"), Some(b"v".to_vec()));
        assert_eq!(db.get(b"x"), None);
    }

    #[test]
    fn empty_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);

        assert!(db.set(b"", b"v").is_err());
        assert!(db.delete(b"").is_err());
    }

    #[test]
    fn oversized_keys_and_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);

        let long_key = vec![b'k'; MAX_KEY_SIZE + 1];
        let long_val = vec![b'v'; MAX_VALUE_SIZE + 1];

        assert!(db.set(&long_key, b"v").is_err());
        assert!(db.set(b"k", &long_val).is_err());
        assert!(db.delete(&long_key).is_err());
    }

    #[test]
    fn maximum_sizes_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);

        let key = vec![b'k'; MAX_KEY_SIZE];
        let val = vec![b'v'; MAX_VALUE_SIZE];

        db.set(&key, &val).unwrap();

        assert_eq!(db.get(&key), Some(val));
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut db = KV::open(&path).unwrap();
            db.set(b"alpha", b"1").unwrap();
            db.set(b"beta", b"2").unwrap();
            db.close();
        }

        let db = KV::open(&path).unwrap();
        assert_eq!(db.get(b"alpha"), Some(b"1".to_vec()));
        assert_eq!(db.get(b"beta"), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut db = KV::open(&path).unwrap();
            db.set(b"gone", b"1").unwrap();
            db.set(b"kept", b"2").unwrap();
            assert!(db.delete(b"gone").unwrap());
        }

        let db = KV::open(&path).unwrap();
        assert_eq!(db.get(b"gone"), None);
        assert_eq!(db.get(b"kept"), Some(b"2".to_vec()));
    }

    #[test]
    fn update_modes_behave_as_documented() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir);
        db.set(b"existing", b"old").unwrap();

        let added = db
            .update(b"existing", b"new", UpdateMode::InsertOnly)
            .unwrap();
        assert!(!added);
        assert_eq!(db.get(b"existing"), Some(b"old".to_vec()));

        let added = db
            .update(b"missing", b"v", UpdateMode::UpdateOnly)
            .unwrap();
        assert!(!added);
        assert_eq!(db.get(b"missing"), None);

        let added = db.update(b"existing", b"new", UpdateMode::Upsert).unwrap();
        assert!(!added);
        assert_eq!(db.get(b"existing"), Some(b"new".to_vec()));
    }
}
