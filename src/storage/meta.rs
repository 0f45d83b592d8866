//! # Meta-Page
//!
//! Page 0 of the database file holds the 40-byte commit root:
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  -------------------------------------
//! 0       16    signature  "ELKDB", zero-padded
//! 16      8     root       Tree root pointer (0 = empty tree)
//! 24      8     flushed    Committed page count, meta-page included
//! 32      8     free_head  Head of the free-list chain (0 = empty)
//! ```
//!
//! The meta-page is the commit point of the store: data pages become
//! reachable only once a rewritten meta-page hits disk. It is written with
//! a single positioned write at offset 0, which is assumed atomic with
//! respect to crashes for a 40-byte payload.

use std::fs::File;
use std::os::unix::fs::FileExt;

use eyre::{ensure, Result, WrapErr};
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{META_PAGE_SIZE, SIGNATURE_SIZE};

/// File signature, zero-padded to 16 bytes.
pub const SIGNATURE: &[u8; SIGNATURE_SIZE] = b"ELKDB\0\0\0\0\0\0\0\0\0\0\0";

/// The commit root stored at file offset 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MetaPage {
    signature: [u8; SIGNATURE_SIZE],
    root: U64,
    flushed: U64,
    free_head: U64,
}

const _: () = assert!(std::mem::size_of::<MetaPage>() == META_PAGE_SIZE);

impl MetaPage {
    pub fn new(root: u64, flushed: u64, free_head: u64) -> Self {
        MetaPage {
            signature: *SIGNATURE,
            root: U64::new(root),
            flushed: U64::new(flushed),
            free_head: U64::new(free_head),
        }
    }

    /// Parses and validates the meta-page against the file's page count.
    pub fn read(bytes: &[u8], file_pages: u64) -> Result<MetaPage> {
        ensure!(
            bytes.len() >= META_PAGE_SIZE,
            "buffer too small for the meta page: {} < {}",
            bytes.len(),
            META_PAGE_SIZE
        );

        let meta = MetaPage::ref_from_bytes(&bytes[..META_PAGE_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse the meta page: {:?}", e))?;

        ensure!(&meta.signature == SIGNATURE, "bad file signature");

        let flushed = meta.flushed.get();
        ensure!(
            1 <= flushed && flushed <= file_pages,
            "meta page: committed page count {flushed} out of range (file holds {file_pages})"
        );
        ensure!(
            meta.root.get() < flushed,
            "meta page: root pointer {} not below committed count {flushed}",
            meta.root.get()
        );
        ensure!(
            meta.free_head.get() < flushed,
            "meta page: free-list head {} not below committed count {flushed}",
            meta.free_head.get()
        );

        Ok(*meta)
    }

    /// Writes the meta-page at offset 0 with a single positioned write.
    pub fn store(&self, file: &File) -> Result<()> {
        file.write_all_at(self.as_bytes(), 0)
            .wrap_err("failed to write the meta page")
    }

    pub fn root(&self) -> u64 {
        self.root.get()
    }

    pub fn flushed(&self) -> u64 {
        self.flushed.get()
    }

    pub fn free_head(&self) -> u64 {
        self.free_head.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_page_is_40_bytes() {
        assert_eq!(std::mem::size_of::<MetaPage>(), 40);
    }

    #[test]
    fn roundtrip_through_bytes() {
        let meta = MetaPage::new(3, 10, 7);

        let parsed = MetaPage::read(meta.as_bytes(), 10).unwrap();

        assert_eq!(parsed.root(), 3);
        assert_eq!(parsed.flushed(), 10);
        assert_eq!(parsed.free_head(), 7);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = [0u8; META_PAGE_SIZE];
        bytes[..16].copy_from_slice(b"NOT A DATABASE!!");

        let result = MetaPage::read(&bytes, 10);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("bad file signature"));
    }

    #[test]
    fn rejects_flushed_beyond_file() {
        let meta = MetaPage::new(1, 20, 0);

        let result = MetaPage::read(meta.as_bytes(), 10);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("out of range"));
    }

    #[test]
    fn rejects_zero_flushed() {
        let meta = MetaPage::new(0, 0, 0);

        assert!(MetaPage::read(meta.as_bytes(), 10).is_err());
    }

    #[test]
    fn rejects_root_at_or_past_flushed() {
        let meta = MetaPage::new(10, 10, 0);

        let result = MetaPage::read(meta.as_bytes(), 10);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("root pointer"));
    }

    #[test]
    fn rejects_free_head_at_or_past_flushed() {
        let meta = MetaPage::new(0, 5, 5);

        let result = MetaPage::read(meta.as_bytes(), 10);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("free-list head"));
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = [0u8; 16];

        assert!(MetaPage::read(&bytes, 10).is_err());
    }

    #[test]
    fn store_and_read_back_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();

        MetaPage::new(2, 4, 3).store(&file).unwrap();

        let mut buf = [0u8; META_PAGE_SIZE];
        file.read_exact_at(&mut buf, 0).unwrap();
        let parsed = MetaPage::read(&buf, 4).unwrap();
        assert_eq!(parsed.root(), 2);
        assert_eq!(parsed.flushed(), 4);
        assert_eq!(parsed.free_head(), 3);
    }
}
