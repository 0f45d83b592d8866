//! # elkdb — Embedded Copy-on-Write Key-Value Store
//!
//! elkdb is a single-process, on-disk key-value store built on a
//! copy-on-write B+ tree over a memory-mapped file, with a thin typed
//! table layer on top. Durability comes from a classical shadow-paging
//! commit: new pages are written and fsynced while the 40-byte meta-page
//! still points at the previous tree, then the meta-page is swapped and
//! fsynced again.
//!
//! ## Quick Start
//!
//! ```ignore
//! use elkdb::KV;
//!
//! let mut db = KV::open("./data.db")?;
//! db.set(b"key", b"value")?;
//! assert_eq!(db.get(b"key"), Some(b"value".to_vec()));
//! db.delete(b"key")?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Typed tables (Database, Record)   │
//! ├─────────────────────────────────────┤
//! │  Order-preserving codec (encoding)  │
//! ├─────────────────────────────────────┤
//! │        KV façade (get/set/del)      │
//! ├─────────────────────────────────────┤
//! │  B+ tree (copy-on-write, 3-way      │
//! │  split, sibling merge)              │
//! ├─────────────────────────────────────┤
//! │  Pager: pending updates, free list, │
//! │  two-phase fsync commit             │
//! ├─────────────────────────────────────┤
//! │  Memory-mapped chunk chain          │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! The database is one file of 4 KiB pages. Page 0 holds the signature
//! and the commit roots (tree root, committed page count, free-list
//! head); every other page is a tree page, a free-list page, or
//! unreferenced space awaiting reuse. Deallocated pages are tracked in a
//! durable free list and recycled before the file grows.
//!
//! ## Scope
//!
//! One writer, synchronous operations, one tree. There are no range
//! scans, secondary indexes, multi-key transactions, or checksums; the
//! table layer supports 64-bit integers and byte strings.
//!
//! ## Module Overview
//!
//! - [`storage`]: page codec, mmap chain, free list, pager and commit
//! - [`btree`]: the copy-on-write tree algorithms
//! - [`kv`]: the public byte-string interface
//! - [`encoding`]: byte-comparable key and row serialization
//! - [`records`]: typed values, records, table definitions
//! - [`database`]: named tables and typed CRUD

pub mod btree;
pub mod config;
pub mod database;
pub mod encoding;
pub mod kv;
pub mod records;
pub mod storage;

pub use btree::UpdateMode;
pub use database::Database;
pub use kv::KV;
pub use records::schema::{TableDef, TABLE_PREFIX_MIN};
pub use records::{Record, Value, ValueType};
