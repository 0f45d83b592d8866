//! # Typed Table Layer
//!
//! [`Database`] wraps the byte-string store with named tables of typed
//! rows. Every row lives in the one shared tree under its table's key
//! prefix; the primary key columns are encoded order-preservingly into the
//! tree key and the remaining columns into the value.
//!
//! Table definitions are themselves rows: the `@table` catalog maps a
//! table name to its serialized definition, and `@meta` holds the
//! `next_prefix` counter that hands each new table a fresh key range.
//! Definitions are cached per open handle; the cache is only invalidated
//! by reopening, which matches the single-process design.

use std::path::Path;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use tracing::debug;

use crate::btree::UpdateMode;
use crate::encoding::{decode_values, encode_key, encode_values};
use crate::kv::KV;
use crate::records::schema::{TableDef, TABLE_PREFIX_MIN};
use crate::records::{check_record, Record};

/// An open database with typed table access.
#[derive(Debug)]
pub struct Database {
    kv: KV,
    tables: HashMap<String, TableDef>,
}

impl Database {
    /// Opens the database at `path`, creating the file when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Database {
            kv: KV::open(path)?,
            tables: HashMap::new(),
        })
    }

    /// Closes the handle. All returned writes are already durable.
    pub fn close(self) {
        self.kv.close();
    }

    /// Access to the underlying byte-string store.
    pub fn kv(&self) -> &KV {
        &self.kv
    }

    /// Registers a new table, allocating its key prefix and persisting the
    /// definition in the catalog. The `prefix` field of `tdef` must be 0.
    pub fn create_table(&mut self, mut tdef: TableDef) -> Result<()> {
        tdef.check()?;
        ensure!(
            tdef.prefix == 0,
            "table '{}' carries a preassigned prefix",
            tdef.name
        );
        ensure!(
            TableDef::internal(&tdef.name).is_none(),
            "table name '{}' is reserved",
            tdef.name
        );

        let mut probe = Record::new();
        probe.add_bytes("name", tdef.name.as_bytes());
        if self.read_row(&TableDef::catalog(), &mut probe)? {
            bail!("table exists: {}", tdef.name);
        }

        // claim the next free prefix from @meta
        let mut counter = Record::new();
        counter.add_bytes("key", b"next_prefix");
        let prefix = if self.read_row(&TableDef::meta(), &mut counter)? {
            let raw = counter
                .get("val")
                .and_then(|v| v.as_bytes())
                .expect("@meta val column is bytes");
            ensure!(raw.len() == 4, "corrupt next_prefix cell");
            let prefix = u32::from_le_bytes(raw.try_into().unwrap());
            ensure!(prefix >= TABLE_PREFIX_MIN, "corrupt next_prefix value {prefix}");
            prefix
        } else {
            TABLE_PREFIX_MIN
        };
        tdef.prefix = prefix;

        let mut counter = Record::new();
        counter.add_bytes("key", b"next_prefix");
        counter.add_bytes("val", &(prefix + 1).to_le_bytes());
        self.write_row(&TableDef::meta(), &counter, UpdateMode::Upsert)?;

        let mut row = Record::new();
        row.add_bytes("name", tdef.name.as_bytes());
        row.add_bytes("def", &tdef.encode());
        self.write_row(&TableDef::catalog(), &row, UpdateMode::Upsert)?;

        debug!(table = %tdef.name, prefix, "created table");
        self.tables.insert(tdef.name.clone(), tdef);
        Ok(())
    }

    /// Fetches a row by primary key. `rec` carries exactly the key columns
    /// on entry and is extended with the remaining columns on a hit.
    pub fn get(&mut self, table: &str, rec: &mut Record) -> Result<bool> {
        let tdef = self.table_def(table)?;
        self.read_row(&tdef, rec)
    }

    /// Inserts a full row; an existing primary key is left untouched.
    /// Returns whether the row was added.
    pub fn insert(&mut self, table: &str, rec: &Record) -> Result<bool> {
        self.set(table, rec, UpdateMode::InsertOnly)
    }

    /// Updates a full row; a missing primary key is a no-op.
    pub fn update(&mut self, table: &str, rec: &Record) -> Result<bool> {
        self.set(table, rec, UpdateMode::UpdateOnly)
    }

    /// Inserts or replaces a full row. Returns whether a new row was added.
    pub fn upsert(&mut self, table: &str, rec: &Record) -> Result<bool> {
        self.set(table, rec, UpdateMode::Upsert)
    }

    /// Writes a full row under `mode`.
    pub fn set(&mut self, table: &str, rec: &Record, mode: UpdateMode) -> Result<bool> {
        let tdef = self.table_def(table)?;
        self.write_row(&tdef, rec, mode)
    }

    /// Deletes a row by primary key. Returns whether it existed.
    pub fn delete(&mut self, table: &str, rec: &Record) -> Result<bool> {
        let tdef = self.table_def(table)?;
        let vals = check_record(&tdef, rec, tdef.pkeys)?;
        let key = encode_key(tdef.prefix, &vals);
        self.kv.delete(&key)
    }

    /// Resolves a table definition: internal tables first, then the cache,
    /// then the catalog.
    fn table_def(&mut self, name: &str) -> Result<TableDef> {
        if let Some(tdef) = TableDef::internal(name) {
            return Ok(tdef);
        }
        if let Some(tdef) = self.tables.get(name) {
            return Ok(tdef.clone());
        }

        let mut rec = Record::new();
        rec.add_bytes("name", name.as_bytes());
        if !self.read_row(&TableDef::catalog(), &mut rec)? {
            bail!("table not found: {name}");
        }
        let raw = rec
            .get("def")
            .and_then(|v| v.as_bytes())
            .expect("@table def column is bytes");
        let tdef = TableDef::decode(raw)?;
        self.tables.insert(name.to_string(), tdef.clone());
        Ok(tdef)
    }

    fn read_row(&self, tdef: &TableDef, rec: &mut Record) -> Result<bool> {
        let vals = check_record(tdef, rec, tdef.pkeys)?;
        let key = encode_key(tdef.prefix, &vals);

        let Some(payload) = self.kv.get(&key) else {
            return Ok(false);
        };

        let rest = decode_values(&payload, &tdef.types[tdef.pkeys..])?;
        for (col, val) in tdef.cols[tdef.pkeys..].iter().zip(rest) {
            rec.push(col, val);
        }
        Ok(true)
    }

    fn write_row(&mut self, tdef: &TableDef, rec: &Record, mode: UpdateMode) -> Result<bool> {
        let vals = check_record(tdef, rec, tdef.cols.len())?;
        let key = encode_key(tdef.prefix, &vals[..tdef.pkeys]);
        let mut payload = Vec::new();
        encode_values(&mut payload, &vals[tdef.pkeys..]);
        self.kv.update(&key, &payload, mode)
    }
}
