//! # Table Definitions
//!
//! A [`TableDef`] names a table's columns, their types, how many leading
//! columns form the primary key, and the table's key prefix in the shared
//! tree. Definitions are persisted in the `@table` catalog as a compact
//! length-prefixed binary record:
//!
//! ```text
//! prefix: u32 LE
//! pkeys:  u16 LE
//! name:   u16 LE length + bytes
//! ncols:  u16 LE
//! per column: u16 LE name length + bytes, type: u8
//! ```
//!
//! ## Internal Tables
//!
//! Two tables bootstrap the catalog and are baked into the binary rather
//! than stored:
//!
//! - `@meta` (prefix 1, `key -> val`): bookkeeping cells, notably the
//!   `next_prefix` allocation counter.
//! - `@table` (prefix 2, `name -> def`): the serialized definitions of
//!   user tables.
//!
//! User tables start at prefix 100, leaving room below for more internal
//! tables.

use eyre::{bail, ensure, Result};

use super::ValueType;

/// Lowest key prefix handed to user tables.
pub const TABLE_PREFIX_MIN: u32 = 100;

/// Schema of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    /// Column types, parallel to `cols`.
    pub types: Vec<ValueType>,
    /// Column names; the first `pkeys` of them form the primary key.
    pub cols: Vec<String>,
    pub pkeys: usize,
    /// Key prefix isolating this table's rows in the shared tree.
    pub prefix: u32,
}

impl TableDef {
    /// The `@meta` bookkeeping table.
    pub fn meta() -> TableDef {
        TableDef {
            name: "@meta".to_string(),
            types: vec![ValueType::Bytes, ValueType::Bytes],
            cols: vec!["key".to_string(), "val".to_string()],
            pkeys: 1,
            prefix: 1,
        }
    }

    /// The `@table` catalog of user table definitions.
    pub fn catalog() -> TableDef {
        TableDef {
            name: "@table".to_string(),
            types: vec![ValueType::Bytes, ValueType::Bytes],
            cols: vec!["name".to_string(), "def".to_string()],
            pkeys: 1,
            prefix: 2,
        }
    }

    /// Looks up an internal table by name.
    pub fn internal(name: &str) -> Option<TableDef> {
        match name {
            "@meta" => Some(TableDef::meta()),
            "@table" => Some(TableDef::catalog()),
            _ => None,
        }
    }

    /// Validates the definition shape.
    pub fn check(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "table definition has no name");
        ensure!(
            !self.cols.is_empty(),
            "table '{}' has no columns",
            self.name
        );
        ensure!(
            self.cols.len() == self.types.len(),
            "table '{}' has {} columns but {} types",
            self.name,
            self.cols.len(),
            self.types.len()
        );
        ensure!(
            1 <= self.pkeys && self.pkeys <= self.cols.len(),
            "table '{}' has an invalid primary key width {}",
            self.name,
            self.pkeys
        );
        Ok(())
    }

    /// Serializes the definition for the `@table` catalog.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.prefix.to_le_bytes());
        out.extend_from_slice(&(self.pkeys as u16).to_le_bytes());
        put_str(&mut out, &self.name);
        out.extend_from_slice(&(self.cols.len() as u16).to_le_bytes());
        for (col, ty) in self.cols.iter().zip(&self.types) {
            put_str(&mut out, col);
            out.push(*ty as u8);
        }
        out
    }

    /// Parses a definition previously produced by [`TableDef::encode`].
    pub fn decode(bytes: &[u8]) -> Result<TableDef> {
        let mut cur = Cursor { bytes, pos: 0 };

        let prefix = cur.u32()?;
        let pkeys = cur.u16()? as usize;
        let name = cur.str()?;
        let ncols = cur.u16()? as usize;

        let mut cols = Vec::with_capacity(ncols);
        let mut types = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            cols.push(cur.str()?);
            let raw = cur.u8()?;
            let Some(ty) = ValueType::from_u8(raw) else {
                bail!("unknown column type {raw} in table '{name}'");
            };
            types.push(ty);
        }
        ensure!(cur.pos == bytes.len(), "trailing bytes in table definition");

        let tdef = TableDef {
            name,
            types,
            cols,
            pkeys,
            prefix,
        };
        tdef.check()?;
        Ok(tdef)
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        ensure!(
            self.pos + n <= self.bytes.len(),
            "truncated table definition"
        );
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| eyre::eyre!("non-UTF-8 name"))
    }
}
