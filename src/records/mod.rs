//! # Records and Values
//!
//! The typed row model of the table layer. A [`Record`] is a bag of named
//! cells built in any column order; before touching storage it is
//! reordered against the table definition and checked for completeness.
//! Cells are either 64-bit signed integers or byte strings.

pub mod schema;

use eyre::{ensure, Result};

use self::schema::TableDef;

/// Tag discriminating the supported cell types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bytes = 1,
    Int64 = 2,
}

impl ValueType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ValueType::Bytes),
            2 => Some(ValueType::Int64),
            _ => None,
        }
    }
}

/// One table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int64(i64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int64(_) => ValueType::Int64,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Int64(_) => None,
        }
    }
}

/// A row (or partial row) under construction: parallel lists of column
/// names and cell values.
#[derive(Debug, Clone, Default)]
pub struct Record {
    cols: Vec<String>,
    vals: Vec<Value>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn add_int64(&mut self, col: &str, val: i64) -> &mut Self {
        self.cols.push(col.to_string());
        self.vals.push(Value::Int64(val));
        self
    }

    pub fn add_bytes(&mut self, col: &str, val: &[u8]) -> &mut Self {
        self.cols.push(col.to_string());
        self.vals.push(Value::Bytes(val.to_vec()));
        self
    }

    pub fn push(&mut self, col: &str, val: Value) -> &mut Self {
        self.cols.push(col.to_string());
        self.vals.push(val);
        self
    }

    pub fn get(&self, col: &str) -> Option<&Value> {
        self.cols
            .iter()
            .position(|c| c == col)
            .map(|i| &self.vals[i])
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    pub fn vals(&self) -> &[Value] {
        &self.vals
    }
}

/// Reorders `rec` to the column order of `tdef`; cells for columns the
/// record does not mention are left empty. Type mismatches are errors,
/// unknown record columns are ignored.
fn reorder_record(tdef: &TableDef, rec: &Record) -> Result<Vec<Option<Value>>> {
    let mut out = Vec::with_capacity(tdef.cols.len());
    for (i, col) in tdef.cols.iter().enumerate() {
        match rec.get(col) {
            None => out.push(None),
            Some(val) => {
                ensure!(
                    val.value_type() == tdef.types[i],
                    "bad type for column '{col}'"
                );
                out.push(Some(val.clone()));
            }
        }
    }
    Ok(out)
}

/// Reorders and validates a record against `tdef`: exactly the first `n`
/// columns must be present. `n == tdef.pkeys` accepts a primary key,
/// `n == tdef.cols.len()` a full row. Returns the first `n` cells in
/// definition order.
pub(crate) fn check_record(tdef: &TableDef, rec: &Record, n: usize) -> Result<Vec<Value>> {
    let reordered = reorder_record(tdef, rec)?;
    for (i, val) in reordered.iter().enumerate() {
        if i < n {
            ensure!(val.is_some(), "missing column: {}", tdef.cols[i]);
        } else {
            ensure!(val.is_none(), "extra column: {}", tdef.cols[i]);
        }
    }
    Ok(reordered.into_iter().take(n).flatten().collect())
}
