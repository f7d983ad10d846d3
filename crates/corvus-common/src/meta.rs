//! Table, column, and index metadata.

use crate::error::{CorvusError, Result};
use crate::types::ColType;
use serde::{Deserialize, Serialize};

/// Metadata for a single column.
///
/// Offsets are assigned at table creation and are contiguous: column i+1
/// starts where column i ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColMeta {
    /// Name of the table this column belongs to.
    pub tab_name: String,
    /// Column name.
    pub name: String,
    /// Column type.
    pub col_type: ColType,
    /// On-disk width in bytes.
    pub len: usize,
    /// Byte offset of this column within a record.
    pub offset: usize,
}

/// Metadata for an index over one or more columns of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Indexed columns, in declared index order.
    pub cols: Vec<ColMeta>,
    /// Total composite key width in bytes.
    pub col_tot_len: usize,
}

impl IndexMeta {
    /// Builds index metadata from the indexed columns.
    pub fn new(cols: Vec<ColMeta>) -> Self {
        let col_tot_len = cols.iter().map(|c| c.len).sum();
        Self { cols, col_tot_len }
    }

    /// Gathers the indexed columns' slices from a record into a composite
    /// key, in declared index order.
    pub fn build_key(&self, record: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.col_tot_len);
        for col in &self.cols {
            key.extend_from_slice(&record[col.offset..col.offset + col.len]);
        }
        key
    }
}

/// Metadata for a table: its columns and the indexes defined over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Table name.
    pub name: String,
    /// Columns in declaration order, offsets contiguous.
    pub cols: Vec<ColMeta>,
    /// Indexes defined over this table.
    pub indexes: Vec<IndexMeta>,
}

impl TableMeta {
    /// Returns the column with the given name.
    pub fn get_col(&self, name: &str) -> Result<&ColMeta> {
        self.cols
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CorvusError::ColumnNotFound(name.to_string()))
    }

    /// Returns the fixed record size for this table.
    pub fn record_size(&self) -> usize {
        self.cols.last().map(|c| c.offset + c.len).unwrap_or(0)
    }

    /// Returns true if an index over exactly these columns exists.
    pub fn has_index(&self, col_names: &[String]) -> bool {
        self.indexes.iter().any(|ix| {
            ix.cols.len() == col_names.len()
                && ix.cols.iter().zip(col_names).all(|(c, n)| &c.name == n)
        })
    }
}

/// Resolves a possibly table-qualified column reference against a schema.
///
/// Used by executors whose schema spans more than one table (joins): with a
/// table qualifier both parts must match, without one the first column of
/// that name wins.
pub fn get_col<'a>(
    cols: &'a [ColMeta],
    tab_name: Option<&str>,
    col_name: &str,
) -> Result<&'a ColMeta> {
    cols.iter()
        .find(|c| c.name == col_name && tab_name.map_or(true, |t| c.tab_name == t))
        .ok_or_else(|| CorvusError::ColumnNotFound(col_name.to_string()))
}
