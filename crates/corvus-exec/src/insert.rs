//! Insert executor.

use crate::db::Table;
use crate::executor::{Context, Executor};
use bytes::BytesMut;
use corvus_common::page::Rid;
use corvus_common::{ColMeta, CorvusError, Result, Value};
use corvus_storage::Record;
use corvus_txn::{WriteKind, WriteRecord};

/// Inserts one row into a table, maintaining every index over it.
///
/// Values are validated against the schema at construction; the mutation
/// runs through [`InsertExecutor::execute`], which records the undo entry
/// in the transaction's write set.
pub struct InsertExecutor<'a> {
    table: &'a Table,
    values: Vec<Value>,
    cols: Vec<ColMeta>,
    ctx: &'a Context,
    rid: Rid,
}

impl<'a> InsertExecutor<'a> {
    /// Validates the values against the table schema.
    pub fn new(table: &'a Table, values: Vec<Value>, ctx: &'a Context) -> Result<Self> {
        let meta = table.meta();
        if values.len() != meta.cols.len() {
            return Err(CorvusError::InvalidValueCount {
                expected: meta.cols.len(),
                actual: values.len(),
            });
        }
        for (col, value) in meta.cols.iter().zip(&values) {
            if value.col_type() != col.col_type {
                return Err(CorvusError::IncompatibleType {
                    expected: col.col_type.to_string(),
                    actual: value.col_type().to_string(),
                });
            }
        }

        Ok(Self {
            table,
            values,
            cols: meta.cols,
            ctx,
            rid: Rid::INVALID,
        })
    }

    /// Runs the insert. Returns the new record's rid.
    pub fn execute(&mut self) -> Result<Rid> {
        if !self
            .ctx
            .lock_mgr
            .lock_ix_on_table(&self.ctx.txn, self.table.file_id)
        {
            return Err(CorvusError::TransactionAborted(format!(
                "IX lock denied on table {}",
                self.table.name
            )));
        }

        // Materialize the record buffer
        let record_size = self.table.record_size();
        let mut buf = BytesMut::zeroed(record_size);
        for (col, value) in self.cols.iter().zip(&self.values) {
            buf[col.offset..col.offset + col.len].copy_from_slice(&value.to_bytes(col.len));
        }

        let rid = self.table.file.insert_record(&buf)?;
        // Undo entry first: a failed record lock below still rolls back
        self.ctx.txn.append_write(WriteRecord::new(
            self.table.name.as_str(),
            WriteKind::Insert { rid },
        ));

        if !self
            .ctx
            .lock_mgr
            .lock_exclusive_on_record(&self.ctx.txn, rid, self.table.file_id)
        {
            return Err(CorvusError::TransactionAborted(format!(
                "X lock denied on record {}",
                rid
            )));
        }

        for ix in self.table.indexes() {
            ix.index.insert_entry(&ix.meta.build_key(&buf), rid)?;
        }

        self.rid = rid;
        Ok(rid)
    }
}

impl<'a> Executor for InsertExecutor<'a> {
    fn begin_tuple(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_tuple(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_end(&self) -> bool {
        true
    }

    fn current(&self) -> Result<Record> {
        Err(CorvusError::Internal("insert produces no tuples".into()))
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        0
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}
