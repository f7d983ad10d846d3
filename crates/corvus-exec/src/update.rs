//! Update executor.

use crate::db::Table;
use crate::executor::{Context, Executor};
use bytes::BytesMut;
use corvus_common::page::Rid;
use corvus_common::{ColMeta, CorvusError, Result, Value};
use corvus_storage::Record;
use corvus_txn::{WriteKind, WriteRecord};

/// One `column = value` assignment of an update statement.
#[derive(Debug, Clone)]
pub struct SetClause {
    pub column: String,
    pub value: Value,
}

impl SetClause {
    /// Creates a set clause.
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// Updates the records at the given rids.
///
/// Per record: the old composite keys are removed from every index, the
/// set clauses are applied in memory, the record is written back, and the
/// new keys are inserted. The pre-image goes into the write set before the
/// record file is touched.
pub struct UpdateExecutor<'a> {
    table: &'a Table,
    set_clauses: Vec<SetClause>,
    rids: Vec<Rid>,
    cols: Vec<ColMeta>,
    ctx: &'a Context,
}

impl<'a> UpdateExecutor<'a> {
    /// Validates the set clauses against the table schema.
    pub fn new(
        table: &'a Table,
        set_clauses: Vec<SetClause>,
        rids: Vec<Rid>,
        ctx: &'a Context,
    ) -> Result<Self> {
        let meta = table.meta();
        for clause in &set_clauses {
            let col = meta.get_col(&clause.column)?;
            if clause.value.col_type() != col.col_type {
                return Err(CorvusError::IncompatibleType {
                    expected: col.col_type.to_string(),
                    actual: clause.value.col_type().to_string(),
                });
            }
        }

        Ok(Self {
            table,
            set_clauses,
            rids,
            cols: meta.cols,
            ctx,
        })
    }

    /// Runs the update. Returns the number of records updated.
    pub fn execute(&mut self) -> Result<usize> {
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

        let indexes = self.table.indexes();
        let mut updated = 0;

        for &rid in &self.rids {
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

            let old = self.table.file.get_record(rid)?;

            // Old composite keys out before the record changes
            for ix in &indexes {
                ix.index.delete_entry(&ix.meta.build_key(&old.data))?;
            }

            let mut new = BytesMut::from(&old.data[..]);
            for clause in &self.set_clauses {
                let col = self
                    .cols
                    .iter()
                    .find(|c| c.name == clause.column)
                    .ok_or_else(|| CorvusError::ColumnNotFound(clause.column.clone()))?;
                new[col.offset..col.offset + col.len]
                    .copy_from_slice(&clause.value.to_bytes(col.len));
            }

            self.ctx.txn.append_write(WriteRecord::new(
                self.table.name.as_str(),
                WriteKind::Update {
                    rid,
                    old: old.data.clone(),
                },
            ));
            self.table.file.update_record(rid, &new)?;

            for ix in &indexes {
                ix.index.insert_entry(&ix.meta.build_key(&new), rid)?;
            }
            updated += 1;
        }
        Ok(updated)
    }
}

impl<'a> Executor for UpdateExecutor<'a> {
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
        Err(CorvusError::Internal("update produces no tuples".into()))
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        0
    }
}
