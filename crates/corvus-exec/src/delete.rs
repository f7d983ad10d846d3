//! Delete executor.

use crate::db::Table;
use crate::executor::{Context, Executor};
use crate::predicate::{eval_conditions, Condition};
use corvus_common::page::Rid;
use corvus_common::{ColMeta, CorvusError, Result};
use corvus_storage::Record;
use corvus_txn::{WriteKind, WriteRecord};

/// Deletes the records at the given rids.
///
/// A record that no longer exists is skipped silently (a concurrent
/// deleter got there first), and the predicate is re-checked against the
/// live record before anything is touched. Composite keys come out of
/// every index before the record itself is removed; the pre-image goes
/// into the write set so an abort can re-insert at the original rid.
pub struct DeleteExecutor<'a> {
    table: &'a Table,
    conds: Vec<Condition>,
    rids: Vec<Rid>,
    cols: Vec<ColMeta>,
    ctx: &'a Context,
}

impl<'a> DeleteExecutor<'a> {
    /// Creates a delete over the given target rids.
    pub fn new(
        table: &'a Table,
        conds: Vec<Condition>,
        rids: Vec<Rid>,
        ctx: &'a Context,
    ) -> Self {
        let cols = table.meta().cols;
        Self {
            table,
            conds,
            rids,
            cols,
            ctx,
        }
    }

    /// Runs the delete. Returns the number of records deleted.
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
        let mut deleted = 0;

        for &rid in &self.rids {
            if !self.table.file.is_record(rid)? {
                continue;
            }

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

            let record = self.table.file.get_record(rid)?;
            if !eval_conditions(&self.conds, &self.cols, &record.data)? {
                continue;
            }

            for ix in &indexes {
                ix.index.delete_entry(&ix.meta.build_key(&record.data))?;
            }

            self.ctx.txn.append_write(WriteRecord::new(
                self.table.name.as_str(),
                WriteKind::Delete {
                    rid,
                    old: record.data.clone(),
                },
            ));
            self.table.file.delete_record(rid)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

impl<'a> Executor for DeleteExecutor<'a> {
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
        Err(CorvusError::Internal("delete produces no tuples".into()))
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        0
    }
}
