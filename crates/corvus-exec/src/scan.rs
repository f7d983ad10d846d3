//! Sequential scan executor.

use crate::db::Table;
use crate::executor::{Context, Executor};
use crate::predicate::{eval_conditions, Condition};
use corvus_common::page::Rid;
use corvus_common::{ColMeta, CorvusError, Result};
use corvus_storage::{Record, RecordScan};

/// Scans a table's record file, yielding tuples that pass a conjunction of
/// conditions.
///
/// Takes a table-level IS lock at open and a shared lock on every record it
/// reads, matching the hierarchy: table intent first, then record locks.
pub struct SeqScanExecutor<'a> {
    table: &'a Table,
    conds: Vec<Condition>,
    cols: Vec<ColMeta>,
    len: usize,
    ctx: &'a Context,
    scan: Option<RecordScan<'a>>,
    rid: Rid,
}

impl<'a> SeqScanExecutor<'a> {
    /// Opens a scan. Acquires the table IS lock.
    pub fn new(table: &'a Table, conds: Vec<Condition>, ctx: &'a Context) -> Result<Self> {
        if !ctx.lock_mgr.lock_is_on_table(&ctx.txn, table.file_id) {
            return Err(CorvusError::TransactionAborted(format!(
                "IS lock denied on table {}",
                table.name
            )));
        }

        let meta = table.meta();
        let len = meta.record_size();
        Ok(Self {
            table,
            conds,
            cols: meta.cols,
            len,
            ctx,
            scan: None,
            rid: Rid::INVALID,
        })
    }

    /// Advances the underlying scan until a qualifying record or the end.
    ///
    /// Every record read is locked shared before the predicate runs.
    fn settle(&mut self) -> Result<()> {
        let scan = match self.scan.as_mut() {
            Some(scan) => scan,
            None => return Ok(()),
        };
        while !scan.is_end() {
            let rid = scan.rid();
            if !self
                .ctx
                .lock_mgr
                .lock_shared_on_record(&self.ctx.txn, rid, self.table.file_id)
            {
                return Err(CorvusError::TransactionAborted(format!(
                    "S lock denied on record {}",
                    rid
                )));
            }
            let record = self.table.file.get_record(rid)?;
            if eval_conditions(&self.conds, &self.cols, &record.data)? {
                self.rid = rid;
                return Ok(());
            }
            scan.next()?;
        }
        self.rid = Rid::INVALID;
        Ok(())
    }
}

impl<'a> Executor for SeqScanExecutor<'a> {
    fn begin_tuple(&mut self) -> Result<()> {
        self.scan = Some(self.table.file.scan()?);
        self.settle()
    }

    fn next_tuple(&mut self) -> Result<()> {
        if let Some(scan) = self.scan.as_mut() {
            if !scan.is_end() {
                scan.next()?;
                return self.settle();
            }
        }
        Ok(())
    }

    fn is_end(&self) -> bool {
        self.scan.as_ref().map_or(true, |s| s.is_end())
    }

    fn current(&self) -> Result<Record> {
        self.table.file.get_record(self.rid)
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}
