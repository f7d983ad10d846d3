//! The open/next executor contract.

use std::sync::Arc;
use corvus_common::page::Rid;
use corvus_common::{ColMeta, Result};
use corvus_storage::Record;
use corvus_txn::{LockManager, Transaction};

/// Per-statement execution context: the transaction and the lock manager
/// it acquires through.
///
/// Lock acquisition is the executor's responsibility at open time; a failed
/// acquisition surfaces as `TransactionAborted` and the caller must run the
/// transaction manager's abort path.
pub struct Context {
    pub lock_mgr: Arc<LockManager>,
    pub txn: Arc<Transaction>,
}

impl Context {
    /// Creates a context.
    pub fn new(lock_mgr: Arc<LockManager>, txn: Arc<Transaction>) -> Self {
        Self { lock_mgr, txn }
    }
}

/// Common iterator contract for all executors.
///
/// The pipeline composes by ownership: a parent owns its children as
/// `Box<dyn Executor>`. Terminal mutators (insert, update, delete) treat
/// `begin_tuple`/`next_tuple` as no-ops and run their work through their
/// own `execute` method instead.
pub trait Executor {
    /// Positions at the first qualifying tuple.
    fn begin_tuple(&mut self) -> Result<()>;

    /// Advances to the next qualifying tuple. Idempotent at the end.
    fn next_tuple(&mut self) -> Result<()>;

    /// Returns true when the executor is exhausted.
    fn is_end(&self) -> bool;

    /// Returns the current tuple. Undefined at the end.
    fn current(&self) -> Result<Record>;

    /// Output schema of this executor.
    fn columns(&self) -> &[ColMeta];

    /// Byte length of each output tuple.
    fn tuple_len(&self) -> usize;

    /// Location of the current tuple, for executors that surface one.
    fn rid(&self) -> Rid {
        Rid::INVALID
    }
}
