//! Transaction state, lock set, and write set.

use crate::lock::LockDataId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use corvus_common::page::Rid;

/// Transaction identifier, allocated monotonically by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(pub u32);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Isolation levels.
///
/// Only the lock-acquisition rules differ between levels; READ_UNCOMMITTED
/// transactions are refused shared-family locks outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Transaction lifecycle states under strict two-phase locking.
///
/// Acquisition moves a transaction to `Growing`; the first unlock moves it
/// to `Shrinking`, after which further acquisition self-aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Default,
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// One undo entry in a transaction's write set.
///
/// Pre-images are captured by the executor at the moment of mutation; the
/// rollback path replays them verbatim and does not reconstruct them.
#[derive(Debug, Clone)]
pub enum WriteKind {
    /// A record this transaction inserted; undone by deleting it.
    Insert { rid: Rid },
    /// A record this transaction deleted; undone by re-inserting the
    /// pre-image at the original rid.
    Delete { rid: Rid, old: Bytes },
    /// A record this transaction overwrote; undone by restoring the
    /// pre-image.
    Update { rid: Rid, old: Bytes },
}

/// A write-set entry: which table, and what to undo.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub table: String,
    pub kind: WriteKind,
}

impl WriteRecord {
    /// Creates a write record.
    pub fn new(table: impl Into<String>, kind: WriteKind) -> Self {
        Self {
            table: table.into(),
            kind,
        }
    }
}

/// A single transaction.
///
/// Shared between the executing thread and the lock manager (which flips
/// the 2PL state while holding the lock-table mutex), so all mutable pieces
/// sit behind their own locks.
pub struct Transaction {
    id: TxnId,
    isolation: IsolationLevel,
    state: Mutex<TxnState>,
    lock_set: Mutex<HashSet<LockDataId>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    /// Creates a transaction in the `Default` state.
    pub fn new(id: TxnId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            isolation,
            state: Mutex::new(TxnState::Default),
            lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the isolation level.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> TxnState {
        *self.state.lock()
    }

    /// Sets the lifecycle state.
    pub fn set_state(&self, state: TxnState) {
        *self.state.lock() = state;
    }

    /// Returns true if this transaction holds some lock on the resource.
    pub fn holds_lock(&self, id: LockDataId) -> bool {
        self.lock_set.lock().contains(&id)
    }

    /// Records a lock in the lock set.
    pub fn add_lock(&self, id: LockDataId) {
        self.lock_set.lock().insert(id);
    }

    /// Removes a lock from the lock set. Returns false if it was absent.
    pub fn remove_lock(&self, id: LockDataId) -> bool {
        self.lock_set.lock().remove(&id)
    }

    /// Snapshots the lock set.
    pub fn lock_set(&self) -> Vec<LockDataId> {
        self.lock_set.lock().iter().copied().collect()
    }

    /// Drops every lock-set entry.
    pub fn clear_locks(&self) {
        self.lock_set.lock().clear();
    }

    /// Appends an undo entry to the write set.
    pub fn append_write(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Drains the write set in insertion order.
    pub fn take_writes(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut *self.write_set.lock())
    }

    /// Returns the number of pending undo entries.
    pub fn write_count(&self) -> usize {
        self.write_set.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_defaults() {
        let txn = Transaction::new(TxnId(1), IsolationLevel::Serializable);
        assert_eq!(txn.id(), TxnId(1));
        assert_eq!(txn.isolation(), IsolationLevel::Serializable);
        assert_eq!(txn.state(), TxnState::Default);
        assert_eq!(txn.write_count(), 0);
        assert!(txn.lock_set().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let txn = Transaction::new(TxnId(1), IsolationLevel::Serializable);
        txn.set_state(TxnState::Growing);
        assert_eq!(txn.state(), TxnState::Growing);
        txn.set_state(TxnState::Shrinking);
        assert_eq!(txn.state(), TxnState::Shrinking);
        txn.set_state(TxnState::Committed);
        assert_eq!(txn.state(), TxnState::Committed);
    }

    #[test]
    fn test_lock_set() {
        let txn = Transaction::new(TxnId(1), IsolationLevel::Serializable);
        let id = LockDataId::table(3);

        assert!(!txn.holds_lock(id));
        txn.add_lock(id);
        assert!(txn.holds_lock(id));
        assert_eq!(txn.lock_set(), vec![id]);

        assert!(txn.remove_lock(id));
        assert!(!txn.remove_lock(id));
        assert!(!txn.holds_lock(id));
    }

    #[test]
    fn test_write_set_drain_preserves_order() {
        let txn = Transaction::new(TxnId(1), IsolationLevel::Serializable);
        txn.append_write(WriteRecord::new("t", WriteKind::Insert { rid: Rid::new(1, 0) }));
        txn.append_write(WriteRecord::new(
            "t",
            WriteKind::Delete {
                rid: Rid::new(1, 1),
                old: Bytes::from_static(b"old"),
            },
        ));
        assert_eq!(txn.write_count(), 2);

        let writes = txn.take_writes();
        assert_eq!(writes.len(), 2);
        assert!(matches!(writes[0].kind, WriteKind::Insert { .. }));
        assert!(matches!(writes[1].kind, WriteKind::Delete { .. }));
        assert_eq!(txn.write_count(), 0);
    }
}
