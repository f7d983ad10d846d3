//! Transaction lifecycle management.

use crate::lock::LockManager;
use crate::transaction::{IsolationLevel, Transaction, TxnId, TxnState, WriteKind, WriteRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use corvus_common::page::Rid;
use corvus_common::Result;

/// Record-file operations the rollback path needs, keyed by table name.
///
/// Implemented by the database layer; keeping it a trait means the
/// transaction manager does not depend on the catalog. Pre-images come from
/// the write set verbatim.
pub trait RecordStore: Send + Sync {
    /// Undoes an insert by deleting the record.
    fn rollback_insert(&self, table: &str, rid: Rid) -> Result<()>;
    /// Undoes a delete by re-inserting the pre-image at its original rid.
    fn rollback_delete(&self, table: &str, rid: Rid, old: &[u8]) -> Result<()>;
    /// Undoes an update by restoring the pre-image.
    fn rollback_update(&self, table: &str, rid: Rid, old: &[u8]) -> Result<()>;
}

/// Allocates transactions and drives commit and abort.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_mgr: Arc<LockManager>,
    txn_map: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Creates a transaction manager over the given lock manager.
    pub fn new(lock_mgr: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_mgr,
            txn_map: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the lock manager.
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_mgr
    }

    /// Begins a transaction.
    ///
    /// With `None`, allocates a fresh transaction (monotonic id,
    /// SERIALIZABLE); an existing transaction is re-registered and
    /// returned unchanged.
    pub fn begin(&self, txn: Option<Arc<Transaction>>) -> Arc<Transaction> {
        let txn = txn.unwrap_or_else(|| {
            let id = TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
            Arc::new(Transaction::new(id, IsolationLevel::Serializable))
        });
        self.txn_map.lock().insert(txn.id(), txn.clone());
        txn
    }

    /// Begins a fresh transaction at the given isolation level.
    pub fn begin_with_isolation(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let id = TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let txn = Arc::new(Transaction::new(id, isolation));
        self.txn_map.lock().insert(txn.id(), txn.clone());
        txn
    }

    /// Looks up a registered transaction by id.
    pub fn get_transaction(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.lock().get(&id).cloned()
    }

    /// Commits: the write set is dropped without undo, every lock is
    /// released, and the transaction is marked COMMITTED.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.take_writes();
        self.release_locks(txn);
        txn.set_state(TxnState::Committed);
    }

    /// Aborts: the write set is drained in LIFO order applying the inverse
    /// record-file operation per entry, locks are released, and the
    /// transaction is marked ABORTED.
    pub fn abort(&self, txn: &Arc<Transaction>, store: &dyn RecordStore) -> Result<()> {
        let writes = txn.take_writes();
        for WriteRecord { table, kind } in writes.into_iter().rev() {
            match kind {
                WriteKind::Insert { rid } => store.rollback_insert(&table, rid)?,
                WriteKind::Delete { rid, old } => store.rollback_delete(&table, rid, &old)?,
                WriteKind::Update { rid, old } => store.rollback_update(&table, rid, &old)?,
            }
        }
        self.release_locks(txn);
        txn.set_state(TxnState::Aborted);
        Ok(())
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for id in txn.lock_set() {
            self.lock_mgr.unlock(txn, id);
        }
        txn.clear_locks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockDataId;
    use bytes::Bytes;
    use parking_lot::Mutex as PMutex;

    /// Records rollback calls for inspection.
    #[derive(Default)]
    struct MockStore {
        calls: PMutex<Vec<String>>,
    }

    impl RecordStore for MockStore {
        fn rollback_insert(&self, table: &str, rid: Rid) -> Result<()> {
            self.calls.lock().push(format!("delete {} {}", table, rid));
            Ok(())
        }
        fn rollback_delete(&self, table: &str, rid: Rid, old: &[u8]) -> Result<()> {
            self.calls
                .lock()
                .push(format!("insert {} {} {}", table, rid, old.len()));
            Ok(())
        }
        fn rollback_update(&self, table: &str, rid: Rid, old: &[u8]) -> Result<()> {
            self.calls
                .lock()
                .push(format!("update {} {} {}", table, rid, old.len()));
            Ok(())
        }
    }

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new()))
    }

    #[test]
    fn test_begin_allocates_monotonic_ids() {
        let tm = manager();
        let t1 = tm.begin(None);
        let t2 = tm.begin(None);
        assert!(t2.id().0 > t1.id().0);
        assert_eq!(t1.state(), TxnState::Default);
        assert!(tm.get_transaction(t1.id()).is_some());
    }

    #[test]
    fn test_begin_with_existing_transaction() {
        let tm = manager();
        let t1 = tm.begin(None);
        let t1_again = tm.begin(Some(t1.clone()));
        assert_eq!(t1.id(), t1_again.id());
    }

    #[test]
    fn test_commit_releases_locks_and_clears_writes() {
        let tm = manager();
        let txn = tm.begin(None);

        assert!(tm.lock_manager().lock_shared_on_table(&txn, 0));
        txn.append_write(WriteRecord::new("t", WriteKind::Insert { rid: Rid::new(1, 0) }));

        tm.commit(&txn);
        assert_eq!(txn.state(), TxnState::Committed);
        assert_eq!(txn.write_count(), 0);
        assert!(txn.lock_set().is_empty());

        // The table lock is gone: another transaction takes X immediately
        let t2 = tm.begin(None);
        assert!(tm.lock_manager().lock_exclusive_on_table(&t2, 0));
    }

    #[test]
    fn test_abort_applies_inverse_operations_in_lifo_order() {
        let tm = manager();
        let txn = tm.begin(None);
        let store = MockStore::default();

        txn.append_write(WriteRecord::new("t", WriteKind::Insert { rid: Rid::new(1, 0) }));
        txn.append_write(WriteRecord::new(
            "t",
            WriteKind::Update {
                rid: Rid::new(1, 1),
                old: Bytes::from_static(b"before"),
            },
        ));
        txn.append_write(WriteRecord::new(
            "t",
            WriteKind::Delete {
                rid: Rid::new(1, 2),
                old: Bytes::from_static(b"gone"),
            },
        ));

        tm.abort(&txn, &store).unwrap();
        assert_eq!(txn.state(), TxnState::Aborted);

        let calls = store.calls.lock();
        assert_eq!(
            *calls,
            vec![
                "insert t 1:2 4".to_string(),
                "update t 1:1 6".to_string(),
                "delete t 1:0".to_string(),
            ]
        );
    }

    #[test]
    fn test_abort_releases_locks() {
        let tm = manager();
        let txn = tm.begin(None);
        let store = MockStore::default();

        assert!(tm.lock_manager().lock_exclusive_on_table(&txn, 0));
        tm.abort(&txn, &store).unwrap();
        assert!(txn.lock_set().is_empty());

        let t2 = tm.begin(None);
        assert!(tm.lock_manager().lock_shared_on_table(&t2, 0));
        assert!(tm
            .lock_manager()
            .group_mode(LockDataId::table(0))
            .is_some());
    }
}
