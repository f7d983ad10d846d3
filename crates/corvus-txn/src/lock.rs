//! Multi-granularity lock manager.
//!
//! Resources are tables and records, locked in one of five modes (IS, IX,
//! S, SIX, X). Each resource carries a FIFO request queue, the group mode
//! of its granted requests, and a condition variable; a single global mutex
//! over the lock table is the sole serialization point. Waiters re-check
//! their predicate on every wakeup, so spurious wakeups are tolerated.
//!
//! There is no deadlock detection: a cycle in the wait-for graph blocks
//! forever. A higher layer must impose timeouts or cycle breaking.

use crate::transaction::{IsolationLevel, Transaction, TxnState};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use corvus_common::page::Rid;

/// Lock request modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Intention shared: a shared lock will be taken on some child.
    IS,
    /// Intention exclusive: an exclusive lock will be taken on some child.
    IX,
    /// Shared.
    S,
    /// Shared with intent to write children.
    SIX,
    /// Exclusive.
    X,
}

impl LockMode {
    /// Returns true for the shared family, which READ_UNCOMMITTED
    /// transactions may not acquire.
    pub fn is_shared_family(self) -> bool {
        matches!(self, LockMode::IS | LockMode::S | LockMode::SIX)
    }

    /// Combined mode after strengthening a held lock with another request.
    pub fn upgrade(self, other: LockMode) -> LockMode {
        use LockMode::*;
        match (self, other) {
            (X, _) | (_, X) => X,
            (SIX, _) | (_, SIX) => SIX,
            (S, IX) | (IX, S) => SIX,
            (S, _) | (_, S) => S,
            (IX, _) | (_, IX) => IX,
            (IS, IS) => IS,
        }
    }
}

/// The coarsest mode compatible with every granted request on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// No granted requests.
    NonLock,
    IS,
    IX,
    S,
    SIX,
    X,
}

impl GroupMode {
    /// Compatibility matrix: can a request of `mode` be granted while this
    /// group mode holds?
    pub fn admits(self, mode: LockMode) -> bool {
        match self {
            GroupMode::NonLock => true,
            GroupMode::IS => mode != LockMode::X,
            GroupMode::IX => matches!(mode, LockMode::IS | LockMode::IX),
            GroupMode::S => matches!(mode, LockMode::IS | LockMode::S),
            GroupMode::SIX => mode == LockMode::IS,
            GroupMode::X => false,
        }
    }

    /// Group mode after additionally granting `mode` (lattice join).
    pub fn raise(self, mode: LockMode) -> GroupMode {
        use GroupMode as G;
        use LockMode as L;
        match (self, mode) {
            (G::X, _) | (_, L::X) => G::X,
            (G::SIX, _) | (_, L::SIX) => G::SIX,
            (G::S, L::IX) | (G::IX, L::S) => G::SIX,
            (G::S, _) | (_, L::S) => G::S,
            (G::IX, _) | (_, L::IX) => G::IX,
            (G::IS, L::IS) | (G::NonLock, L::IS) => G::IS,
        }
    }
}

/// Lock granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Table,
    Record,
}

/// Identity of a lockable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockDataId {
    /// The owning table's file id.
    pub table_id: u32,
    /// The record, for record-granularity locks.
    pub rid: Option<Rid>,
    pub granularity: Granularity,
}

impl LockDataId {
    /// Identity of a whole-table lock.
    pub fn table(table_id: u32) -> Self {
        Self {
            table_id,
            rid: None,
            granularity: Granularity::Table,
        }
    }

    /// Identity of a single-record lock.
    pub fn record(table_id: u32, rid: Rid) -> Self {
        Self {
            table_id,
            rid: Some(rid),
            granularity: Granularity::Record,
        }
    }
}

/// One queued lock request.
#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: crate::transaction::TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-resource queue state.
struct ResourceEntry {
    queue: VecDeque<LockRequest>,
    group_mode: GroupMode,
    cv: Arc<Condvar>,
}

impl Default for ResourceEntry {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            group_mode: GroupMode::NonLock,
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// The lock manager.
///
/// Acquisition entry points return `false` when the transaction cannot
/// lock (READ_UNCOMMITTED asking for a shared-family mode, or acquisition
/// after the shrinking phase began); the transaction is marked aborted and
/// the caller must run the abort path.
#[derive(Default)]
pub struct LockManager {
    table: Mutex<HashMap<LockDataId, ResourceEntry>>,
}

impl LockManager {
    /// Creates an empty lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires `mode` on `id` for `txn`, blocking until compatible.
    fn acquire(&self, txn: &Transaction, id: LockDataId, mode: LockMode) -> bool {
        let mut table = self.table.lock();

        // Isolation and 2PL phase checks
        if (txn.isolation() == IsolationLevel::ReadUncommitted && mode.is_shared_family())
            || txn.state() == TxnState::Shrinking
        {
            txn.set_state(TxnState::Aborted);
        }
        if txn.state() == TxnState::Aborted {
            return false;
        }
        txn.set_state(TxnState::Growing);

        if txn.holds_lock(id) {
            // Upgrade in place: holders bypass the queue, which prevents a
            // holder from deadlocking against its own strengthening request
            let entry = table.entry(id).or_default();
            for req in entry.queue.iter_mut() {
                if req.txn_id == txn.id() {
                    req.mode = req.mode.upgrade(mode);
                }
            }
            entry.group_mode = entry.group_mode.raise(mode);
            entry.cv.notify_all();
            return true;
        }

        txn.add_lock(id);
        let cv = {
            let entry = table.entry(id).or_default();
            entry.queue.push_back(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
            entry.cv.clone()
        };

        // Wait until the group mode admits us and every request ahead of
        // ours has been granted (FIFO among distinct transactions)
        loop {
            let ready = match table.get(&id) {
                Some(entry) => {
                    entry.group_mode.admits(mode)
                        && entry
                            .queue
                            .iter()
                            .take_while(|r| r.txn_id != txn.id())
                            .all(|r| r.granted)
                }
                None => true,
            };
            if ready {
                break;
            }
            cv.wait(&mut table);
        }

        let entry = table.entry(id).or_default();
        for req in entry.queue.iter_mut() {
            if req.txn_id == txn.id() {
                req.granted = true;
            }
        }
        entry.group_mode = entry.group_mode.raise(mode);
        entry.cv.notify_all();
        true
    }

    /// Acquires a record-granularity shared lock.
    pub fn lock_shared_on_record(&self, txn: &Transaction, rid: Rid, table_id: u32) -> bool {
        self.acquire(txn, LockDataId::record(table_id, rid), LockMode::S)
    }

    /// Acquires a record-granularity exclusive lock.
    pub fn lock_exclusive_on_record(&self, txn: &Transaction, rid: Rid, table_id: u32) -> bool {
        self.acquire(txn, LockDataId::record(table_id, rid), LockMode::X)
    }

    /// Acquires a table-granularity shared lock.
    pub fn lock_shared_on_table(&self, txn: &Transaction, table_id: u32) -> bool {
        self.acquire(txn, LockDataId::table(table_id), LockMode::S)
    }

    /// Acquires a table-granularity exclusive lock.
    pub fn lock_exclusive_on_table(&self, txn: &Transaction, table_id: u32) -> bool {
        self.acquire(txn, LockDataId::table(table_id), LockMode::X)
    }

    /// Acquires a table-granularity intention-shared lock.
    pub fn lock_is_on_table(&self, txn: &Transaction, table_id: u32) -> bool {
        self.acquire(txn, LockDataId::table(table_id), LockMode::IS)
    }

    /// Acquires a table-granularity intention-exclusive lock.
    pub fn lock_ix_on_table(&self, txn: &Transaction, table_id: u32) -> bool {
        self.acquire(txn, LockDataId::table(table_id), LockMode::IX)
    }

    /// Releases every request `txn` holds on `id`.
    ///
    /// Moves the transaction to its shrinking phase, removes its requests,
    /// recomputes the group mode from the remaining granted requests, and
    /// wakes all waiters.
    pub fn unlock(&self, txn: &Transaction, id: LockDataId) -> bool {
        let mut table = self.table.lock();

        txn.set_state(TxnState::Shrinking);
        if !txn.remove_lock(id) {
            return false;
        }

        if let Some(entry) = table.get_mut(&id) {
            entry.queue.retain(|r| r.txn_id != txn.id());
            entry.group_mode = entry
                .queue
                .iter()
                .filter(|r| r.granted)
                .fold(GroupMode::NonLock, |g, r| g.raise(r.mode));
            entry.cv.notify_all();
        }
        true
    }

    /// Returns the current group mode of a resource, for diagnostics and
    /// tests. `None` means the resource has never been locked.
    pub fn group_mode(&self, id: LockDataId) -> Option<GroupMode> {
        self.table.lock().get(&id).map(|e| e.group_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxnId;

    fn txn(id: u32) -> Transaction {
        Transaction::new(TxnId(id), IsolationLevel::Serializable)
    }

    #[test]
    fn test_compatibility_matrix() {
        use GroupMode as G;
        use LockMode as L;

        // Rows hold, columns request
        let cases = [
            (G::IS, [true, true, true, true, false]),
            (G::IX, [true, true, false, false, false]),
            (G::S, [true, false, true, false, false]),
            (G::SIX, [true, false, false, false, false]),
            (G::X, [false, false, false, false, false]),
        ];
        let modes = [L::IS, L::IX, L::S, L::SIX, L::X];

        for (group, expected) in cases {
            for (mode, want) in modes.iter().zip(expected) {
                assert_eq!(
                    group.admits(*mode),
                    want,
                    "{:?} admits {:?}",
                    group,
                    mode
                );
            }
        }
        for mode in modes {
            assert!(G::NonLock.admits(mode));
        }
    }

    #[test]
    fn test_group_mode_raise() {
        use GroupMode as G;
        use LockMode as L;

        assert_eq!(G::NonLock.raise(L::IS), G::IS);
        assert_eq!(G::NonLock.raise(L::X), G::X);
        assert_eq!(G::IS.raise(L::IX), G::IX);
        assert_eq!(G::S.raise(L::IX), G::SIX);
        assert_eq!(G::IX.raise(L::S), G::SIX);
        assert_eq!(G::SIX.raise(L::IS), G::SIX);
        assert_eq!(G::S.raise(L::X), G::X);
    }

    #[test]
    fn test_lock_mode_upgrade() {
        use LockMode as L;
        assert_eq!(L::S.upgrade(L::IX), L::SIX);
        assert_eq!(L::IS.upgrade(L::S), L::S);
        assert_eq!(L::S.upgrade(L::X), L::X);
        assert_eq!(L::IS.upgrade(L::IS), L::IS);
    }

    #[test]
    fn test_shared_locks_coexist() {
        let lm = LockManager::new();
        let t1 = txn(1);
        let t2 = txn(2);

        assert!(lm.lock_shared_on_table(&t1, 0));
        assert!(lm.lock_shared_on_table(&t2, 0));
        assert_eq!(lm.group_mode(LockDataId::table(0)), Some(GroupMode::S));
        assert_eq!(t1.state(), TxnState::Growing);
        assert_eq!(t2.state(), TxnState::Growing);
    }

    #[test]
    fn test_intent_locks_coexist() {
        let lm = LockManager::new();
        let t1 = txn(1);
        let t2 = txn(2);

        assert!(lm.lock_is_on_table(&t1, 0));
        assert!(lm.lock_ix_on_table(&t2, 0));
        assert_eq!(lm.group_mode(LockDataId::table(0)), Some(GroupMode::IX));
    }

    #[test]
    fn test_upgrade_s_plus_ix_is_six() {
        let lm = LockManager::new();
        let t1 = txn(1);

        assert!(lm.lock_shared_on_table(&t1, 0));
        assert!(lm.lock_ix_on_table(&t1, 0));
        assert_eq!(lm.group_mode(LockDataId::table(0)), Some(GroupMode::SIX));
    }

    #[test]
    fn test_read_uncommitted_cannot_lock_shared() {
        let lm = LockManager::new();
        let t1 = Transaction::new(TxnId(1), IsolationLevel::ReadUncommitted);

        assert!(!lm.lock_shared_on_record(&t1, Rid::new(1, 1), 0));
        assert_eq!(t1.state(), TxnState::Aborted);
    }

    #[test]
    fn test_read_uncommitted_can_lock_exclusive() {
        let lm = LockManager::new();
        let t1 = Transaction::new(TxnId(1), IsolationLevel::ReadUncommitted);

        assert!(lm.lock_exclusive_on_record(&t1, Rid::new(1, 1), 0));
    }

    #[test]
    fn test_acquire_after_shrinking_aborts() {
        let lm = LockManager::new();
        let t1 = txn(1);

        assert!(lm.lock_shared_on_table(&t1, 0));
        assert!(lm.unlock(&t1, LockDataId::table(0)));
        assert_eq!(t1.state(), TxnState::Shrinking);

        assert!(!lm.lock_shared_on_table(&t1, 1));
        assert_eq!(t1.state(), TxnState::Aborted);
    }

    #[test]
    fn test_unlock_unknown_lock_returns_false() {
        let lm = LockManager::new();
        let t1 = txn(1);
        assert!(!lm.unlock(&t1, LockDataId::table(0)));
    }

    #[test]
    fn test_unlock_recomputes_group_mode() {
        let lm = LockManager::new();
        let t1 = txn(1);
        let t2 = txn(2);

        assert!(lm.lock_is_on_table(&t1, 0));
        assert!(lm.lock_shared_on_table(&t2, 0));
        assert_eq!(lm.group_mode(LockDataId::table(0)), Some(GroupMode::S));

        assert!(lm.unlock(&t2, LockDataId::table(0)));
        assert_eq!(lm.group_mode(LockDataId::table(0)), Some(GroupMode::IS));

        assert!(lm.unlock(&t1, LockDataId::table(0)));
        assert_eq!(lm.group_mode(LockDataId::table(0)), Some(GroupMode::NonLock));
    }

    #[test]
    fn test_exclusive_request_blocks_then_unblocks() {
        use std::sync::mpsc;
        use std::time::Duration;

        let lm = Arc::new(LockManager::new());
        let t1 = Arc::new(txn(1));
        let rid = Rid::new(1, 1);

        assert!(lm.lock_shared_on_record(&t1, rid, 0));

        let (tx, rx) = mpsc::channel();
        let lm2 = lm.clone();
        let handle = std::thread::spawn(move || {
            let t2 = txn(2);
            let ok = lm2.lock_exclusive_on_record(&t2, rid, 0);
            tx.send(ok).unwrap();
        });

        // T2 must be blocked while T1 holds S
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        // Release: T2 unblocks and succeeds
        assert!(lm.unlock(&t1, LockDataId::record(0, rid)));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        handle.join().unwrap();

        assert_eq!(
            lm.group_mode(LockDataId::record(0, rid)),
            Some(GroupMode::X)
        );
    }

    #[test]
    fn test_fifo_waiters_wake_in_order() {
        use std::sync::mpsc;
        use std::time::Duration;

        let lm = Arc::new(LockManager::new());
        let holder = Arc::new(txn(1));
        assert!(lm.lock_exclusive_on_table(&holder, 0));

        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();
        for i in 2..5u32 {
            let lm = lm.clone();
            let tx = tx.clone();
            handles.push(std::thread::spawn(move || {
                let t = txn(i);
                assert!(lm.lock_exclusive_on_table(&t, 0));
                tx.send(i).unwrap();
                // Hold briefly so later waiters stay queued behind us
                std::thread::sleep(Duration::from_millis(20));
                lm.unlock(&t, LockDataId::table(0));
            }));
            // Ensure queue order matches spawn order
            std::thread::sleep(Duration::from_millis(50));
        }

        lm.unlock(&holder, LockDataId::table(0));

        let mut order = Vec::new();
        for _ in 2..5 {
            order.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(order, vec![2, 3, 4]);
    }

    #[test]
    fn test_compatible_acquire_after_unlock_does_not_block() {
        let lm = LockManager::new();
        let t1 = txn(1);
        let t2 = txn(2);

        assert!(lm.lock_exclusive_on_table(&t1, 0));
        assert!(lm.unlock(&t1, LockDataId::table(0)));

        // Runs on this thread: would hang the test if it blocked
        assert!(lm.lock_shared_on_table(&t2, 0));
    }
}
