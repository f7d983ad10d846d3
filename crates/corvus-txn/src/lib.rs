//! Concurrency control for CorvusDB.
//!
//! This crate provides:
//! - A multi-granularity lock manager with intent modes and blocking
//!   condition-variable wait queues
//! - Transaction state tracking under strict two-phase locking
//! - A transaction manager driving commit and write-set rollback

mod lock;
mod manager;
mod transaction;

pub use lock::{Granularity, GroupMode, LockDataId, LockManager, LockMode};
pub use manager::{RecordStore, TransactionManager};
pub use transaction::{IsolationLevel, Transaction, TxnId, TxnState, WriteKind, WriteRecord};
