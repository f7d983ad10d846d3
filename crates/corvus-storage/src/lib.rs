//! Storage engine for CorvusDB.
//!
//! This crate provides:
//! - Composite-key comparison shared by indexes and predicate evaluation
//! - Fixed-size record files with bitmap-slotted pages
//! - Disk-resident B+tree indexes with range iteration

mod btree;
mod compare;
mod record;

pub use btree::{BTreeIndex, Iid, IndexScan, IndexSchema, Node, NodeHeader};
pub use compare::{compare_col, compare_keys};
pub use record::{Record, RecordFile, RecordScan};
