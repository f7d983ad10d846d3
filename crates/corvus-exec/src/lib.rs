//! Catalog and executor pipeline for CorvusDB.
//!
//! This crate provides:
//! - The database layer: catalog persistence and per-table record-file and
//!   index handles
//! - The open/next executor contract and its implementations: sequential
//!   scan, projection, nested-loop join, insert, update, delete
//! - Conjunctive predicate evaluation shared by scan, join, and delete

mod db;
mod delete;
mod executor;
mod insert;
mod join;
mod predicate;
mod project;
mod scan;
mod update;

pub use db::{Database, Table, TableIndex};
pub use delete::DeleteExecutor;
pub use executor::{Context, Executor};
pub use insert::InsertExecutor;
pub use join::NestedLoopJoinExecutor;
pub use predicate::{eval_conditions, ColRef, CompOp, Condition, Operand};
pub use project::ProjectionExecutor;
pub use scan::SeqScanExecutor;
pub use update::{SetClause, UpdateExecutor};
