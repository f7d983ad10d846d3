//! Nested-loop join executor.

use crate::executor::Executor;
use crate::predicate::{eval_conditions, Condition};
use bytes::BytesMut;
use corvus_common::{ColMeta, Result};
use corvus_storage::Record;

/// Joins two children by iterating their Cartesian product and filtering
/// with a conjunction over the combined row.
///
/// The combined tuple is `left ∥ right`; right-hand column offsets are
/// shifted by the left child's tuple length, so columns from both sides
/// stay addressable by qualified name. The right child advances fastest;
/// the join ends when the left child is exhausted.
pub struct NestedLoopJoinExecutor<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    conds: Vec<Condition>,
    cols: Vec<ColMeta>,
    len: usize,
}

impl<'a> NestedLoopJoinExecutor<'a> {
    /// Builds a join over two children.
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        conds: Vec<Condition>,
    ) -> Self {
        let len = left.tuple_len() + right.tuple_len();
        let mut cols = left.columns().to_vec();
        for col in right.columns() {
            let mut col = col.clone();
            col.offset += left.tuple_len();
            cols.push(col);
        }

        Self {
            left,
            right,
            conds,
            cols,
            len,
        }
    }

    /// Materializes the combined tuple for the current pair.
    fn combined(&self) -> Result<Record> {
        let l = self.left.current()?;
        let r = self.right.current()?;
        let mut buf = BytesMut::with_capacity(self.len);
        buf.extend_from_slice(&l.data);
        buf.extend_from_slice(&r.data);
        Ok(Record::new(buf.freeze()))
    }

    /// Exhausts the left child, forcing the end state.
    fn finish(&mut self) -> Result<()> {
        while !self.left.is_end() {
            self.left.next_tuple()?;
        }
        Ok(())
    }

    /// Advances until the current pair passes the predicate or the product
    /// is exhausted.
    fn settle(&mut self) -> Result<()> {
        loop {
            if self.left.is_end() {
                return Ok(());
            }
            if self.right.is_end() {
                self.left.next_tuple()?;
                if self.left.is_end() {
                    return Ok(());
                }
                self.right.begin_tuple()?;
                if self.right.is_end() {
                    // Right child yields nothing at all
                    return self.finish();
                }
            }
            let row = self.combined()?;
            if eval_conditions(&self.conds, &self.cols, &row.data)? {
                return Ok(());
            }
            self.right.next_tuple()?;
        }
    }
}

impl<'a> Executor for NestedLoopJoinExecutor<'a> {
    fn begin_tuple(&mut self) -> Result<()> {
        self.left.begin_tuple()?;
        if self.left.is_end() {
            return Ok(());
        }
        self.right.begin_tuple()?;
        if self.right.is_end() {
            return self.finish();
        }
        self.settle()
    }

    fn next_tuple(&mut self) -> Result<()> {
        if self.left.is_end() {
            return Ok(());
        }
        self.right.next_tuple()?;
        self.settle()
    }

    fn is_end(&self) -> bool {
        self.left.is_end()
    }

    fn current(&self) -> Result<Record> {
        self.combined()
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }
}
