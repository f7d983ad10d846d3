//! Projection executor.

use crate::executor::Executor;
use crate::predicate::ColRef;
use bytes::BytesMut;
use corvus_common::{ColMeta, CorvusError, Result};
use corvus_storage::Record;

/// Selects columns from a child executor's tuples.
///
/// The projected columns' positions in the child schema and their new
/// offsets are precomputed at construction; each output tuple is a fresh
/// buffer with the selected slices compacted left to right.
pub struct ProjectionExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    /// For each output column, its index in the child schema.
    sel_idxs: Vec<usize>,
    cols: Vec<ColMeta>,
    len: usize,
}

impl<'a> ProjectionExecutor<'a> {
    /// Builds a projection over `child` selecting `sel_cols` in order.
    pub fn new(child: Box<dyn Executor + 'a>, sel_cols: &[ColRef]) -> Result<Self> {
        let child_cols = child.columns();
        let mut sel_idxs = Vec::with_capacity(sel_cols.len());
        let mut cols = Vec::with_capacity(sel_cols.len());
        let mut offset = 0;

        for sel in sel_cols {
            let pos = child_cols
                .iter()
                .position(|c| {
                    c.name == sel.column
                        && sel.table.as_deref().map_or(true, |t| c.tab_name == t)
                })
                .ok_or_else(|| CorvusError::ColumnNotFound(sel.column.clone()))?;
            sel_idxs.push(pos);

            let mut col = child_cols[pos].clone();
            col.offset = offset;
            offset += col.len;
            cols.push(col);
        }

        Ok(Self {
            child,
            sel_idxs,
            cols,
            len: offset,
        })
    }
}

impl<'a> Executor for ProjectionExecutor<'a> {
    fn begin_tuple(&mut self) -> Result<()> {
        self.child.begin_tuple()
    }

    fn next_tuple(&mut self) -> Result<()> {
        self.child.next_tuple()
    }

    fn is_end(&self) -> bool {
        self.child.is_end()
    }

    fn current(&self) -> Result<Record> {
        let input = self.child.current()?;
        let child_cols = self.child.columns();

        let mut buf = BytesMut::zeroed(self.len);
        for (out_col, &src_idx) in self.cols.iter().zip(&self.sel_idxs) {
            let src = &child_cols[src_idx];
            buf[out_col.offset..out_col.offset + out_col.len]
                .copy_from_slice(&input.data[src.offset..src.offset + src.len]);
        }
        Ok(Record::new(buf.freeze()))
    }

    fn columns(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }
}
