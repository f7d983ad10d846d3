//! Index range iteration.

use crate::btree::index::BTreeIndex;
use corvus_common::page::Rid;
use corvus_common::Result;

/// Position of one key slot inside the tree's leaf level.
///
/// An Iid names an index-internal slot, unlike a [`Rid`], which names a
/// record in a table's data file. `leaf_end` positions carry a slot number
/// equal to the last leaf's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iid {
    /// Leaf page number.
    pub page_no: u32,
    /// Key slot within the leaf.
    pub slot_no: u32,
}

impl Iid {
    /// Creates a new Iid.
    pub fn new(page_no: u32, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }
}

impl std::fmt::Display for Iid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_no, self.slot_no)
    }
}

/// Forward scan over `[begin, end)` index positions.
///
/// Advancing rolls across the leaf chain; dereferencing yields the rid at
/// the current slot.
pub struct IndexScan<'a> {
    index: &'a BTreeIndex,
    iid: Iid,
    end: Iid,
}

impl<'a> IndexScan<'a> {
    /// Creates a scan over the given half-open range of positions.
    pub fn new(index: &'a BTreeIndex, begin: Iid, end: Iid) -> Self {
        Self {
            index,
            iid: begin,
            end,
        }
    }

    /// Returns the current position.
    pub fn iid(&self) -> Iid {
        self.iid
    }

    /// Returns true when the scan is exhausted.
    pub fn is_end(&self) -> bool {
        self.iid == self.end
    }

    /// Returns the rid at the current position.
    pub fn rid(&self) -> Result<Rid> {
        self.index.get_rid(self.iid)
    }

    /// Advances by one slot. Idempotent at the end.
    pub fn next(&mut self) -> Result<()> {
        if !self.is_end() {
            self.iid = self.index.advance(self.iid)?;
        }
        Ok(())
    }
}
