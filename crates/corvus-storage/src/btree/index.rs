//! Page-based B+tree index implementation.

use crate::btree::node::{IndexSchema, Node, NodeHeader};
use crate::btree::scan::{Iid, IndexScan};
use crate::compare::compare_keys;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;
use corvus_buffer::{BufferFrame, BufferPool};
use corvus_common::page::{PageId, Rid, NO_PAGE, PAGE_SIZE};
use corvus_common::{ColType, CorvusError, Result};

/// Index file header, persisted on page 0.
///
/// Layout (LE):
/// - root_page, first_leaf, last_leaf, num_pages, first_free_page: 4 bytes each
/// - order: 4 bytes
/// - key_len: 4 bytes
/// - num_cols: 2 bytes, then per column: type (1 byte) + len (2 bytes)
#[derive(Debug, Clone, Copy)]
struct IndexFileHeader {
    root_page: u32,
    first_leaf: u32,
    last_leaf: u32,
    num_pages: u32,
    first_free_page: u32,
}

impl IndexFileHeader {
    fn write(&self, schema: &IndexSchema, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.root_page.to_le_bytes());
        buf[4..8].copy_from_slice(&self.first_leaf.to_le_bytes());
        buf[8..12].copy_from_slice(&self.last_leaf.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[16..20].copy_from_slice(&self.first_free_page.to_le_bytes());
        buf[20..24].copy_from_slice(&(schema.order as u32).to_le_bytes());
        buf[24..28].copy_from_slice(&(schema.key_len as u32).to_le_bytes());
        buf[28..30].copy_from_slice(&(schema.col_types.len() as u16).to_le_bytes());
        let mut off = 30;
        for (ty, len) in schema.col_types.iter().zip(&schema.col_lens) {
            buf[off] = *ty as u8;
            buf[off + 1..off + 3].copy_from_slice(&(*len as u16).to_le_bytes());
            off += 3;
        }
    }

    fn read(buf: &[u8]) -> Result<(Self, IndexSchema)> {
        let hdr = Self {
            root_page: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            first_leaf: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            last_leaf: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            num_pages: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            first_free_page: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        };
        let order = u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]) as usize;
        let num_cols = u16::from_le_bytes([buf[28], buf[29]]) as usize;

        let mut cols = Vec::with_capacity(num_cols);
        let mut off = 30;
        for _ in 0..num_cols {
            let ty = ColType::from_u8(buf[off]).ok_or_else(|| {
                CorvusError::IndexCorrupted("unknown column type in header".into())
            })?;
            let len = u16::from_le_bytes([buf[off + 1], buf[off + 2]]) as usize;
            cols.push((ty, len));
            off += 3;
        }

        let schema = IndexSchema::new(&cols, Some(order))?;
        Ok((hdr, schema))
    }
}

/// A node handle whose page is pinned in the buffer pool.
///
/// The handle owns a copy of the page bytes; `unpin_node` writes the copy
/// back into the frame when the node was modified.
struct PinnedNode<'a> {
    node: Node<'a>,
    frame: &'a BufferFrame,
}

impl<'a> std::ops::Deref for PinnedNode<'a> {
    type Target = Node<'a>;
    fn deref(&self) -> &Node<'a> {
        &self.node
    }
}

impl<'a> std::ops::DerefMut for PinnedNode<'a> {
    fn deref_mut(&mut self) -> &mut Node<'a> {
        &mut self.node
    }
}

/// Builds the rid an internal node stores for a child page.
#[inline]
fn child_rid(page_no: u32) -> Rid {
    Rid::new(page_no, NO_PAGE)
}

/// A disk-resident B+tree mapping composite keys to record ids.
///
/// The index holds a single coarse latch: `get_value`, `insert_entry`,
/// `delete_entry`, and the iterator entry points each acquire it for their
/// full duration, so structural changes are totally ordered.
pub struct BTreeIndex {
    file_id: u32,
    pool: Arc<BufferPool>,
    schema: IndexSchema,
    /// Root latch; also guards the cached file header.
    state: Mutex<IndexFileHeader>,
}

impl BTreeIndex {
    /// Creates a new index file: a header page and an empty root leaf.
    pub fn create(
        pool: Arc<BufferPool>,
        file_id: u32,
        cols: &[(ColType, usize)],
        order: Option<usize>,
    ) -> Result<Self> {
        let schema = IndexSchema::new(cols, order)?;

        let (hdr_page, _) = pool.new_page(file_id)?;
        if hdr_page.page_num != 0 {
            pool.unpin_page(hdr_page, false);
            return Err(CorvusError::Internal(format!(
                "index file {} is not empty",
                file_id
            )));
        }

        let (root_page, root_frame) = pool.new_page(file_id)?;
        {
            let root = Node::init(&schema, root_page.page_num, true);
            root_frame.copy_from(root.data());
        }
        pool.unpin_page(root_page, true);

        let hdr = IndexFileHeader {
            root_page: root_page.page_num,
            first_leaf: root_page.page_num,
            last_leaf: root_page.page_num,
            num_pages: 2,
            first_free_page: NO_PAGE,
        };

        let index = Self {
            file_id,
            pool,
            schema,
            state: Mutex::new(hdr),
        };
        index.write_header(&hdr)?;
        index.pool.unpin_page(hdr_page, true);
        Ok(index)
    }

    /// Opens an existing index file, reading the header page.
    pub fn open(pool: Arc<BufferPool>, file_id: u32) -> Result<Self> {
        let page_id = PageId::new(file_id, 0);
        let frame = pool.fetch_page(page_id)?;
        let parsed = IndexFileHeader::read(&frame.read_data()[..]);
        pool.unpin_page(page_id, false);
        let (hdr, schema) = parsed?;

        Ok(Self {
            file_id,
            pool,
            schema,
            state: Mutex::new(hdr),
        })
    }

    /// Writes the cached header back to page 0.
    fn write_header(&self, hdr: &IndexFileHeader) -> Result<()> {
        let page_id = PageId::new(self.file_id, 0);
        let frame = self.pool.fetch_page(page_id)?;
        hdr.write(&self.schema, &mut frame.write_data()[..]);
        self.pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Persists the header; pages are flushed by the pool.
    pub fn close(&self) -> Result<()> {
        let hdr = *self.state.lock();
        self.write_header(&hdr)
    }

    /// Returns the index file id.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the key schema.
    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// Returns the number of live pages (header page included).
    pub fn num_pages(&self) -> u32 {
        self.state.lock().num_pages
    }

    /// Returns the tree height: 1 when the root is a leaf.
    pub fn height(&self) -> Result<u32> {
        let hdr = self.state.lock();
        let mut height = 1;
        let mut node = self.fetch_node(hdr.root_page)?;
        while !node.is_leaf() {
            let child = node.value_at(0);
            let next = self.fetch_node(child)?;
            self.unpin_node(node, false);
            node = next;
            height += 1;
        }
        self.unpin_node(node, false);
        Ok(height)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.schema.key_len {
            return Err(CorvusError::KeyTooLarge {
                size: key.len(),
                max: self.schema.key_len,
            });
        }
        Ok(())
    }

    // =====================================================================
    // Node handles
    // =====================================================================

    /// Fetches a node page, pinning it. Every fetch must be matched by
    /// `unpin_node` on every exit path.
    fn fetch_node(&self, page_no: u32) -> Result<PinnedNode<'_>> {
        let page_id = PageId::new(self.file_id, page_no);
        let frame = self.pool.fetch_page(page_id)?;
        let data = Box::new(**frame.read_data());
        Ok(PinnedNode {
            node: Node::from_page(&self.schema, page_no, data),
            frame,
        })
    }

    /// Allocates and pins a fresh node page.
    fn create_node(&self, hdr: &mut IndexFileHeader, is_leaf: bool) -> Result<PinnedNode<'_>> {
        let (page_id, frame) = self.pool.new_page(self.file_id)?;
        hdr.num_pages += 1;
        Ok(PinnedNode {
            node: Node::init(&self.schema, page_id.page_num, is_leaf),
            frame,
        })
    }

    /// Unpins a node, writing the handle's copy back if it was modified.
    fn unpin_node(&self, pinned: PinnedNode<'_>, dirty: bool) {
        if dirty {
            pinned.frame.copy_from(pinned.node.data());
        }
        self.pool
            .unpin_page(PageId::new(self.file_id, pinned.node.page_no()), dirty);
    }

    /// Retires a node: threads it onto the free list and drops the page
    /// from the live count.
    fn release_node(&self, hdr: &mut IndexFileHeader, mut node: PinnedNode<'_>) {
        node.set_next_free(hdr.first_free_page);
        hdr.first_free_page = node.page_no();
        hdr.num_pages -= 1;
        self.unpin_node(node, true);
    }

    /// Descends from the root to the leaf covering `key`.
    ///
    /// Pins pages on the way down, unpinning each parent before advancing.
    /// The returned leaf is left pinned; the caller unpins it on every exit
    /// path.
    fn find_leaf(&self, hdr: &IndexFileHeader, key: &[u8]) -> Result<PinnedNode<'_>> {
        let mut current = self.fetch_node(hdr.root_page)?;
        while !current.is_leaf() {
            let child = current.internal_lookup(key);
            let next = self.fetch_node(child)?;
            self.unpin_node(current, false);
            current = next;
        }
        Ok(current)
    }

    // =====================================================================
    // Point operations
    // =====================================================================

    /// Looks up a key, returning its rid if present.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<Rid>> {
        self.check_key(key)?;
        let hdr = self.state.lock();

        let leaf = self.find_leaf(&hdr, key)?;
        let found = leaf.leaf_lookup(key);
        self.unpin_node(leaf, false);
        Ok(found)
    }

    /// Inserts a key/rid pair.
    ///
    /// The index is unique: inserting an existing key fails with
    /// `DuplicateKey` and leaves the tree unchanged.
    pub fn insert_entry(&self, key: &[u8], rid: Rid) -> Result<()> {
        self.check_key(key)?;
        let mut hdr = self.state.lock();

        let mut leaf = self.find_leaf(&hdr, key)?;
        let before = leaf.size();
        if leaf.insert(key, rid) == before {
            self.unpin_node(leaf, false);
            return Err(CorvusError::DuplicateKey);
        }

        // Inserting below the leaf's previous minimum invalidates the
        // first-key invariant up the parent chain
        let front_changed = leaf.get_key(0) == key;
        let leaf_page = leaf.page_no();

        if leaf.size() == self.schema.order {
            let new = self.split(&mut hdr, &mut leaf)?;
            if new.is_leaf() && hdr.last_leaf == leaf.page_no() {
                hdr.last_leaf = new.page_no();
            }
            let split_key = new.get_key(0).to_vec();
            let old_page = leaf.page_no();
            let new_page = new.page_no();
            let parent_page = leaf.parent();
            self.unpin_node(leaf, true);
            self.unpin_node(new, true);
            self.insert_into_parent(&mut hdr, old_page, split_key, new_page, parent_page)?;
        } else {
            self.unpin_node(leaf, true);
        }

        if front_changed {
            self.maintain_parent(leaf_page)?;
        }
        Ok(())
    }

    /// Deletes a key. Returns false if the key was absent.
    pub fn delete_entry(&self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let mut hdr = self.state.lock();

        let mut leaf = self.find_leaf(&hdr, key)?;
        let before = leaf.size();
        if leaf.remove(key) == before {
            self.unpin_node(leaf, false);
            return Ok(false);
        }

        self.coalesce_or_redistribute(&mut hdr, leaf)?;
        Ok(true)
    }

    // =====================================================================
    // Split path
    // =====================================================================

    /// Splits a full node, moving its upper half into a fresh right sibling.
    ///
    /// For leaves the new node is spliced into the leaf chain; for internal
    /// nodes every migrated child is re-parented. Both nodes are left
    /// pinned for the caller.
    fn split<'a>(
        &'a self,
        hdr: &mut IndexFileHeader,
        node: &mut PinnedNode<'a>,
    ) -> Result<PinnedNode<'a>> {
        let mut new = self.create_node(hdr, node.is_leaf())?;
        new.set_parent(node.parent());

        if node.is_leaf() {
            new.set_prev_leaf(node.page_no());
            new.set_next_leaf(node.next_leaf());
            node.set_next_leaf(new.page_no());
            if new.next_leaf() != NO_PAGE {
                let mut succ = self.fetch_node(new.next_leaf())?;
                succ.set_prev_leaf(new.page_no());
                self.unpin_node(succ, true);
            }
        }

        let pos = node.size() / 2;
        let n = node.size() - pos;
        let keys = node.keys_vec(pos, n);
        let rids = node.rids_vec(pos, n);
        new.insert_pairs(0, &keys, &rids);
        node.truncate(pos);

        if !new.is_leaf() {
            for i in 0..n {
                self.maintain_child(&new, i)?;
            }
        }
        Ok(new)
    }

    /// Inserts the separator for a freshly split node into its parent,
    /// splitting upward as long as parents overflow. A split root grows the
    /// tree by one level.
    ///
    /// Works on page numbers: the split children are already written back
    /// before this runs.
    fn insert_into_parent(
        &self,
        hdr: &mut IndexFileHeader,
        old_page: u32,
        key: Vec<u8>,
        new_page: u32,
        parent_page: u32,
    ) -> Result<()> {
        if parent_page == NO_PAGE {
            // The old node was the root: grow the tree
            let mut new_root = self.create_node(hdr, false)?;
            let root_page = new_root.page_no();

            let mut old = self.fetch_node(old_page)?;
            let old_key0 = old.get_key(0).to_vec();
            old.set_parent(root_page);
            self.unpin_node(old, true);

            let mut new = self.fetch_node(new_page)?;
            new.set_parent(root_page);
            self.unpin_node(new, true);

            new_root.insert_pair(0, &old_key0, child_rid(old_page));
            new_root.insert_pair(1, &key, child_rid(new_page));
            self.unpin_node(new_root, true);

            hdr.root_page = root_page;
            return Ok(());
        }

        let mut parent = self.fetch_node(parent_page)?;
        let idx = parent.find_child(old_page).ok_or_else(|| {
            CorvusError::IndexCorrupted("split node missing from its parent".into())
        })?;
        parent.insert_pair(idx + 1, &key, child_rid(new_page));

        {
            let mut new = self.fetch_node(new_page)?;
            new.set_parent(parent_page);
            self.unpin_node(new, true);
        }

        if parent.size() == self.schema.order {
            let new_parent = self.split(hdr, &mut parent)?;
            let split_key = new_parent.get_key(0).to_vec();
            let p_page = parent.page_no();
            let np_page = new_parent.page_no();
            let pp_page = parent.parent();
            self.unpin_node(parent, true);
            self.unpin_node(new_parent, true);
            self.insert_into_parent(hdr, p_page, split_key, np_page, pp_page)?;
        } else {
            self.unpin_node(parent, true);
        }
        Ok(())
    }

    // =====================================================================
    // Delete path
    // =====================================================================

    /// Repairs an under-full node after a delete: nothing, redistribute, or
    /// coalesce, recursing on the parent where a coalesce removed an entry.
    fn coalesce_or_redistribute(
        &self,
        hdr: &mut IndexFileHeader,
        node: PinnedNode<'_>,
    ) -> Result<()> {
        if node.page_no() == hdr.root_page {
            return self.adjust_root(hdr, node);
        }

        if node.size() >= self.schema.min_size() {
            // No structural change, but a removed first key must still
            // propagate upward
            let page_no = node.page_no();
            self.unpin_node(node, true);
            return self.maintain_parent(page_no);
        }

        let parent = self.fetch_node(node.parent())?;
        let idx = parent.find_child(node.page_no()).ok_or_else(|| {
            CorvusError::IndexCorrupted("underfull node missing from its parent".into())
        })?;
        // Prefer the left sibling; the leftmost child falls back to its
        // right sibling
        let sib_pos = if idx > 0 { idx - 1 } else { idx + 1 };
        let sibling = self.fetch_node(parent.value_at(sib_pos))?;

        if node.size() + sibling.size() >= 2 * self.schema.min_size() {
            self.redistribute(sibling, node, parent, idx)
        } else {
            self.coalesce(hdr, sibling, node, parent, idx)
        }
    }

    /// Handles an under-full root: an internal root of size 1 promotes its
    /// only child; an empty leaf root stays as the empty tree.
    fn adjust_root(&self, hdr: &mut IndexFileHeader, root: PinnedNode<'_>) -> Result<()> {
        if !root.is_leaf() && root.size() == 1 {
            let new_root_page = root.value_at(0);
            let mut new_root = self.fetch_node(new_root_page)?;
            new_root.set_parent(NO_PAGE);
            self.unpin_node(new_root, true);
            hdr.root_page = new_root_page;
            self.release_node(hdr, root);
        } else {
            self.unpin_node(root, true);
        }
        Ok(())
    }

    /// Moves one boundary pair from the sibling into the under-full node,
    /// then restores the first-key and parent-pointer invariants.
    fn redistribute(
        &self,
        mut sibling: PinnedNode<'_>,
        mut node: PinnedNode<'_>,
        parent: PinnedNode<'_>,
        idx: usize,
    ) -> Result<()> {
        let internal = !node.is_leaf();

        if idx > 0 {
            // Left sibling donates its last pair to the front of node
            let pos = sibling.size() - 1;
            let key = sibling.get_key(pos).to_vec();
            let rid = sibling.get_rid(pos);
            node.insert_pair(0, &key, rid);
            sibling.erase_pair(pos);

            if internal {
                self.maintain_child(&node, 0)?;
            }
            let node_page = node.page_no();
            self.unpin_node(sibling, true);
            self.unpin_node(node, true);
            self.unpin_node(parent, false);
            self.maintain_parent(node_page)
        } else {
            // Right sibling donates its first pair to the back of node
            let key = sibling.get_key(0).to_vec();
            let rid = sibling.get_rid(0);
            let back = node.size();
            node.insert_pair(back, &key, rid);
            sibling.erase_pair(0);

            if internal {
                self.maintain_child(&node, back)?;
            }
            let node_page = node.page_no();
            let sib_page = sibling.page_no();
            self.unpin_node(node, true);
            self.unpin_node(sibling, true);
            self.unpin_node(parent, false);
            // The delete that triggered this repair may have removed
            // node's own minimum, which was never propagated
            self.maintain_parent(node_page)?;
            self.maintain_parent(sib_page)
        }
    }

    /// Merges the under-full node into its left neighbor (swapping first if
    /// the node is leftmost), erases the right node's entry in the parent,
    /// and recurses on the parent.
    fn coalesce(
        &self,
        hdr: &mut IndexFileHeader,
        sibling: PinnedNode<'_>,
        node: PinnedNode<'_>,
        mut parent: PinnedNode<'_>,
        idx: usize,
    ) -> Result<()> {
        // Ensure left <- right: if node is leftmost, its sibling is the
        // right one, so swap roles
        let (mut left, right, right_idx) = if idx == 0 {
            (node, sibling, 1)
        } else {
            (sibling, node, idx)
        };

        let before = left.size();
        let n = right.size();
        let keys = right.keys_vec(0, n);
        let rids = right.rids_vec(0, n);
        left.insert_pairs(before, &keys, &rids);

        if !left.is_leaf() {
            for i in before..before + n {
                self.maintain_child(&left, i)?;
            }
        }

        if right.is_leaf() {
            if hdr.last_leaf == right.page_no() {
                hdr.last_leaf = left.page_no();
            }
            // Adjacent children of one parent are adjacent leaves, so the
            // right node's predecessor is exactly `left`
            left.set_next_leaf(right.next_leaf());
            if right.next_leaf() != NO_PAGE {
                let mut succ = self.fetch_node(right.next_leaf())?;
                succ.set_prev_leaf(left.page_no());
                self.unpin_node(succ, true);
            }
        }

        let left_page = left.page_no();
        self.unpin_node(left, true);
        self.release_node(hdr, right);

        parent.erase_pair(right_idx);
        let parent_page = parent.page_no();
        self.unpin_node(parent, true);

        self.maintain_parent(left_page)?;

        let parent = self.fetch_node(parent_page)?;
        self.coalesce_or_redistribute(hdr, parent)
    }

    // =====================================================================
    // Invariant maintenance
    // =====================================================================

    /// Propagates a changed first key up the parent chain until it stops
    /// changing or the root is reached.
    fn maintain_parent(&self, page_no: u32) -> Result<()> {
        let mut curr = self.fetch_node(page_no)?;
        let mut curr_dirty = false;

        loop {
            let parent_page = curr.parent();
            if parent_page == NO_PAGE || curr.size() == 0 {
                self.unpin_node(curr, curr_dirty);
                return Ok(());
            }

            let child_key = curr.get_key(0).to_vec();
            let curr_page = curr.page_no();
            self.unpin_node(curr, curr_dirty);

            let mut parent = self.fetch_node(parent_page)?;
            let rank = parent.find_child(curr_page).ok_or_else(|| {
                CorvusError::IndexCorrupted("node missing from its parent".into())
            })?;
            if parent.get_key(rank) == &child_key[..] {
                self.unpin_node(parent, false);
                return Ok(());
            }
            parent.set_key(rank, &child_key);
            curr = parent;
            curr_dirty = true;
        }
    }

    /// Rewrites the parent pointer of the i-th child of an internal node.
    fn maintain_child(&self, node: &Node<'_>, i: usize) -> Result<()> {
        debug_assert!(!node.is_leaf());
        let mut child = self.fetch_node(node.value_at(i))?;
        child.set_parent(node.page_no());
        self.unpin_node(child, true);
        Ok(())
    }

    // =====================================================================
    // Range iteration
    // =====================================================================

    /// Position of the first key slot in the tree.
    pub fn leaf_begin(&self) -> Result<Iid> {
        let hdr = self.state.lock();
        Ok(Iid::new(hdr.first_leaf, 0))
    }

    /// Position one past the last key slot in the tree.
    pub fn leaf_end(&self) -> Result<Iid> {
        let hdr = self.state.lock();
        let leaf = self.fetch_node(hdr.last_leaf)?;
        let iid = Iid::new(hdr.last_leaf, leaf.size() as u32);
        self.unpin_node(leaf, false);
        Ok(iid)
    }

    /// Position of the first slot whose key is >= `key`, rolling forward
    /// across the leaf chain when the in-leaf bound lands past the last
    /// slot.
    pub fn lower_bound(&self, key: &[u8]) -> Result<Iid> {
        self.check_key(key)?;
        let hdr = self.state.lock();

        let leaf = self.find_leaf(&hdr, key)?;
        let pos = leaf.lower_bound(key);
        let iid = self.bound_to_iid(&leaf, pos);
        self.unpin_node(leaf, false);
        Ok(iid)
    }

    /// Position of the first slot whose key is > `key`.
    pub fn upper_bound(&self, key: &[u8]) -> Result<Iid> {
        self.check_key(key)?;
        let hdr = self.state.lock();

        let leaf = self.find_leaf(&hdr, key)?;
        // Node-level upper_bound never returns 0 (internal sentinel rule),
        // so the below-first-key case is decided here
        let pos = if leaf.size() == 0 {
            0
        } else if compare_keys(
            leaf.get_key(0),
            key,
            &self.schema.col_types,
            &self.schema.col_lens,
        ) == Ordering::Greater
        {
            0
        } else {
            leaf.upper_bound(key)
        };
        let iid = self.bound_to_iid(&leaf, pos);
        self.unpin_node(leaf, false);
        Ok(iid)
    }

    fn bound_to_iid(&self, leaf: &Node<'_>, pos: usize) -> Iid {
        if pos == leaf.size() && leaf.next_leaf() != NO_PAGE {
            Iid::new(leaf.next_leaf(), 0)
        } else {
            Iid::new(leaf.page_no(), pos as u32)
        }
    }

    /// Returns the rid stored at an iterator position.
    pub fn get_rid(&self, iid: Iid) -> Result<Rid> {
        let _hdr = self.state.lock();
        let node = self.fetch_node(iid.page_no)?;
        if iid.slot_no as usize >= node.size() {
            self.unpin_node(node, false);
            return Err(CorvusError::IndexEntryNotFound);
        }
        let rid = node.get_rid(iid.slot_no as usize);
        self.unpin_node(node, false);
        Ok(rid)
    }

    /// Advances an iterator position by one slot, jumping to the next leaf
    /// when the current one is exhausted.
    pub(crate) fn advance(&self, iid: Iid) -> Result<Iid> {
        let _hdr = self.state.lock();
        let node = self.fetch_node(iid.page_no)?;
        let next = if (iid.slot_no as usize + 1) < node.size() {
            Iid::new(iid.page_no, iid.slot_no + 1)
        } else if node.next_leaf() != NO_PAGE {
            Iid::new(node.next_leaf(), 0)
        } else {
            Iid::new(iid.page_no, node.size() as u32)
        };
        self.unpin_node(node, false);
        Ok(next)
    }

    /// Opens a scan over every entry in key order.
    pub fn scan(&self) -> Result<IndexScan<'_>> {
        let begin = self.leaf_begin()?;
        let end = self.leaf_end()?;
        Ok(IndexScan::new(self, begin, end))
    }

    // =====================================================================
    // Structural verification
    // =====================================================================

    /// Walks the whole tree checking its invariants.
    ///
    /// Verified: strictly increasing keys per node, parent pointers, the
    /// first-key invariant of internal nodes, uniform leaf depth, and a
    /// leaf chain that visits every key in ascending order with the header
    /// endpoints. Intended for tests and debugging.
    pub fn verify(&self) -> Result<()> {
        let hdr = self.state.lock();

        let mut leaf_depth: Option<u32> = None;
        let tree_keys =
            self.verify_subtree(hdr.root_page, NO_PAGE, 0, &mut leaf_depth)?;

        // Leaf chain: ascending, complete, with header endpoints
        let mut chain_keys: Vec<Vec<u8>> = Vec::new();
        let mut page_no = hdr.first_leaf;
        let mut prev = NO_PAGE;
        loop {
            let node = self.fetch_node(page_no)?;
            if !node.is_leaf() {
                self.unpin_node(node, false);
                return Err(CorvusError::IndexCorrupted(
                    "leaf chain visits a non-leaf page".into(),
                ));
            }
            if node.prev_leaf() != prev {
                self.unpin_node(node, false);
                return Err(CorvusError::IndexCorrupted("broken prev_leaf link".into()));
            }
            for i in 0..node.size() {
                chain_keys.push(node.get_key(i).to_vec());
            }
            let next = node.next_leaf();
            self.unpin_node(node, false);
            if next == NO_PAGE {
                break;
            }
            prev = page_no;
            page_no = next;
        }
        if page_no != hdr.last_leaf {
            return Err(CorvusError::IndexCorrupted(
                "last_leaf is not the chain endpoint".into(),
            ));
        }
        if chain_keys != tree_keys {
            return Err(CorvusError::IndexCorrupted(
                "leaf chain disagrees with tree traversal".into(),
            ));
        }
        for w in chain_keys.windows(2) {
            if compare_keys(&w[0], &w[1], &self.schema.col_types, &self.schema.col_lens)
                != Ordering::Less
            {
                return Err(CorvusError::IndexCorrupted(
                    "leaf chain keys not ascending".into(),
                ));
            }
        }
        Ok(())
    }

    /// Recursively verifies one subtree, returning its keys in order.
    fn verify_subtree(
        &self,
        page_no: u32,
        expected_parent: u32,
        depth: u32,
        leaf_depth: &mut Option<u32>,
    ) -> Result<Vec<Vec<u8>>> {
        let node = self.fetch_node(page_no)?;

        if node.parent() != expected_parent {
            self.unpin_node(node, false);
            return Err(CorvusError::IndexCorrupted("wrong parent pointer".into()));
        }
        if expected_parent != NO_PAGE
            && (node.size() < self.schema.min_size() || node.size() >= self.schema.order)
        {
            let node_size = node.size();
            self.unpin_node(node, false);
            return Err(CorvusError::IndexCorrupted(format!(
                "non-root node size {} outside [{}, {})",
                node_size,
                self.schema.min_size(),
                self.schema.order
            )));
        }
        for i in 1..node.size() {
            if compare_keys(
                node.get_key(i - 1),
                node.get_key(i),
                &self.schema.col_types,
                &self.schema.col_lens,
            ) != Ordering::Less
            {
                self.unpin_node(node, false);
                return Err(CorvusError::IndexCorrupted(
                    "node keys not strictly increasing".into(),
                ));
            }
        }

        if node.is_leaf() {
            match *leaf_depth {
                Some(d) if d != depth => {
                    self.unpin_node(node, false);
                    return Err(CorvusError::IndexCorrupted(
                        "leaves at differing depths".into(),
                    ));
                }
                None => *leaf_depth = Some(depth),
                _ => {}
            }
            let keys = (0..node.size()).map(|i| node.get_key(i).to_vec()).collect();
            self.unpin_node(node, false);
            return Ok(keys);
        }

        let entries: Vec<(Vec<u8>, u32)> = (0..node.size())
            .map(|i| (node.get_key(i).to_vec(), node.value_at(i)))
            .collect();
        self.unpin_node(node, false);

        let mut all_keys = Vec::new();
        for (sep_key, child_page) in entries {
            let child_keys = self.verify_subtree(child_page, page_no, depth + 1, leaf_depth)?;
            // The separator must equal the minimum key reachable under the
            // child
            match child_keys.first() {
                Some(min_key) if *min_key == sep_key => {}
                _ => {
                    return Err(CorvusError::IndexCorrupted(
                        "internal key differs from child minimum".into(),
                    ));
                }
            }
            all_keys.extend(child_keys);
        }
        Ok(all_keys)
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
