//! Page table mapping page IDs to buffer frames.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashMap;
use corvus_common::page::PageId;

/// Maps PageIds to the frames currently holding them.
///
/// All structural page access in the engine happens under coarser latches
/// (the index root latch, the record file latch), so a mutex-guarded map is
/// sufficient here.
pub struct PageTable {
    map: Mutex<HashMap<PageId, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Looks up a page ID and returns its frame ID if present.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.map.lock().get(&page_id).copied()
    }

    /// Returns true if the page is present.
    #[inline]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.map.lock().contains_key(&page_id)
    }

    /// Inserts a mapping.
    #[inline]
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.map.lock().insert(page_id, frame_id);
    }

    /// Removes a mapping, returning the frame it pointed to.
    #[inline]
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.map.lock().remove(&page_id)
    }

    /// Returns the number of mapped pages.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Returns true if no pages are mapped.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Returns a snapshot of all current mappings.
    pub fn entries(&self) -> Vec<(PageId, FrameId)> {
        self.map.lock().iter().map(|(&p, &f)| (p, f)).collect()
    }
}
