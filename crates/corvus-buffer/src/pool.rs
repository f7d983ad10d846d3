//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::System;
use corvus_common::page::{PageId, PAGE_SIZE};
use corvus_common::{CorvusError, Result};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for newly cached pages
/// - Clock replacement for eviction, with write-back of dirty victims
/// - Pin counting for concurrent access
///
/// Fetching a page pins it; callers must unpin on every exit path,
/// passing `dirty = true` if they modified the page data.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
    /// Disk manager for read-through and write-back.
    disk: Arc<DiskManager>,
}

impl BufferPool {
    /// Creates a new buffer pool over the given disk manager.
    pub fn new(disk: Arc<DiskManager>, config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
            disk,
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames to ensure useful caching on low-memory systems.
    pub fn auto_sized(disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(disk, BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Returns the disk manager this pool writes through.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Allocates a frame for a new page.
    ///
    /// Tries the free list first, then evicts an unpinned frame, writing
    /// its contents back to disk if dirty.
    fn allocate_frame(&self) -> Result<FrameId> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok(frame_id);
            }
        }

        let victim_id = self
            .replacer
            .evict(&|fid| self.frames[fid.0 as usize].pin_count() == 0)
            .ok_or(CorvusError::BufferPoolFull)?;

        let frame = &self.frames[victim_id.0 as usize];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(old_page_id, &data)?;
            }
            self.page_table.remove(old_page_id);
        }

        Ok(victim_id)
    }

    /// Fetches a page, pinning it.
    ///
    /// On a miss the page is read through from disk, evicting a victim
    /// frame if the pool is full.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok(frame);
        }

        // Miss: read through from disk
        let data = self.disk.read_page(page_id)?;
        let frame_id = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.copy_from(&data);
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.insert(page_id, frame_id);
        Ok(frame)
    }

    /// Allocates a fresh page in the given file and pins it.
    ///
    /// The new page is zeroed both on disk and in its frame.
    pub fn new_page(&self, file_id: u32) -> Result<(PageId, &BufferFrame)> {
        let page_id = self.disk.allocate_page(file_id)?;
        let frame_id = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.write_data().fill(0);
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.insert(page_id, frame_id);
        Ok((page_id, frame))
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// Once the pin count drops to zero the page becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];

            if is_dirty {
                frame.set_dirty(true);
            }

            frame.unpin();
            return true;
        }
        false
    }

    /// Writes a page back to disk if it is dirty.
    ///
    /// Returns true if the page was flushed.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];

            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data)?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drops every cached page of the given file without writing back.
    ///
    /// Used when a file is being deleted; pinned pages are skipped.
    pub fn discard_file(&self, file_id: u32) {
        for (page_id, frame_id) in self.page_table.entries() {
            if page_id.file_id != file_id {
                continue;
            }
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                continue;
            }
            self.page_table.remove(page_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
        }
    }

    /// Flushes all dirty pages to disk.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let mut flushed = 0;

        for (page_id, frame_id) in self.page_table.entries() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }

        Ok(flushed)
    }
}
