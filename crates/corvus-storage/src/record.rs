//! Fixed-size record files.
//!
//! Each table stores its rows in one record file. Records are fixed width
//! (the table's column widths are summed at creation), so pages use a slot
//! bitmap rather than a slot directory:
//!
//! ```text
//! +--------------------+ 0
//! | Page Header (12)   |
//! +--------------------+ 12
//! | Slot Bitmap        |  one bit per slot
//! +--------------------+ 12 + bitmap_len
//! | Record Slots       |  records_per_page fixed-width slots
//! +--------------------+
//! ```
//!
//! Page 0 holds the file header. Pages with free slots are threaded onto a
//! singly linked free-page list headed in the file header; a page leaves the
//! list when it fills and rejoins it on the first delete.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use corvus_buffer::BufferPool;
use corvus_common::page::{PageId, Rid, NO_PAGE, PAGE_SIZE};
use corvus_common::{CorvusError, Result};

/// A record read from a record file.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Raw record bytes, exactly `record_size` long.
    pub data: Bytes,
}

impl Record {
    /// Creates a record from raw bytes.
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Returns the record length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// File header stored on page 0.
///
/// Layout (20 bytes):
/// - record_size: 4 bytes
/// - num_pages: 4 bytes (including this header page)
/// - records_per_page: 4 bytes
/// - first_free_page: 4 bytes (NO_PAGE when no page has free slots)
/// - bitmap_len: 4 bytes
#[derive(Debug, Clone, Copy)]
struct RecordFileHeader {
    record_size: u32,
    num_pages: u32,
    records_per_page: u32,
    first_free_page: u32,
    bitmap_len: u32,
}

impl RecordFileHeader {
    const SIZE: usize = 20;

    fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.record_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[8..12].copy_from_slice(&self.records_per_page.to_le_bytes());
        buf[12..16].copy_from_slice(&self.first_free_page.to_le_bytes());
        buf[16..20].copy_from_slice(&self.bitmap_len.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            record_size: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            num_pages: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            records_per_page: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            first_free_page: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            bitmap_len: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        }
    }
}

/// Data page header.
///
/// Layout (12 bytes):
/// - next_free_page: 4 bytes (valid only while on the free-page list)
/// - num_records: 4 bytes
/// - in_free_list: 4 bytes (0/1; exact free-list membership)
#[derive(Debug, Clone, Copy)]
struct RecordPageHeader {
    next_free_page: u32,
    num_records: u32,
    in_free_list: u32,
}

impl RecordPageHeader {
    const SIZE: usize = 12;

    fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.next_free_page.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_records.to_le_bytes());
        buf[8..12].copy_from_slice(&self.in_free_list.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            next_free_page: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            num_records: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            in_free_list: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

#[inline]
fn bit_get(bitmap: &[u8], i: usize) -> bool {
    bitmap[i / 8] & (1 << (i % 8)) != 0
}

#[inline]
fn bit_set(bitmap: &mut [u8], i: usize) {
    bitmap[i / 8] |= 1 << (i % 8);
}

#[inline]
fn bit_clear(bitmap: &mut [u8], i: usize) {
    bitmap[i / 8] &= !(1 << (i % 8));
}

/// A record file over fixed-size records.
///
/// All page access goes through the buffer pool; the file header is cached
/// in memory and written back on [`RecordFile::close`].
pub struct RecordFile {
    file_id: u32,
    pool: Arc<BufferPool>,
    hdr: Mutex<RecordFileHeader>,
}

impl RecordFile {
    /// Creates a new record file with the given fixed record size.
    pub fn create(pool: Arc<BufferPool>, file_id: u32, record_size: usize) -> Result<Self> {
        let records_per_page = Self::records_per_page(record_size)?;
        let bitmap_len = (records_per_page + 7) / 8;

        let (page_id, frame) = pool.new_page(file_id)?;
        if page_id.page_num != 0 {
            pool.unpin_page(page_id, false);
            return Err(CorvusError::Internal(format!(
                "record file {} is not empty",
                file_id
            )));
        }

        let hdr = RecordFileHeader {
            record_size: record_size as u32,
            num_pages: 1,
            records_per_page: records_per_page as u32,
            first_free_page: NO_PAGE,
            bitmap_len: bitmap_len as u32,
        };
        frame.write_data()[..RecordFileHeader::SIZE].copy_from_slice(&hdr.to_bytes());
        pool.unpin_page(page_id, true);

        Ok(Self {
            file_id,
            pool,
            hdr: Mutex::new(hdr),
        })
    }

    /// Opens an existing record file.
    pub fn open(pool: Arc<BufferPool>, file_id: u32) -> Result<Self> {
        let page_id = PageId::new(file_id, 0);
        let frame = pool.fetch_page(page_id)?;
        let hdr = RecordFileHeader::from_bytes(&frame.read_data()[..RecordFileHeader::SIZE]);
        pool.unpin_page(page_id, false);

        Ok(Self {
            file_id,
            pool,
            hdr: Mutex::new(hdr),
        })
    }

    /// Computes how many fixed-size records fit on one page.
    fn records_per_page(record_size: usize) -> Result<usize> {
        if record_size == 0 {
            return Err(CorvusError::Internal("record size must be non-zero".into()));
        }
        let avail = PAGE_SIZE - RecordPageHeader::SIZE;
        // One bit of bitmap plus record_size bytes per slot
        let mut rpp = (avail * 8) / (record_size * 8 + 1);
        while rpp > 0 && RecordPageHeader::SIZE + (rpp + 7) / 8 + rpp * record_size > PAGE_SIZE {
            rpp -= 1;
        }
        if rpp == 0 {
            return Err(CorvusError::RecordSizeMismatch {
                expected: avail - 1,
                actual: record_size,
            });
        }
        Ok(rpp)
    }

    /// Returns the file id of this record file.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the fixed record size.
    pub fn record_size(&self) -> usize {
        self.hdr.lock().record_size as usize
    }

    /// Writes the cached file header back to page 0.
    pub fn flush_header(&self) -> Result<()> {
        let hdr = *self.hdr.lock();
        let page_id = PageId::new(self.file_id, 0);
        let frame = self.pool.fetch_page(page_id)?;
        frame.write_data()[..RecordFileHeader::SIZE].copy_from_slice(&hdr.to_bytes());
        self.pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Flushes the header; pages themselves are flushed by the pool.
    pub fn close(&self) -> Result<()> {
        self.flush_header()
    }

    /// Runs a closure over a mutably borrowed page, unpinning afterwards.
    fn with_page_mut<R>(
        &self,
        page_no: u32,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R,
    ) -> Result<R> {
        let page_id = PageId::new(self.file_id, page_no);
        let frame = self.pool.fetch_page(page_id)?;
        let out = f(&mut frame.write_data());
        self.pool.unpin_page(page_id, true);
        Ok(out)
    }

    /// Runs a closure over an immutably borrowed page, unpinning afterwards.
    fn with_page<R>(&self, page_no: u32, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> Result<R> {
        let page_id = PageId::new(self.file_id, page_no);
        let frame = self.pool.fetch_page(page_id)?;
        let out = f(&frame.read_data());
        self.pool.unpin_page(page_id, false);
        Ok(out)
    }

    fn check_rid(&self, hdr: &RecordFileHeader, rid: Rid) -> Result<()> {
        if rid.page_no == 0 || rid.page_no >= hdr.num_pages || rid.slot_no >= hdr.records_per_page
        {
            return Err(CorvusError::RecordNotFound {
                rid: rid.to_string(),
            });
        }
        Ok(())
    }

    /// Reads the record at the given rid.
    pub fn get_record(&self, rid: Rid) -> Result<Record> {
        let hdr = *self.hdr.lock();
        self.check_rid(&hdr, rid)?;

        let record_size = hdr.record_size as usize;
        let bitmap_len = hdr.bitmap_len as usize;
        let slot = rid.slot_no as usize;

        self.with_page(rid.page_no, |data| {
            let bitmap = &data[RecordPageHeader::SIZE..RecordPageHeader::SIZE + bitmap_len];
            if !bit_get(bitmap, slot) {
                return Err(CorvusError::RecordNotFound {
                    rid: rid.to_string(),
                });
            }
            let start = RecordPageHeader::SIZE + bitmap_len + slot * record_size;
            Ok(Record::new(Bytes::copy_from_slice(
                &data[start..start + record_size],
            )))
        })?
    }

    /// Returns true if a live record exists at the given rid.
    pub fn is_record(&self, rid: Rid) -> Result<bool> {
        let hdr = *self.hdr.lock();
        if self.check_rid(&hdr, rid).is_err() {
            return Ok(false);
        }
        let bitmap_len = hdr.bitmap_len as usize;
        self.with_page(rid.page_no, |data| {
            let bitmap = &data[RecordPageHeader::SIZE..RecordPageHeader::SIZE + bitmap_len];
            bit_get(bitmap, rid.slot_no as usize)
        })
    }

    /// Allocates a fresh data page and links it onto the free-page list.
    fn create_page(&self, hdr: &mut RecordFileHeader) -> Result<u32> {
        let (page_id, frame) = self.pool.new_page(self.file_id)?;
        let page_hdr = RecordPageHeader {
            next_free_page: hdr.first_free_page,
            num_records: 0,
            in_free_list: 1,
        };
        frame.write_data()[..RecordPageHeader::SIZE].copy_from_slice(&page_hdr.to_bytes());
        self.pool.unpin_page(page_id, true);

        hdr.first_free_page = page_id.page_num;
        hdr.num_pages += 1;
        Ok(page_id.page_num)
    }

    /// Inserts a record, returning its rid.
    pub fn insert_record(&self, buf: &[u8]) -> Result<Rid> {
        let mut hdr = self.hdr.lock();
        if buf.len() != hdr.record_size as usize {
            return Err(CorvusError::RecordSizeMismatch {
                expected: hdr.record_size as usize,
                actual: buf.len(),
            });
        }

        let rpp = hdr.records_per_page as usize;
        let record_size = hdr.record_size as usize;
        let bitmap_len = hdr.bitmap_len as usize;

        loop {
            let page_no = if hdr.first_free_page == NO_PAGE {
                self.create_page(&mut hdr)?
            } else {
                hdr.first_free_page
            };

            enum Outcome {
                // Page was actually full: popped, follow this link
                Stale(u32),
                Inserted { slot: u32, now_full: bool, next: u32 },
            }

            let outcome = self.with_page_mut(page_no, |data| -> Result<Outcome> {
                let mut page_hdr = RecordPageHeader::from_bytes(&data[..RecordPageHeader::SIZE]);
                if page_hdr.num_records as usize == rpp {
                    page_hdr.in_free_list = 0;
                    let next = page_hdr.next_free_page;
                    data[..RecordPageHeader::SIZE].copy_from_slice(&page_hdr.to_bytes());
                    return Ok(Outcome::Stale(next));
                }

                let (bitmap, rest) = data[RecordPageHeader::SIZE..].split_at_mut(bitmap_len);
                let slot = (0..rpp).find(|&i| !bit_get(bitmap, i)).ok_or_else(|| {
                    CorvusError::Internal(format!(
                        "page {} below capacity but bitmap is full",
                        page_no
                    ))
                })?;
                bit_set(bitmap, slot);
                rest[slot * record_size..(slot + 1) * record_size].copy_from_slice(buf);

                page_hdr.num_records += 1;
                let now_full = page_hdr.num_records as usize == rpp;
                if now_full {
                    page_hdr.in_free_list = 0;
                }
                let next = page_hdr.next_free_page;
                data[..RecordPageHeader::SIZE].copy_from_slice(&page_hdr.to_bytes());
                Ok(Outcome::Inserted {
                    slot: slot as u32,
                    now_full,
                    next,
                })
            })??;

            match outcome {
                Outcome::Stale(next) => {
                    hdr.first_free_page = next;
                }
                Outcome::Inserted { slot, now_full, next } => {
                    if now_full {
                        hdr.first_free_page = next;
                    }
                    return Ok(Rid::new(page_no, slot));
                }
            }
        }
    }

    /// Writes a record at a caller-chosen rid.
    ///
    /// Used by delete rollback, which must restore a record at its original
    /// location. Overwrites silently if the slot is already live.
    pub fn put_record(&self, rid: Rid, buf: &[u8]) -> Result<()> {
        let hdr = self.hdr.lock();
        if buf.len() != hdr.record_size as usize {
            return Err(CorvusError::RecordSizeMismatch {
                expected: hdr.record_size as usize,
                actual: buf.len(),
            });
        }
        self.check_rid(&hdr, rid)?;

        let record_size = hdr.record_size as usize;
        let bitmap_len = hdr.bitmap_len as usize;
        let slot = rid.slot_no as usize;

        self.with_page_mut(rid.page_no, |data| {
            let mut page_hdr = RecordPageHeader::from_bytes(&data[..RecordPageHeader::SIZE]);
            let (bitmap, rest) = data[RecordPageHeader::SIZE..].split_at_mut(bitmap_len);
            if !bit_get(bitmap, slot) {
                bit_set(bitmap, slot);
                page_hdr.num_records += 1;
            }
            rest[slot * record_size..(slot + 1) * record_size].copy_from_slice(buf);
            data[..RecordPageHeader::SIZE].copy_from_slice(&page_hdr.to_bytes());
        })
    }

    /// Overwrites the record at the given rid.
    pub fn update_record(&self, rid: Rid, buf: &[u8]) -> Result<()> {
        let hdr = self.hdr.lock();
        if buf.len() != hdr.record_size as usize {
            return Err(CorvusError::RecordSizeMismatch {
                expected: hdr.record_size as usize,
                actual: buf.len(),
            });
        }
        self.check_rid(&hdr, rid)?;

        let record_size = hdr.record_size as usize;
        let bitmap_len = hdr.bitmap_len as usize;
        let slot = rid.slot_no as usize;

        self.with_page_mut(rid.page_no, |data| {
            let (bitmap, rest) = data[RecordPageHeader::SIZE..].split_at_mut(bitmap_len);
            if !bit_get(bitmap, slot) {
                return Err(CorvusError::RecordNotFound {
                    rid: rid.to_string(),
                });
            }
            rest[slot * record_size..(slot + 1) * record_size].copy_from_slice(buf);
            Ok(())
        })?
    }

    /// Deletes the record at the given rid.
    ///
    /// A page that was full rejoins the free-page list.
    pub fn delete_record(&self, rid: Rid) -> Result<()> {
        let mut hdr = self.hdr.lock();
        self.check_rid(&hdr, rid)?;

        let bitmap_len = hdr.bitmap_len as usize;
        let slot = rid.slot_no as usize;
        let first_free = hdr.first_free_page;

        let relink = self.with_page_mut(rid.page_no, |data| {
            let mut page_hdr = RecordPageHeader::from_bytes(&data[..RecordPageHeader::SIZE]);
            let bitmap = &mut data[RecordPageHeader::SIZE..RecordPageHeader::SIZE + bitmap_len];
            if !bit_get(bitmap, slot) {
                return Err(CorvusError::RecordNotFound {
                    rid: rid.to_string(),
                });
            }
            bit_clear(bitmap, slot);
            page_hdr.num_records -= 1;

            let relink = page_hdr.in_free_list == 0;
            if relink {
                page_hdr.next_free_page = first_free;
                page_hdr.in_free_list = 1;
            }
            data[..RecordPageHeader::SIZE].copy_from_slice(&page_hdr.to_bytes());
            Ok(relink)
        })??;

        if relink {
            hdr.first_free_page = rid.page_no;
        }
        Ok(())
    }

    /// Reads the slot bitmap of a data page.
    fn read_bitmap(&self, page_no: u32) -> Result<Vec<u8>> {
        let bitmap_len = self.hdr.lock().bitmap_len as usize;
        self.with_page(page_no, |data| {
            data[RecordPageHeader::SIZE..RecordPageHeader::SIZE + bitmap_len].to_vec()
        })
    }

    /// Opens a scan over all live records in (page, slot) order.
    pub fn scan(&self) -> Result<RecordScan<'_>> {
        let (num_pages, rpp) = {
            let hdr = self.hdr.lock();
            (hdr.num_pages, hdr.records_per_page)
        };

        let mut scan = RecordScan {
            file: self,
            num_pages,
            records_per_page: rpp,
            page_no: 1,
            slot_no: 0,
            bitmap: Vec::new(),
        };
        if !scan.is_end() {
            scan.bitmap = self.read_bitmap(scan.page_no)?;
            scan.settle()?;
        }
        Ok(scan)
    }
}

impl Drop for RecordFile {
    fn drop(&mut self) {
        let _ = self.flush_header();
    }
}

/// Iterator over the rids of all live records in a record file.
///
/// Positions are visited in (page, slot) order; the scan caches each page's
/// bitmap as it goes.
pub struct RecordScan<'a> {
    file: &'a RecordFile,
    num_pages: u32,
    records_per_page: u32,
    page_no: u32,
    slot_no: u32,
    bitmap: Vec<u8>,
}

impl<'a> RecordScan<'a> {
    /// Returns true when the scan is exhausted.
    pub fn is_end(&self) -> bool {
        self.page_no >= self.num_pages
    }

    /// Returns the rid at the current position.
    ///
    /// Undefined past the end; callers must check [`RecordScan::is_end`].
    pub fn rid(&self) -> Rid {
        Rid::new(self.page_no, self.slot_no)
    }

    /// Advances to the next live record.
    pub fn next(&mut self) -> Result<()> {
        if self.is_end() {
            return Ok(());
        }
        self.slot_no += 1;
        self.settle()
    }

    /// Moves forward until the current position holds a live record or the
    /// scan ends.
    fn settle(&mut self) -> Result<()> {
        loop {
            if self.slot_no >= self.records_per_page {
                self.page_no += 1;
                self.slot_no = 0;
                if self.is_end() {
                    return Ok(());
                }
                self.bitmap = self.file.read_bitmap(self.page_no)?;
            }
            if bit_get(&self.bitmap, self.slot_no as usize) {
                return Ok(());
            }
            self.slot_no += 1;
        }
    }
}
