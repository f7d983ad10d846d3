//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use corvus_common::page::{PageId, PAGE_SIZE};
use corvus_common::{CorvusError, Result};

/// Manages reading and writing pages to disk files.
///
/// Each file_id maps to a separate data file under the data directory.
/// Table data files and index files each get their own file_id, handed
/// out by the catalog.
pub struct DiskManager {
    /// Base directory for data files.
    data_dir: PathBuf,
    /// Enable fsync after writes.
    fsync_enabled: bool,
    /// Open file handles keyed by file_id.
    files: Mutex<HashMap<u32, FileHandle>>,
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager rooted at the given directory.
    pub fn new(data_dir: impl Into<PathBuf>, fsync_enabled: bool) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            fsync_enabled,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Generates the file path for a given file ID.
    fn file_path(&self, file_id: u32) -> PathBuf {
        self.data_dir.join(format!("{:08}.dat", file_id))
    }

    /// Opens or creates a data file.
    fn open_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();

        if files.contains_key(&file_id) {
            return Ok(());
        }

        let path = self.file_path(file_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        files.insert(file_id, FileHandle { file, num_pages });

        Ok(())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or(CorvusError::PageNotFound {
                page_id: page_id.as_u64(),
            })?;

        if page_id.page_num >= handle.num_pages {
            return Err(CorvusError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or(CorvusError::PageNotFound {
                page_id: page_id.as_u64(),
            })?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.fsync_enabled {
            handle.file.sync_all()?;
        }

        // Update page count if we extended the file
        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Allocates a new page at the end of the specified file.
    ///
    /// Returns the PageId of the newly allocated page. The page is zeroed
    /// on disk, so a subsequent read returns all zeros.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        self.open_file(file_id)?;

        let mut files = self.files.lock();
        let handle = files.get_mut(&file_id).ok_or(CorvusError::PageNotFound {
            page_id: PageId::new(file_id, 0).as_u64(),
        })?;

        let page_num = handle.num_pages;
        let page_id = PageId::new(file_id, page_num);

        // Write an empty page to extend the file
        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_num + 1;

        Ok(page_id)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.open_file(file_id)?;

        let files = self.files.lock();
        let handle = files.get(&file_id).ok_or(CorvusError::PageNotFound {
            page_id: PageId::new(file_id, 0).as_u64(),
        })?;

        Ok(handle.num_pages)
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        let files = self.files.lock();
        for handle in files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes a specific file.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(handle) = files.remove(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, handle) in files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a data file.
    pub fn delete_file(&self, file_id: u32) -> Result<()> {
        self.close_file(file_id)?;
        let path = self.file_path(file_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = DiskManager::new(dir.path(), false).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
    }

    #[test]
    fn test_disk_manager_allocate_page() {
        let (dm, _dir) = create_test_disk_manager();

        let page1 = dm.allocate_page(0).unwrap();
        assert_eq!(page1.file_id, 0);
        assert_eq!(page1.page_num, 0);

        let page2 = dm.allocate_page(0).unwrap();
        assert_eq!(page2.page_num, 1);

        assert_eq!(dm.num_pages(0).unwrap(), 2);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page(0).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let read_data = dm.read_page(page_id).unwrap();
        assert_eq!(read_data[0], 0xAB);
        assert_eq!(read_data[100], 0xCD);
        assert_eq!(read_data[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_multiple_files() {
        let (dm, _dir) = create_test_disk_manager();

        let page_f0 = dm.allocate_page(0).unwrap();
        let page_f1 = dm.allocate_page(1).unwrap();

        let mut data0 = [0u8; PAGE_SIZE];
        data0[0] = 0x11;
        dm.write_page(page_f0, &data0).unwrap();

        let mut data1 = [0u8; PAGE_SIZE];
        data1[0] = 0x22;
        dm.write_page(page_f1, &data1).unwrap();

        assert_eq!(dm.read_page(page_f0).unwrap()[0], 0x11);
        assert_eq!(dm.read_page(page_f1).unwrap()[0], 0x22);
    }

    #[test]
    fn test_disk_manager_read_nonexistent_page() {
        let (dm, _dir) = create_test_disk_manager();

        dm.allocate_page(0).unwrap();

        let result = dm.read_page(PageId::new(0, 99));
        assert!(matches!(result, Err(CorvusError::PageNotFound { .. })));
    }

    #[test]
    fn test_disk_manager_allocated_page_reads_zeroed() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page(0).unwrap();
        let data = dm.read_page(page_id).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();
        let page_id;

        // Write data
        {
            let dm = DiskManager::new(dir.path(), true).unwrap();
            page_id = dm.allocate_page(0).unwrap();

            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(page_id, &data).unwrap();
        }

        // Read with new disk manager
        {
            let dm = DiskManager::new(dir.path(), true).unwrap();
            let read_data = dm.read_page(page_id).unwrap();
            assert_eq!(read_data[0], 0xFF);
        }
    }

    #[test]
    fn test_disk_manager_delete_file() {
        let (dm, dir) = create_test_disk_manager();

        dm.allocate_page(0).unwrap();
        let file_path = dir.path().join("00000000.dat");
        assert!(file_path.exists());

        dm.delete_file(0).unwrap();
        assert!(!file_path.exists());
    }

    #[test]
    fn test_disk_manager_num_pages() {
        let (dm, _dir) = create_test_disk_manager();

        assert_eq!(dm.num_pages(0).unwrap(), 0);

        dm.allocate_page(0).unwrap();
        assert_eq!(dm.num_pages(0).unwrap(), 1);

        dm.allocate_page(0).unwrap();
        dm.allocate_page(0).unwrap();
        assert_eq!(dm.num_pages(0).unwrap(), 3);
    }

    #[test]
    fn test_disk_manager_close_and_reopen_file() {
        let (dm, _dir) = create_test_disk_manager();

        dm.allocate_page(0).unwrap();
        dm.close_file(0).unwrap();

        // Can reopen and continue
        dm.allocate_page(0).unwrap();
        assert_eq!(dm.num_pages(0).unwrap(), 2);
    }
}
