use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::types::{FileId, PageId, PAGE_SIZE};

/// One open on-disk file plus the high-water mark of allocated pages.
struct OpenFile {
    handle: File,
    num_pages: i32,
}

/// Owns every open file and hands out fresh page numbers. Mirrors the
/// disk-manager collaborator the buffer pool drives in the reference
/// lineage: the buffer pool never touches a `File` directly.
pub struct DiskManager {
    dir: PathBuf,
    files: HashMap<FileId, OpenFile>,
}

impl DiskManager {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        std::fs::create_dir_all(&dir).ok();
        DiskManager {
            dir: dir.as_ref().to_path_buf(),
            files: HashMap::new(),
        }
    }

    fn path_for(&self, file_id: FileId) -> PathBuf {
        self.dir.join(format!("file_{}.db", file_id))
    }

    fn open_or_get(&mut self, file_id: FileId) -> &mut OpenFile {
        if !self.files.contains_key(&file_id) {
            let path = self.path_for(file_id);
            let handle = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)
                .expect("failed to open backing file");
            let len = handle.metadata().map(|m| m.len()).unwrap_or(0);
            let num_pages = (len / PAGE_SIZE as u64) as i32;
            self.files.insert(file_id, OpenFile { handle, num_pages });
        }
        self.files.get_mut(&file_id).unwrap()
    }

    /// Allocates a fresh page number on `file_id`; does not write anything.
    pub fn allocate_page(&mut self, file_id: FileId) -> i32 {
        let f = self.open_or_get(file_id);
        let page_no = f.num_pages;
        f.num_pages += 1;
        debug!("allocated page {} on file {}", page_no, file_id);
        page_no
    }

    pub fn read_page(&mut self, page_id: PageId) -> std::io::Result<Vec<u8>> {
        let f = self.open_or_get(page_id.file_id);
        let mut buf = vec![0u8; PAGE_SIZE];
        let offset = (page_id.page_no as u64) * (PAGE_SIZE as u64);
        if offset + PAGE_SIZE as u64 <= f.handle.metadata()?.len() {
            f.handle.seek(SeekFrom::Start(offset))?;
            f.handle.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> std::io::Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let f = self.open_or_get(page_id.file_id);
        let offset = (page_id.page_no as u64) * (PAGE_SIZE as u64);
        f.handle.seek(SeekFrom::Start(offset))?;
        f.handle.write_all(data)?;
        f.handle.flush()?;
        Ok(())
    }

    /// No-op beyond bookkeeping: pages are not physically truncated since
    /// other pages may sit past them; mirrors the original `DeallocatePage`
    /// which is itself a placeholder in the reference lineage.
    pub fn deallocate_page(&mut self, page_id: PageId) {
        debug!("deallocated page {:?} (logical only)", page_id);
    }

    pub fn num_pages(&mut self, file_id: FileId) -> i32 {
        self.open_or_get(file_id).num_pages
    }
}
