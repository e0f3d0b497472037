use std::sync::{Arc, Mutex};

use log::debug;

use crate::buffer_pool::BufferPool;
use crate::concurrency::{LockManager, Transaction, Undoable};
use crate::error::{Error, Result};
use crate::io::{read_le_i32, write_le_i32};
use crate::latch::PageLatchTable;
use crate::record::page::{layout_for, RecordPage};
use crate::types::{FileId, PageId, Rid, INVALID_PAGE_NO};

struct HeapFileHeader {
    record_size: i32,
    num_records_per_page: i32,
    bitmap_bytes: i32,
    num_pages: i32,
    first_free_page_no: i32,
}

const HEADER_OFFSETS: (usize, usize, usize, usize, usize) = (0, 4, 8, 12, 16);

impl HeapFileHeader {
    fn encode(&self, buf: &mut Vec<u8>) {
        write_le_i32(buf, HEADER_OFFSETS.0, self.record_size);
        write_le_i32(buf, HEADER_OFFSETS.1, self.num_records_per_page);
        write_le_i32(buf, HEADER_OFFSETS.2, self.bitmap_bytes);
        write_le_i32(buf, HEADER_OFFSETS.3, self.num_pages);
        write_le_i32(buf, HEADER_OFFSETS.4, self.first_free_page_no);
    }

    fn decode(buf: &[u8]) -> Self {
        HeapFileHeader {
            record_size: read_le_i32(buf, HEADER_OFFSETS.0),
            num_records_per_page: read_le_i32(buf, HEADER_OFFSETS.1),
            bitmap_bytes: read_le_i32(buf, HEADER_OFFSETS.2),
            num_pages: read_le_i32(buf, HEADER_OFFSETS.3),
            first_free_page_no: read_le_i32(buf, HEADER_OFFSETS.4),
        }
    }
}

/// Slotted-page heap file with bitmap-based slot allocation. Page 0 of
/// the underlying file is the heap file header; data pages start at 1.
pub struct RecordFileHandle {
    pub file_id: FileId,
    buffer_pool: Arc<BufferPool>,
    lock_manager: Arc<LockManager>,
    latches: PageLatchTable,
    header: Mutex<HeapFileHeader>,
}

impl RecordFileHandle {
    /// Creates a fresh heap file with the given fixed `record_size`.
    pub fn create(file_id: FileId, record_size: usize, buffer_pool: Arc<BufferPool>, lock_manager: Arc<LockManager>) -> Result<Self> {
        let (num_records_per_page, bitmap_bytes) = layout_for(record_size);
        let header = HeapFileHeader {
            record_size: record_size as i32,
            num_records_per_page: num_records_per_page as i32,
            bitmap_bytes: bitmap_bytes as i32,
            num_pages: 1,
            first_free_page_no: INVALID_PAGE_NO,
        };
        let (fid, page_id) = buffer_pool.new_page(file_id)?;
        debug_assert_eq!(page_id.page_no, 0);
        let mut bytes = buffer_pool.read_frame(fid);
        header.encode(&mut bytes);
        buffer_pool.write_frame(fid, &bytes);
        buffer_pool.unpin(page_id, true);
        Ok(RecordFileHandle {
            file_id,
            buffer_pool,
            lock_manager,
            latches: PageLatchTable::new(),
            header: Mutex::new(header),
        })
    }

    /// Opens a heap file whose header already exists on page 0.
    pub fn open(file_id: FileId, buffer_pool: Arc<BufferPool>, lock_manager: Arc<LockManager>) -> Result<Self> {
        let fid = buffer_pool.fetch(PageId::new(file_id, 0))?;
        let bytes = buffer_pool.read_frame(fid);
        let header = HeapFileHeader::decode(&bytes);
        buffer_pool.unpin(PageId::new(file_id, 0), false);
        Ok(RecordFileHandle {
            file_id,
            buffer_pool,
            lock_manager,
            latches: PageLatchTable::new(),
            header: Mutex::new(header),
        })
    }

    fn flush_header(&self) -> Result<()> {
        let header = self.header.lock().unwrap();
        let page_id = PageId::new(self.file_id, 0);
        let fid = self.buffer_pool.fetch(page_id)?;
        let mut bytes = self.buffer_pool.read_frame(fid);
        header.encode(&mut bytes);
        self.buffer_pool.write_frame(fid, &bytes);
        self.buffer_pool.unpin(page_id, true);
        Ok(())
    }

    fn record_size(&self) -> usize {
        self.header.lock().unwrap().record_size as usize
    }

    fn layout(&self) -> (usize, usize) {
        let h = self.header.lock().unwrap();
        (h.num_records_per_page as usize, h.bitmap_bytes as usize)
    }

    /// Fetches the page holding `page_no`, pinned. Caller must unpin.
    fn fetch_page(&self, page_no: i32) -> Result<(crate::replacer::FrameId, PageId)> {
        if page_no == INVALID_PAGE_NO {
            return Err(Error::PageNotExist(PageId::new(self.file_id, page_no)));
        }
        let page_id = PageId::new(self.file_id, page_no);
        let fid = self.buffer_pool.fetch(page_id)?;
        Ok((fid, page_id))
    }

    /// Returns a page with at least one free slot, pinned, and the exclusive
    /// page latch held for the duration of `f`. Allocates a new page if the
    /// free-list is empty.
    fn with_free_page<R>(&self, f: impl FnOnce(&mut RecordPage<'_>, &mut HeapFileHeader) -> R) -> Result<(R, PageId)> {
        let (num_records_per_page, bitmap_bytes) = self.layout();
        let record_size = self.record_size();

        let mut header = self.header.lock().unwrap();
        let (fid, page_id) = if header.first_free_page_no != INVALID_PAGE_NO {
            self.fetch_page(header.first_free_page_no)?
        } else {
            let (fid, page_id) = self.buffer_pool.new_page(self.file_id)?;
            let mut bytes = self.buffer_pool.read_frame(fid);
            {
                let mut page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
                page.init_header(header.first_free_page_no);
            }
            self.buffer_pool.write_frame(fid, &bytes);
            header.first_free_page_no = page_id.page_no;
            header.num_pages += 1;
            (fid, page_id)
        };

        let _latch = self.latches.acquire_exclusive(page_id);
        let mut bytes = self.buffer_pool.read_frame(fid);
        let result = {
            let mut page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
            let r = f(&mut page, &mut header);
            r
        };
        self.buffer_pool.write_frame(fid, &bytes);
        self.buffer_pool.unpin(page_id, true);
        Ok((result, page_id))
    }

    /// Pins the page first, picks the free slot under that page's latch,
    /// and only then acquires the record X-lock on the resulting rid —
    /// the race-free ordering relative to predicting a rid before the
    /// page is even pinned.
    pub fn insert(&self, buf: &[u8], txn: &Transaction) -> Result<Rid> {
        debug_assert_eq!(buf.len(), self.record_size());
        let (slot_no, page_id) = self.with_free_page(|page, header| {
            let slot_no = page.first_free_slot().expect("page in free-list has no free slot");
            page.occupy_slot(slot_no, buf);
            if page.is_full() {
                header.first_free_page_no = page.next_free_page_no();
            }
            slot_no
        })?;
        let rid = Rid::new(page_id.page_no, slot_no as i32);
        self.lock_manager.lock_x_record(txn, self.file_id, rid)?;
        txn.push_write(crate::concurrency::WriteRecord::Insert { file_id: self.file_id, rid });
        self.flush_header()?;
        debug!("inserted record at {}", rid);
        Ok(rid)
    }

    pub fn get(&self, rid: Rid, txn: &Transaction) -> Result<Vec<u8>> {
        self.lock_manager.lock_s_record(txn, self.file_id, rid)?;
        let (num_records_per_page, bitmap_bytes) = self.layout();
        let record_size = self.record_size();
        let (fid, page_id) = self.fetch_page(rid.page_no)?;
        let _latch = self.latches.acquire_shared(page_id);
        let mut bytes = self.buffer_pool.read_frame(fid);
        let page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
        if !page.is_slot_used(rid.slot_no as usize) {
            self.buffer_pool.unpin(page_id, false);
            return Err(Error::RecordNotFound(rid));
        }
        let data = page.slot_bytes(rid.slot_no as usize).to_vec();
        self.buffer_pool.unpin(page_id, false);
        Ok(data)
    }

    pub fn update(&self, rid: Rid, buf: &[u8], txn: &Transaction) -> Result<()> {
        self.lock_manager.lock_x_record(txn, self.file_id, rid)?;
        let before = self.raw_read(rid)?;
        let (num_records_per_page, bitmap_bytes) = self.layout();
        let record_size = self.record_size();
        let (fid, page_id) = self.fetch_page(rid.page_no)?;
        let _latch = self.latches.acquire_exclusive(page_id);
        let mut bytes = self.buffer_pool.read_frame(fid);
        {
            let mut page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
            page.write_slot(rid.slot_no as usize, buf);
        }
        self.buffer_pool.write_frame(fid, &bytes);
        self.buffer_pool.unpin(page_id, true);
        txn.push_write(crate::concurrency::WriteRecord::Update {
            file_id: self.file_id,
            rid,
            before,
        });
        Ok(())
    }

    pub fn delete(&self, rid: Rid, txn: &Transaction) -> Result<()> {
        self.lock_manager.lock_x_record(txn, self.file_id, rid)?;
        let before = self.raw_read(rid)?;
        let (num_records_per_page, bitmap_bytes) = self.layout();
        let record_size = self.record_size();
        let mut header = self.header.lock().unwrap();
        let (fid, page_id) = self.fetch_page(rid.page_no)?;
        let _latch = self.latches.acquire_exclusive(page_id);
        let mut bytes = self.buffer_pool.read_frame(fid);
        {
            let mut page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
            let was_full = page.is_full();
            page.free_slot(rid.slot_no as usize);
            if was_full {
                page.set_next_free_page_no(header.first_free_page_no);
                header.first_free_page_no = rid.page_no;
            }
        }
        self.buffer_pool.write_frame(fid, &bytes);
        self.buffer_pool.unpin(page_id, true);
        drop(header);
        self.flush_header()?;
        txn.push_write(crate::concurrency::WriteRecord::Delete {
            file_id: self.file_id,
            rid,
            before,
        });
        Ok(())
    }

    /// Reads a slot's bytes without acquiring a transactional lock; used
    /// internally to capture pre-images and by undo.
    fn raw_read(&self, rid: Rid) -> Result<Vec<u8>> {
        let (num_records_per_page, bitmap_bytes) = self.layout();
        let record_size = self.record_size();
        let (fid, page_id) = self.fetch_page(rid.page_no)?;
        let _latch = self.latches.acquire_shared(page_id);
        let mut bytes = self.buffer_pool.read_frame(fid);
        let page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
        let data = page.slot_bytes(rid.slot_no as usize).to_vec();
        self.buffer_pool.unpin(page_id, false);
        Ok(data)
    }

    fn raw_write(&self, rid: Rid, buf: &[u8]) -> Result<()> {
        let (num_records_per_page, bitmap_bytes) = self.layout();
        let record_size = self.record_size();
        let (fid, page_id) = self.fetch_page(rid.page_no)?;
        let _latch = self.latches.acquire_exclusive(page_id);
        let mut bytes = self.buffer_pool.read_frame(fid);
        {
            let mut page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
            page.write_slot(rid.slot_no as usize, buf);
        }
        self.buffer_pool.write_frame(fid, &bytes);
        self.buffer_pool.unpin(page_id, true);
        Ok(())
    }

    fn raw_delete(&self, rid: Rid) -> Result<()> {
        let (num_records_per_page, bitmap_bytes) = self.layout();
        let record_size = self.record_size();
        let mut header = self.header.lock().unwrap();
        let (fid, page_id) = self.fetch_page(rid.page_no)?;
        let _latch = self.latches.acquire_exclusive(page_id);
        let mut bytes = self.buffer_pool.read_frame(fid);
        {
            let mut page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
            let was_full = page.is_full();
            page.free_slot(rid.slot_no as usize);
            if was_full {
                page.set_next_free_page_no(header.first_free_page_no);
                header.first_free_page_no = rid.page_no;
            }
        }
        self.buffer_pool.write_frame(fid, &bytes);
        self.buffer_pool.unpin(page_id, true);
        drop(header);
        self.flush_header()
    }

    /// Re-inserts `buf` at the exact `rid` (used by abort-undo of a
    /// DELETE). Assumes the slot is currently free.
    fn raw_insert_at(&self, rid: Rid, buf: &[u8]) -> Result<()> {
        let (num_records_per_page, bitmap_bytes) = self.layout();
        let record_size = self.record_size();
        let (fid, page_id) = self.fetch_page(rid.page_no)?;
        let _latch = self.latches.acquire_exclusive(page_id);
        let mut bytes = self.buffer_pool.read_frame(fid);
        {
            let mut page = RecordPage::new(&mut bytes, record_size, num_records_per_page, bitmap_bytes);
            page.occupy_slot(rid.slot_no as usize, buf);
        }
        self.buffer_pool.write_frame(fid, &bytes);
        self.buffer_pool.unpin(page_id, true);
        Ok(())
    }

    pub fn num_pages(&self) -> i32 {
        self.header.lock().unwrap().num_pages
    }

    pub fn num_records_per_page(&self) -> usize {
        self.header.lock().unwrap().num_records_per_page as usize
    }

    /// Returns `(page, bitmap_bytes, record_size)` for the scan cursor.
    pub(crate) fn scan_layout(&self) -> (usize, usize, usize) {
        let h = self.header.lock().unwrap();
        (h.num_pages as usize, h.bitmap_bytes as usize, h.record_size as usize)
    }

    pub(crate) fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn num_records_per_page_of(&self) -> usize {
        self.header.lock().unwrap().num_records_per_page as usize
    }
}

impl Undoable for RecordFileHandle {
    fn undo_insert(&self, rid: Rid) -> Result<()> {
        self.raw_delete(rid)
    }

    fn undo_update(&self, rid: Rid, before: &[u8]) -> Result<()> {
        self.raw_write(rid, before)
    }

    fn undo_delete(&self, rid: Rid, before: &[u8]) -> Result<()> {
        self.raw_insert_at(rid, before)
    }
}
