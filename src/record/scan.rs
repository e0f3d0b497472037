use crate::record::file::RecordFileHandle;
use crate::record::page::RecordPage;
use crate::types::Rid;

/// Iterates occupied slots in ascending `(page_no, slot_no)` order across
/// every page of a heap file. Ends by yielding `None` (rather than the
/// sentinel rid) since this is a Rust iterator; `Rid::invalid()` remains
/// available for callers that want the wire-level end marker.
pub struct RecordScan<'a> {
    file: &'a RecordFileHandle,
    num_pages: usize,
    bitmap_bytes: usize,
    record_size: usize,
    page_no: i32,
    slot_no: i32,
}

impl<'a> RecordScan<'a> {
    pub fn new(file: &'a RecordFileHandle) -> Self {
        let (num_pages, bitmap_bytes, record_size) = file.scan_layout();
        RecordScan {
            file,
            num_pages,
            bitmap_bytes,
            record_size,
            page_no: 1,
            slot_no: 0,
        }
    }

    pub fn rewind(&mut self) {
        self.page_no = 1;
        self.slot_no = 0;
    }
}

impl<'a> Iterator for RecordScan<'a> {
    type Item = Rid;

    fn next(&mut self) -> Option<Rid> {
        let num_records_per_page = self.file.num_records_per_page_of();
        while (self.page_no as usize) < self.num_pages {
            let page_id = crate::types::PageId::new(self.file.file_id, self.page_no);
            let fid = match self.file.buffer_pool().fetch(page_id) {
                Ok(fid) => fid,
                Err(_) => return None,
            };
            let mut bytes = self.file.buffer_pool().read_frame(fid);
            let page = RecordPage::new(&mut bytes, self.record_size, num_records_per_page, self.bitmap_bytes);
            let hit = page.next_set_bit_from(self.slot_no as usize);
            self.file.buffer_pool().unpin(page_id, false);

            match hit {
                Some(slot) => {
                    let rid = Rid::new(self.page_no, slot as i32);
                    self.slot_no = slot as i32 + 1;
                    return Some(rid);
                }
                None => {
                    self.page_no += 1;
                    self.slot_no = 0;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::concurrency::{LockManager, Transaction};
    use crate::disk::DiskManager;
    use std::env;
    use std::sync::Arc;

    fn scratch(tag: &str) -> Arc<BufferPool> {
        let dir = env::temp_dir().join(format!("rucbase-core-scan-{}-{}", tag, std::process::id()));
        Arc::new(BufferPool::new(8, DiskManager::new(dir)))
    }

    #[test]
    fn scan_returns_each_live_rid_once_after_inserts_and_deletes() {
        let bp = scratch("scan1");
        let lm = Arc::new(LockManager::new());
        let file = RecordFileHandle::create(1, 8, bp, lm).unwrap();
        let txn = Transaction::next();

        let mut rids = Vec::new();
        for i in 0..10u64 {
            let rid = file.insert(&i.to_le_bytes(), &txn).unwrap();
            rids.push(rid);
        }
        file.delete(rids[3], &txn).unwrap();
        file.delete(rids[7], &txn).unwrap();

        let scanned: Vec<Rid> = RecordScan::new(&file).collect();
        assert_eq!(scanned.len(), 8);
        assert!(!scanned.contains(&rids[3]));
        assert!(!scanned.contains(&rids[7]));
    }
}
