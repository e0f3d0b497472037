use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;

use crate::disk::DiskManager;
use crate::error::{Error, Result};
use crate::replacer::{ClockReplacer, FrameId};
use crate::types::{PageId, PAGE_SIZE};

struct Frame {
    page_id: Option<PageId>,
    pin_count: u32,
    is_dirty: bool,
    bytes: Vec<u8>,
}

impl Frame {
    fn empty() -> Self {
        Frame {
            page_id: None,
            pin_count: 0,
            is_dirty: false,
            bytes: vec![0u8; PAGE_SIZE],
        }
    }
}

struct Inner {
    frames: Vec<Frame>,
    free_list: Vec<FrameId>,
    page_table: HashMap<PageId, FrameId>,
    disk: DiskManager,
}

/// Fixed-capacity frame cache mediating access to disk pages, using a
/// clock replacement policy. All operations take a single coarse mutex.
pub struct BufferPool {
    inner: Mutex<Inner>,
    replacer: ClockReplacer,
    pool_size: usize,
}

impl BufferPool {
    pub fn new(pool_size: usize, disk: DiskManager) -> Self {
        let frames = (0..pool_size).map(|_| Frame::empty()).collect();
        let free_list = (0..pool_size).collect();
        BufferPool {
            inner: Mutex::new(Inner {
                frames,
                free_list,
                page_table: HashMap::new(),
                disk,
            }),
            replacer: ClockReplacer::new(pool_size),
            pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    fn pick_victim(inner: &mut Inner, replacer: &ClockReplacer) -> Option<FrameId> {
        if let Some(fid) = inner.free_list.pop() {
            return Some(fid);
        }
        replacer.victim()
    }

    fn evict(inner: &mut Inner, fid: FrameId) -> std::io::Result<()> {
        let old_page_id = inner.frames[fid].page_id;
        if inner.frames[fid].is_dirty {
            if let Some(pid) = old_page_id {
                inner.disk.write_page(pid, &inner.frames[fid].bytes)?;
            }
        }
        if let Some(pid) = old_page_id {
            inner.page_table.remove(&pid);
        }
        Ok(())
    }

    /// Fetches `page_id`, pinning it. Returns a copy of the page bytes;
    /// callers mutate a local copy and call [`BufferPool::unpin`] with the
    /// mutated bytes via [`BufferPool::write_frame`].
    pub fn fetch(&self, page_id: PageId) -> Result<FrameId> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&fid) = inner.page_table.get(&page_id) {
            inner.frames[fid].pin_count += 1;
            self.replacer.pin(fid);
            return Ok(fid);
        }
        let fid = Self::pick_victim(&mut inner, &self.replacer).ok_or(Error::BufferPoolExhausted)?;
        Self::evict(&mut inner, fid)?;
        let bytes = inner.disk.read_page(page_id)?;
        inner.frames[fid] = Frame {
            page_id: Some(page_id),
            pin_count: 1,
            is_dirty: false,
            bytes,
        };
        inner.page_table.insert(page_id, fid);
        self.replacer.pin(fid);
        debug!("fetched page {:?} into frame {}", page_id, fid);
        Ok(fid)
    }

    /// Allocates a new page on `file_id`, pinning its frame. Returns the
    /// frame id and the freshly allocated page id.
    pub fn new_page(&self, file_id: i32) -> Result<(FrameId, PageId)> {
        let mut inner = self.inner.lock().unwrap();
        let fid = Self::pick_victim(&mut inner, &self.replacer).ok_or(Error::BufferPoolExhausted)?;
        Self::evict(&mut inner, fid)?;
        let page_no = inner.disk.allocate_page(file_id);
        let page_id = PageId::new(file_id, page_no);
        inner.frames[fid] = Frame {
            page_id: Some(page_id),
            pin_count: 1,
            is_dirty: false,
            bytes: vec![0u8; PAGE_SIZE],
        };
        inner.page_table.insert(page_id, fid);
        self.replacer.pin(fid);
        debug!("allocated new page {:?} into frame {}", page_id, fid);
        Ok((fid, page_id))
    }

    pub fn read_frame(&self, fid: FrameId) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        inner.frames[fid].bytes.clone()
    }

    pub fn write_frame(&self, fid: FrameId, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.frames[fid].bytes.copy_from_slice(bytes);
        inner.frames[fid].is_dirty = true;
    }

    /// Unpins `page_id`. `dirty_hint` is OR'd into the frame's dirty flag.
    /// Returns whether the page was mapped.
    pub fn unpin(&self, page_id: PageId, dirty_hint: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&fid) = inner.page_table.get(&page_id) {
            let frame = &mut inner.frames[fid];
            if frame.pin_count > 0 {
                frame.pin_count -= 1;
            }
            if dirty_hint {
                frame.is_dirty = true;
            }
            if frame.pin_count == 0 {
                self.replacer.unpin(fid);
            }
            true
        } else {
            false
        }
    }

    pub fn flush(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&fid) = inner.page_table.get(&page_id) {
            let bytes = inner.frames[fid].bytes.clone();
            inner.disk.write_page(page_id, &bytes)?;
            inner.frames[fid].is_dirty = false;
        }
        Ok(())
    }

    pub fn flush_all(&self, file_id: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let page_ids: Vec<PageId> = inner
            .page_table
            .keys()
            .filter(|pid| pid.file_id == file_id)
            .cloned()
            .collect();
        for pid in page_ids {
            let fid = inner.page_table[&pid];
            let bytes = inner.frames[fid].bytes.clone();
            inner.disk.write_page(pid, &bytes)?;
            inner.frames[fid].is_dirty = false;
        }
        Ok(())
    }

    /// Removes `page_id` from the pool, returning the frame to the
    /// free-list. Fails if the page is still pinned.
    pub fn delete(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&fid) = inner.page_table.get(&page_id) {
            if inner.frames[fid].pin_count > 0 {
                return Err(Error::PageNotExist(page_id));
            }
            inner.page_table.remove(&page_id);
            inner.disk.deallocate_page(page_id);
            inner.frames[fid] = Frame::empty();
            inner.free_list.push(fid);
        }
        Ok(())
    }

    /// Clears every mapping without flushing; used by tests that want a
    /// cold pool between scenarios.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.page_table.clear();
        for (i, f) in inner.frames.iter_mut().enumerate() {
            *f = Frame::empty();
            if !inner.free_list.contains(&i) {
                inner.free_list.push(i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scratch_disk(tag: &str) -> DiskManager {
        let dir = env::temp_dir().join(format!("rucbase-core-bp-{}-{}", tag, std::process::id()));
        DiskManager::new(dir)
    }

    #[test]
    fn fetch_unpin_fetch_is_idempotent() {
        let bp = BufferPool::new(2, scratch_disk("idem"));
        let (fid, pid) = bp.new_page(1).unwrap();
        bp.write_frame(fid, &[7u8; PAGE_SIZE]);
        bp.unpin(pid, true);

        let fid2 = bp.fetch(pid).unwrap();
        let bytes = bp.read_frame(fid2);
        assert_eq!(bytes[0], 7);
        bp.unpin(pid, false);
    }

    #[test]
    fn new_unpin_flush_fetch_survives_restart() {
        let dir = env::temp_dir().join(format!("rucbase-core-bp-restart-{}", std::process::id()));
        {
            let bp = BufferPool::new(1, DiskManager::new(&dir));
            let (fid, pid) = bp.new_page(9).unwrap();
            bp.write_frame(fid, &[42u8; PAGE_SIZE]);
            bp.unpin(pid, true);
            bp.flush_all(9).unwrap();
        }
        {
            let bp = BufferPool::new(1, DiskManager::new(&dir));
            let fid = bp.fetch(PageId::new(9, 0)).unwrap();
            let bytes = bp.read_frame(fid);
            assert_eq!(bytes[0], 42);
        }
    }

    #[test]
    fn fetch_fails_when_pool_saturated() {
        let bp = BufferPool::new(1, scratch_disk("sat"));
        let (_fid, _pid) = bp.new_page(1).unwrap();
        // frame stays pinned, no free-list slot, no victim
        let err = bp.fetch(PageId::new(1, 5));
        assert!(err.is_err());
    }

    #[test]
    fn delete_fails_while_pinned() {
        let bp = BufferPool::new(1, scratch_disk("del"));
        let (_fid, pid) = bp.new_page(1).unwrap();
        assert!(bp.delete(pid).is_err());
        bp.unpin(pid, false);
        assert!(bp.delete(pid).is_ok());
    }
}
