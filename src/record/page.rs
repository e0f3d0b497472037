use bit_vec::BitVec;

use crate::io::{read_le_i32, write_le_i32};
use crate::types::PAGE_SIZE;

/// Bytes occupied by `num_records` and `next_free_page_no` at the start
/// of every heap page.
pub const HEAP_PAGE_HEADER_SIZE: usize = 8;

/// Given a fixed `record_size`, computes how many slots fit on one page
/// alongside their bitmap, and the bitmap's byte length. Mirrors the
/// reference lineage's `num_records_per_page` derivation: shrink the
/// slot count until header + bitmap + slots fits within `PAGE_SIZE`.
pub fn layout_for(record_size: usize) -> (usize, usize) {
    let usable = PAGE_SIZE - HEAP_PAGE_HEADER_SIZE;
    let mut n = (usable * 8) / (record_size * 8 + 1);
    loop {
        let bitmap_bytes = (n + 7) / 8;
        if HEAP_PAGE_HEADER_SIZE + bitmap_bytes + n * record_size <= PAGE_SIZE {
            return (n, bitmap_bytes);
        }
        n -= 1;
    }
}

/// A slotted heap page: header, bitmap, fixed-size slots. Operates on a
/// caller-owned byte buffer (typically a buffer-pool frame's bytes) so
/// callers control when the page is pinned/unpinned.
pub struct RecordPage<'a> {
    bytes: &'a mut Vec<u8>,
    record_size: usize,
    num_records_per_page: usize,
    bitmap_bytes: usize,
}

impl<'a> RecordPage<'a> {
    pub fn new(bytes: &'a mut Vec<u8>, record_size: usize, num_records_per_page: usize, bitmap_bytes: usize) -> Self {
        RecordPage {
            bytes,
            record_size,
            num_records_per_page,
            bitmap_bytes,
        }
    }

    fn bitmap_offset(&self) -> usize {
        HEAP_PAGE_HEADER_SIZE
    }

    fn slots_offset(&self) -> usize {
        HEAP_PAGE_HEADER_SIZE + self.bitmap_bytes
    }

    pub fn init_header(&mut self, next_free_page_no: i32) {
        self.set_num_records(0);
        self.set_next_free_page_no(next_free_page_no);
        let off = self.bitmap_offset();
        for b in &mut self.bytes[off..off + self.bitmap_bytes] {
            *b = 0;
        }
    }

    pub fn num_records(&self) -> i32 {
        read_le_i32(self.bytes, 0)
    }

    pub fn set_num_records(&mut self, n: i32) {
        write_le_i32(self.bytes, 0, n);
    }

    pub fn next_free_page_no(&self) -> i32 {
        read_le_i32(self.bytes, 4)
    }

    pub fn set_next_free_page_no(&mut self, page_no: i32) {
        write_le_i32(self.bytes, 4, page_no);
    }

    pub fn bitmap(&self) -> BitVec {
        let off = self.bitmap_offset();
        BitVec::from_bytes(&self.bytes[off..off + self.bitmap_bytes])
    }

    fn write_bitmap(&mut self, bitmap: &BitVec) {
        let off = self.bitmap_offset();
        let encoded = bitmap.to_bytes();
        self.bytes[off..off + self.bitmap_bytes].copy_from_slice(&encoded);
    }

    pub fn is_full(&self) -> bool {
        self.num_records() as usize >= self.num_records_per_page
    }

    /// Index of the first unset bit, if any slot is free.
    pub fn first_free_slot(&self) -> Option<usize> {
        let bitmap = self.bitmap();
        (0..self.num_records_per_page).find(|&i| !bitmap.get(i).unwrap_or(false))
    }

    pub fn is_slot_used(&self, slot_no: usize) -> bool {
        self.bitmap().get(slot_no).unwrap_or(false)
    }

    pub fn slot_bytes(&self, slot_no: usize) -> &[u8] {
        let off = self.slots_offset() + slot_no * self.record_size;
        &self.bytes[off..off + self.record_size]
    }

    pub fn write_slot(&mut self, slot_no: usize, data: &[u8]) {
        debug_assert_eq!(data.len(), self.record_size);
        let off = self.slots_offset() + slot_no * self.record_size;
        self.bytes[off..off + self.record_size].copy_from_slice(data);
    }

    /// Marks a slot occupied, writes its bytes and bumps `num_records`.
    pub fn occupy_slot(&mut self, slot_no: usize, data: &[u8]) {
        let mut bitmap = self.bitmap();
        bitmap.set(slot_no, true);
        self.write_bitmap(&bitmap);
        self.write_slot(slot_no, data);
        let n = self.num_records();
        self.set_num_records(n + 1);
    }

    /// Clears a slot's bit and decrements `num_records`. Slot bytes are
    /// left untouched (undefined per the spec).
    pub fn free_slot(&mut self, slot_no: usize) {
        let mut bitmap = self.bitmap();
        bitmap.set(slot_no, false);
        self.write_bitmap(&bitmap);
        let n = self.num_records();
        self.set_num_records(n - 1);
    }

    /// First set bit at or after `from`, scanning within this page only.
    pub fn next_set_bit_from(&self, from: usize) -> Option<usize> {
        let bitmap = self.bitmap();
        (from..self.num_records_per_page).find(|&i| bitmap.get(i).unwrap_or(false))
    }

    pub fn num_records_per_page(&self) -> usize {
        self.num_records_per_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_fits_within_page_size() {
        let (n, bitmap_bytes) = layout_for(16);
        assert!(HEAP_PAGE_HEADER_SIZE + bitmap_bytes + n * 16 <= PAGE_SIZE);
        assert!(n > 0);
    }

    #[test]
    fn occupy_then_free_round_trips_bitmap() {
        let (n, bitmap_bytes) = layout_for(8);
        let mut raw = vec![0u8; PAGE_SIZE];
        let mut page = RecordPage::new(&mut raw, 8, n, bitmap_bytes);
        page.init_header(-1);
        assert_eq!(page.first_free_slot(), Some(0));
        page.occupy_slot(0, &[1u8; 8]);
        assert_eq!(page.num_records(), 1);
        assert!(page.is_slot_used(0));
        assert_eq!(page.first_free_slot(), Some(1));
        page.free_slot(0);
        assert_eq!(page.num_records(), 0);
        assert!(!page.is_slot_used(0));
    }
}
