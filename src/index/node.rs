use crate::io::{read_le_i32, write_le_i32};
use crate::types::Rid;

/// Bytes occupied by the node header before the key/rid arrays begin.
pub const NODE_HEADER_SIZE: usize = 24;

const OFF_IS_LEAF: usize = 0;
const OFF_NUM_KEY: usize = 4;
const OFF_PARENT: usize = 8;
const OFF_PREV_LEAF: usize = 12;
const OFF_NEXT_LEAF: usize = 16;
const OFF_NEXT_FREE: usize = 20;

const KEY_WIDTH: usize = 4;
const RID_WIDTH: usize = 8;

/// A B+-tree node page: header, `max_n` fixed-width keys, `max_n` rid
/// slots. Keyed on a single `i32` column — this implementation
/// specializes the column type to integers (see DESIGN.md).
pub struct BTreeNode<'a> {
    bytes: &'a mut Vec<u8>,
    max_n: usize,
}

impl<'a> BTreeNode<'a> {
    pub fn new(bytes: &'a mut Vec<u8>, max_n: usize) -> Self {
        BTreeNode { bytes, max_n }
    }

    pub fn max_n(&self) -> usize {
        self.max_n
    }

    fn keys_offset(&self) -> usize {
        NODE_HEADER_SIZE
    }

    fn rids_offset(&self) -> usize {
        NODE_HEADER_SIZE + self.max_n * KEY_WIDTH
    }

    pub fn init(&mut self, is_leaf: bool, parent: i32) {
        self.set_is_leaf(is_leaf);
        self.set_num_key(0);
        self.set_parent_page_no(parent);
        self.set_prev_leaf(-1);
        self.set_next_leaf(-1);
        self.set_next_free_page_no(-1);
    }

    pub fn is_leaf(&self) -> bool {
        read_le_i32(self.bytes, OFF_IS_LEAF) != 0
    }

    pub fn set_is_leaf(&mut self, v: bool) {
        write_le_i32(self.bytes, OFF_IS_LEAF, if v { 1 } else { 0 });
    }

    pub fn num_key(&self) -> usize {
        read_le_i32(self.bytes, OFF_NUM_KEY) as usize
    }

    pub fn set_num_key(&mut self, n: usize) {
        write_le_i32(self.bytes, OFF_NUM_KEY, n as i32);
    }

    pub fn parent_page_no(&self) -> i32 {
        read_le_i32(self.bytes, OFF_PARENT)
    }

    pub fn set_parent_page_no(&mut self, p: i32) {
        write_le_i32(self.bytes, OFF_PARENT, p);
    }

    pub fn prev_leaf(&self) -> i32 {
        read_le_i32(self.bytes, OFF_PREV_LEAF)
    }

    pub fn set_prev_leaf(&mut self, p: i32) {
        write_le_i32(self.bytes, OFF_PREV_LEAF, p);
    }

    pub fn next_leaf(&self) -> i32 {
        read_le_i32(self.bytes, OFF_NEXT_LEAF)
    }

    pub fn set_next_leaf(&mut self, p: i32) {
        write_le_i32(self.bytes, OFF_NEXT_LEAF, p);
    }

    pub fn next_free_page_no(&self) -> i32 {
        read_le_i32(self.bytes, OFF_NEXT_FREE)
    }

    pub fn set_next_free_page_no(&mut self, p: i32) {
        write_le_i32(self.bytes, OFF_NEXT_FREE, p);
    }

    pub fn key_at(&self, i: usize) -> i32 {
        read_le_i32(self.bytes, self.keys_offset() + i * KEY_WIDTH)
    }

    pub fn set_key_at(&mut self, i: usize, key: i32) {
        let off = self.keys_offset() + i * KEY_WIDTH;
        write_le_i32(self.bytes, off, key);
    }

    pub fn rid_at(&self, i: usize) -> Rid {
        let off = self.rids_offset() + i * RID_WIDTH;
        Rid::new(read_le_i32(self.bytes, off), read_le_i32(self.bytes, off + 4))
    }

    pub fn set_rid_at(&mut self, i: usize, rid: Rid) {
        let off = self.rids_offset() + i * RID_WIDTH;
        write_le_i32(self.bytes, off, rid.page_no);
        write_le_i32(self.bytes, off + 4, rid.slot_no);
    }

    /// First index `i` with `key_at(i) >= key`; `num_key()` if none.
    pub fn lower_bound(&self, key: i32) -> usize {
        let n = self.num_key();
        let mut lo = 0;
        let mut hi = n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) >= key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// First index `i >= 1` with `key_at(i) > key`.
    pub fn upper_bound(&self, key: i32) -> usize {
        let n = self.num_key();
        let mut lo = 0;
        let mut hi = n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) > key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo.max(1).min(n.max(1))
    }

    /// Child page number to descend into for `key`, exploiting the
    /// "key[i] = min key of subtree i" convention.
    pub fn internal_lookup(&self, key: i32) -> i32 {
        let idx = self.upper_bound(key);
        let idx = if idx == 0 { 0 } else { idx - 1 };
        self.rid_at(idx).page_no
    }

    pub fn leaf_lookup(&self, key: i32) -> Option<Rid> {
        let idx = self.lower_bound(key);
        if idx < self.num_key() && self.key_at(idx) == key {
            Some(self.rid_at(idx))
        } else {
            None
        }
    }

    /// Shifts the tail right by one slot and writes `(key, rid)` at `idx`.
    pub fn insert_pair(&mut self, idx: usize, key: i32, rid: Rid) {
        let n = self.num_key();
        for i in (idx..n).rev() {
            let k = self.key_at(i);
            let r = self.rid_at(i);
            self.set_key_at(i + 1, k);
            self.set_rid_at(i + 1, r);
        }
        self.set_key_at(idx, key);
        self.set_rid_at(idx, rid);
        self.set_num_key(n + 1);
    }

    /// No-op if `key` already exists (duplicate keys forbidden). Returns
    /// whether the key was newly inserted.
    pub fn insert(&mut self, key: i32, rid: Rid) -> bool {
        let idx = self.lower_bound(key);
        if idx < self.num_key() && self.key_at(idx) == key {
            return false;
        }
        self.insert_pair(idx, key, rid);
        true
    }

    /// Shifts the tail left by one slot, removing the pair at `idx`.
    pub fn erase_pair(&mut self, idx: usize) {
        let n = self.num_key();
        for i in idx..n - 1 {
            let k = self.key_at(i + 1);
            let r = self.rid_at(i + 1);
            self.set_key_at(i, k);
            self.set_rid_at(i, r);
        }
        self.set_num_key(n - 1);
    }

    pub fn remove(&mut self, key: i32) -> bool {
        let idx = self.lower_bound(key);
        if idx < self.num_key() && self.key_at(idx) == key {
            self.erase_pair(idx);
            true
        } else {
            false
        }
    }

    /// Linear scan for the index of `child_page_no` among this internal
    /// node's rid column. Panics if not found — callers only call this
    /// when the child is known to belong to this parent.
    pub fn find_child(&self, child_page_no: i32) -> usize {
        (0..self.num_key())
            .find(|&i| self.rid_at(i).page_no == child_page_no)
            .expect("child page_no not found among parent's children")
    }

    pub fn is_full(&self) -> bool {
        self.num_key() >= self.max_n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAGE_SIZE;

    fn blank_node(max_n: usize) -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn lower_upper_bound_on_sorted_keys() {
        let mut raw = blank_node(8);
        let mut node = BTreeNode::new(&mut raw, 8);
        node.init(true, -1);
        for (i, k) in [1, 3, 5, 7].iter().enumerate() {
            node.set_key_at(i, *k);
            node.set_rid_at(i, Rid::new(1, i as i32));
        }
        node.set_num_key(4);

        assert_eq!(node.lower_bound(5), 2);
        assert_eq!(node.lower_bound(4), 2);
        assert_eq!(node.lower_bound(8), 4);
        assert_eq!(node.leaf_lookup(5), Some(Rid::new(1, 2)));
        assert_eq!(node.leaf_lookup(4), None);
    }

    #[test]
    fn internal_lookup_uses_min_of_subtree_convention() {
        let mut raw = blank_node(4);
        let mut node = BTreeNode::new(&mut raw, 4);
        node.init(false, -1);
        node.set_key_at(0, 1);
        node.set_rid_at(0, Rid::new(10, -1));
        node.set_key_at(1, 3);
        node.set_rid_at(1, Rid::new(20, -1));
        node.set_num_key(2);

        assert_eq!(node.internal_lookup(1), 10);
        assert_eq!(node.internal_lookup(2), 10);
        assert_eq!(node.internal_lookup(3), 20);
        assert_eq!(node.internal_lookup(100), 20);
    }

    #[test]
    fn insert_rejects_duplicate_keys() {
        let mut raw = blank_node(4);
        let mut node = BTreeNode::new(&mut raw, 4);
        node.init(true, -1);
        assert!(node.insert(5, Rid::new(1, 0)));
        assert!(!node.insert(5, Rid::new(1, 1)));
        assert_eq!(node.num_key(), 1);
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let mut raw = blank_node(4);
        let mut node = BTreeNode::new(&mut raw, 4);
        node.init(true, -1);
        node.insert(3, Rid::new(1, 0));
        node.insert(1, Rid::new(1, 1));
        node.insert(2, Rid::new(1, 2));
        assert_eq!((0..3).map(|i| node.key_at(i)).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(node.remove(2));
        assert_eq!((0..2).map(|i| node.key_at(i)).collect::<Vec<_>>(), vec![1, 3]);
    }
}
