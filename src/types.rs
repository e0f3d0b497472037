use std::fmt;

/// Identifies a file (heap file or index file) within the storage engine.
pub type FileId = i32;

/// 4096-byte pages, as in the reference lineage.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel used for "no page" (empty free-list, no parent, no root).
pub const INVALID_PAGE_NO: i32 = -1;

/// Identifies a page within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub file_id: FileId,
    pub page_no: i32,
}

impl PageId {
    pub fn new(file_id: FileId, page_no: i32) -> Self {
        PageId { file_id, page_no }
    }
}

/// Record identifier: `(page_no, slot_no)`, unique within a single heap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_no: i32,
    pub slot_no: i32,
}

impl Rid {
    pub fn new(page_no: i32, slot_no: i32) -> Self {
        Rid { page_no, slot_no }
    }

    /// The end-of-scan / not-found sentinel.
    pub fn invalid() -> Self {
        Rid { page_no: -1, slot_no: -1 }
    }

    pub fn is_invalid(&self) -> bool {
        self.page_no == -1 && self.slot_no == -1
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

/// Index identifier: `(page_no, slot_no)` within the B+-tree leaf level.
/// Distinct type from [`Rid`] even though the wire shape matches, so the
/// two are never accidentally interchanged at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iid {
    pub page_no: i32,
    pub slot_no: i32,
}

impl Iid {
    pub fn new(page_no: i32, slot_no: i32) -> Self {
        Iid { page_no, slot_no }
    }
}
