//! Identifiers for on-disk storage objects.

use std::fmt;

/// Identifies a relation's backing storage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Identifies one page within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub file_id: FileId,
    pub page_index: u32,
}

impl PageId {
    pub fn new(file_id: FileId, page_index: u32) -> Self {
        Self {
            file_id,
            page_index,
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:page{}", self.file_id, self.page_index)
    }
}

/// Identifies one tuple slot within one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot_index: u16,
}

impl TupleId {
    pub fn new(page_id: PageId, slot_index: u16) -> Self {
        Self {
            page_id,
            slot_index,
        }
    }
}

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:slot{}", self.page_id, self.slot_index)
    }
}
