//! A single relation's on-disk storage: a file header followed by a
//! sequence of fixed-size slotted pages.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, trace};

use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::storage::file_header::FileHeader;
use crate::storage::ids::{FileId, PageId};
use crate::storage::page::SlottedPage;

/// On-disk relation storage. Owns the backing file and tracks per-page free
/// space so `availablePage` doesn't need to scan the whole file.
#[derive(Debug)]
pub struct StorageFile {
    file_id: FileId,
    file: File,
    header_len: u64,
    page_size: usize,
    schema: Schema,
    tuple_size: usize,
    /// (page_index, free bytes), in page order. Entry absent implies the
    /// page has not been materialized yet.
    free_pages: Vec<(u32, usize)>,
}

impl StorageFile {
    /// Create a new, empty relation file at `path`.
    pub fn create(file_id: FileId, path: impl AsRef<Path>, page_size: u16, schema: Schema) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let header = FileHeader::new(page_size, schema.clone());
        let packed = header.pack()?;
        file.write_all(&packed)?;
        file.flush()?;
        debug!(file_id = file_id.0, header_len = packed.len(), "created storage file");
        Ok(Self {
            file_id,
            file,
            header_len: packed.len() as u64,
            page_size: page_size as usize,
            tuple_size: schema.packed_size(),
            schema,
            free_pages: Vec::new(),
        })
    }

    /// Open an existing relation file, reading its header and rebuilding
    /// the free-space directory by scanning every page once.
    pub fn open(file_id: FileId, path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut prefix = vec![0u8; 8];
        file.read_exact(&mut prefix)?;
        let header_len = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
        let mut header_buf = vec![0u8; header_len];
        header_buf[..8].copy_from_slice(&prefix);
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header_buf)?;
        let (header, consumed) = FileHeader::unpack(&header_buf)?;

        let mut storage = Self {
            file_id,
            file,
            header_len: consumed as u64,
            page_size: header.page_size as usize,
            tuple_size: header.schema.packed_size(),
            schema: header.schema,
            free_pages: Vec::new(),
        };
        let num_pages = storage.num_pages_on_disk()?;
        for page_index in 0..num_pages {
            let page = storage.read_page_raw(page_index)?;
            storage.free_pages.push((page_index, page.free_space()));
        }
        Ok(storage)
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> u32 {
        self.free_pages.len() as u32
    }

    fn page_offset(&self, page_index: u32) -> u64 {
        self.header_len + page_index as u64 * self.page_size as u64
    }

    fn num_pages_on_disk(&mut self) -> Result<u32> {
        let len = self.file.metadata()?.len();
        if len < self.header_len {
            return Ok(0);
        }
        Ok(((len - self.header_len) / self.page_size as u64) as u32)
    }

    fn read_page_raw(&mut self, page_index: u32) -> Result<SlottedPage> {
        let mut buf = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(self.page_offset(page_index)))?;
        self.file.read_exact(&mut buf)?;
        SlottedPage::unpack(&buf, self.tuple_size)
    }

    /// Read one page by index.
    pub fn read_page(&mut self, page_index: u32) -> Result<SlottedPage> {
        if page_index >= self.num_pages() {
            return Err(Error::InvalidPageId {
                file_id: self.file_id.0,
                page_index,
                num_pages: self.num_pages(),
            });
        }
        self.read_page_raw(page_index)
    }

    /// Write a page back. Updates in place if `page_index` already exists,
    /// appends a new page otherwise. This is the single entry point for
    /// page persistence; there is no separate "update" call.
    pub fn write_page(&mut self, page_index: u32, page: &SlottedPage) -> Result<()> {
        let bytes = page.pack();
        self.file.seek(SeekFrom::Start(self.page_offset(page_index)))?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        self.note_free_space(page_index, page.free_space())?;
        trace!(file_id = self.file_id.0, page_index, "wrote page");
        Ok(())
    }

    /// Record a page's current free space in the directory without
    /// touching disk, for callers (e.g. the buffer pool) that mutate a
    /// cached page in place and flush it later.
    pub fn note_free_space(&mut self, page_index: u32, free_space: usize) -> Result<()> {
        match self.free_pages.iter_mut().find(|(idx, _)| *idx == page_index) {
            Some(entry) => entry.1 = free_space,
            None => {
                if page_index as usize != self.free_pages.len() {
                    return Err(Error::Internal(format!(
                        "pages must be appended contiguously: expected index {}, got {}",
                        self.free_pages.len(),
                        page_index
                    )));
                }
                self.free_pages.push((page_index, free_space));
            }
        }
        Ok(())
    }

    /// Allocate a brand-new, empty page and write it out, returning its id.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_index = self.num_pages();
        let page = SlottedPage::new(self.page_size, self.tuple_size);
        self.write_page(page_index, &page)?;
        Ok(PageId::new(self.file_id, page_index))
    }

    /// Find the first page with room for another tuple. Returns the index
    /// one past the last page (to be materialized via `allocate_page`) if
    /// every existing page is full.
    pub fn available_page(&self) -> u32 {
        self.free_pages
            .iter()
            .find(|(_, free)| *free >= self.tuple_size)
            .map(|(idx, _)| *idx)
            .unwrap_or(self.free_pages.len() as u32)
    }

    /// Insert a packed tuple, allocating a new page if every existing page
    /// is full. Returns the tuple's slot location.
    pub fn insert_tuple(&mut self, packed: &[u8]) -> Result<(PageId, u16)> {
        let page_index = self.available_page();
        let mut page = if page_index < self.num_pages() {
            self.read_page(page_index)?
        } else {
            SlottedPage::new(self.page_size, self.tuple_size)
        };
        let slot = page.insert_tuple(packed)?;
        self.write_page(page_index, &page)?;
        Ok((PageId::new(self.file_id, page_index), slot))
    }

    /// Iterate over every page, in page-index order.
    pub fn pages(&mut self) -> Result<Vec<SlottedPage>> {
        (0..self.num_pages()).map(|i| self.read_page(i)).collect()
    }

    /// Like `pages()`, but documented as the guaranteed-fresh bypass read:
    /// `StorageFile` itself has no cache of its own, so every read already
    /// goes straight to disk — this is the explicit name for that
    /// behavior, for callers that specifically need to skip whatever a
    /// buffer pool has cached (e.g. rereading a scratch relation this same
    /// operator just wrote through `insert_tuple`).
    pub fn direct_pages(&mut self) -> Result<Vec<SlottedPage>> {
        self.pages()
    }

    /// Iterate over every live tuple across every page, in `(PageId, slot,
    /// bytes)` order.
    pub fn tuples(&mut self) -> Result<Vec<(PageId, u16, Vec<u8>)>> {
        let mut out = Vec::new();
        for page_index in 0..self.num_pages() {
            let page = self.read_page(page_index)?;
            let page_id = PageId::new(self.file_id, page_index);
            for (slot, bytes) in page.iter() {
                out.push((page_id, slot, bytes.to_vec()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use tempfile::NamedTempFile;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("tag", DataType::Varchar(8)),
        ])
    }

    #[test]
    fn test_create_insert_read_round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = StorageFile::create(FileId(1), tmp.path(), 256, schema()).unwrap();
        let packed = file.schema().pack(&[
            crate::value::Value::Integer(1),
            crate::value::Value::Varchar("a".to_string()),
        ]).unwrap();
        let (page_id, slot) = file.insert_tuple(&packed).unwrap();
        assert_eq!(page_id.page_index, 0);
        let page = file.read_page(0).unwrap();
        assert_eq!(page.get_tuple(slot), Some(packed.as_slice()));
    }

    #[test]
    fn test_insert_allocates_new_page_when_full() {
        let tmp = NamedTempFile::new().unwrap();
        // Tiny page: header(4) + 1 slot of (1 + schema size)
        let mut file = StorageFile::create(FileId(2), tmp.path(), 32, schema()).unwrap();
        let packed = file.schema().pack(&[
            crate::value::Value::Integer(1),
            crate::value::Value::Varchar("a".to_string()),
        ]).unwrap();
        file.insert_tuple(&packed).unwrap();
        assert_eq!(file.num_pages(), 1);
        file.insert_tuple(&packed).unwrap();
        assert_eq!(file.num_pages(), 2);
    }

    #[test]
    fn test_open_reconstructs_free_page_directory() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        {
            let mut file = StorageFile::create(FileId(3), &path, 256, schema()).unwrap();
            let packed = file.schema().pack(&[
                crate::value::Value::Integer(1),
                crate::value::Value::Varchar("a".to_string()),
            ]).unwrap();
            file.insert_tuple(&packed).unwrap();
        }
        let mut reopened = StorageFile::open(FileId(3), &path).unwrap();
        assert_eq!(reopened.num_pages(), 1);
        let tuples = reopened.tuples().unwrap();
        assert_eq!(tuples.len(), 1);
    }
}
