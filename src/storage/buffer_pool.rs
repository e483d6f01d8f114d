//! A fixed-size buffer pool caching slotted pages in memory, evicting by
//! true LRU (least *recently accessed*, not least recently inserted).
//!
//! The pool and the `FileManager` it reads/writes through would otherwise
//! need to know about each other at construction time: the pool needs a
//! `FileManager` to service misses, and in a fuller engine the manager's
//! higher-level relation operations route back through the pool for
//! caching. We break the cycle by constructing the pool with an empty
//! `file_manager` slot and wiring it in afterwards via `set_file_manager`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::storage::file_manager::FileManager;
use crate::storage::ids::{FileId, PageId, TupleId};
use crate::storage::page::SlottedPage;

struct Frame {
    page_id: PageId,
    page: SlottedPage,
    dirty: bool,
    pin_count: u32,
    last_access: u64,
}

pub struct BufferPool {
    pool_size: usize,
    clock: u64,
    frames: Vec<Option<Frame>>,
    page_table: HashMap<PageId, usize>,
    free_list: Vec<usize>,
    file_manager: Option<Arc<Mutex<FileManager>>>,
}

impl BufferPool {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            clock: 0,
            frames: (0..pool_size).map(|_| None).collect(),
            page_table: HashMap::new(),
            free_list: (0..pool_size).collect(),
            file_manager: None,
        }
    }

    pub fn set_file_manager(&mut self, file_manager: Arc<Mutex<FileManager>>) {
        self.file_manager = Some(file_manager);
    }

    fn file_manager(&self) -> Result<Arc<Mutex<FileManager>>> {
        self.file_manager
            .clone()
            .ok_or_else(|| Error::Internal("buffer pool has no file manager attached".to_string()))
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Number of frames currently unpinned or free — the budget a caller
    /// (e.g. block-nested-loops join) can pin without risking pool
    /// exhaustion; callers typically reserve one frame for scratch use, so
    /// budgets are phrased as `numFreePages() + 1`.
    pub fn num_free_pages(&self) -> usize {
        self.free_list.len()
            + self
                .frames
                .iter()
                .filter(|f| matches!(f, Some(fr) if fr.pin_count == 0))
                .count()
    }

    fn victim_frame(&mut self) -> Result<usize> {
        if let Some(idx) = self.free_list.pop() {
            return Ok(idx);
        }
        self.evict_page()?;
        self.free_list.pop().ok_or(Error::PoolExhausted)
    }

    /// Choose the resident, unpinned page with the smallest `lastAccess`,
    /// flush it if dirty, and discard its frame. Fails if every resident
    /// page is currently pinned.
    pub fn evict_page(&mut self) -> Result<PageId> {
        let victim = self
            .frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| match f {
                Some(fr) if fr.pin_count == 0 => Some((i, fr.last_access)),
                _ => None,
            })
            .min_by_key(|&(_, last_access)| last_access)
            .map(|(i, _)| i);

        let idx = victim.ok_or(Error::PoolExhausted)?;
        let dirty = self.frames[idx].as_ref().unwrap().dirty;
        self.flush_frame(idx)?;
        let page_id = self.frames[idx].as_ref().unwrap().page_id;
        debug!(%page_id, dirty, "evicted page");
        self.page_table.remove(&page_id);
        self.frames[idx] = None;
        self.free_list.push(idx);
        Ok(page_id)
    }

    fn flush_frame(&mut self, idx: usize) -> Result<()> {
        if let Some(frame) = &self.frames[idx] {
            if frame.dirty {
                debug!(page_id = %frame.page_id, "flushing dirty page");
                let fm = self.file_manager()?;
                let mut fm = fm.lock().unwrap();
                let file = fm.file_mut(frame.page_id.file_id)?;
                file.write_page(frame.page_id.page_index, &frame.page)?;
            }
        }
        Ok(())
    }

    /// Fetch a page into the pool, pinning it. Loads from disk on a miss.
    pub fn get_page(&mut self, page_id: PageId) -> Result<usize> {
        let now = self.tick();
        if let Some(&idx) = self.page_table.get(&page_id) {
            let frame = self.frames[idx].as_mut().unwrap();
            frame.pin_count += 1;
            frame.last_access = now;
            trace!(%page_id, "buffer pool hit");
            return Ok(idx);
        }

        let idx = self.victim_frame()?;
        let page = {
            let fm = self.file_manager()?;
            let mut fm = fm.lock().unwrap();
            let file = fm.file_mut(page_id.file_id)?;
            file.read_page(page_id.page_index)?
        };
        self.frames[idx] = Some(Frame {
            page_id,
            page,
            dirty: false,
            pin_count: 1,
            last_access: now,
        });
        self.page_table.insert(page_id, idx);
        trace!(%page_id, "buffer pool miss, loaded from disk");
        Ok(idx)
    }

    /// Allocate a brand-new page for `file_id`, caching and pinning it.
    pub fn allocate_page(&mut self, file_id: FileId) -> Result<PageId> {
        let page_id = {
            let fm = self.file_manager()?;
            let mut fm = fm.lock().unwrap();
            let file = fm.file_mut(file_id)?;
            file.allocate_page()?
        };
        self.get_page(page_id)?;
        Ok(page_id)
    }

    /// Pin a page already resident in the pool without touching its
    /// contents, fetching it from disk first on a miss. Equivalent to
    /// `get_page` followed by discarding the frame index; exposed
    /// separately so callers that only need the pin (e.g. block-nested-loops
    /// join holding a page open across a probe pass) don't need to know
    /// about frame indices at all.
    pub fn pin_page(&mut self, page_id: PageId) -> Result<()> {
        self.get_page(page_id)?;
        Ok(())
    }

    /// Overwrite a resident page's contents, pinning it if necessary and
    /// marking it dirty. Unlike `page_mut`, this takes the replacement page
    /// directly rather than requiring the caller to hold a frame index.
    pub fn write_page(&mut self, page_id: PageId, page: SlottedPage) -> Result<()> {
        let idx = match self.page_table.get(&page_id) {
            Some(&idx) => idx,
            None => self.get_page(page_id)?,
        };
        let frame = self.frames[idx].as_mut().unwrap();
        frame.page = page;
        frame.dirty = true;
        Ok(())
    }

    /// Insert a packed tuple into `file_id`'s relation through the pool:
    /// finds the available page (allocating a new one if every existing
    /// page is full), mutates the cached copy, and leaves it dirty rather
    /// than writing through to disk immediately. Keeps `insert_tuple`
    /// callers from desyncing with whatever the pool already has cached,
    /// unlike `StorageFile::insert_tuple`'s direct file access.
    pub fn insert_tuple(&mut self, file_id: FileId, packed: &[u8]) -> Result<(PageId, TupleId)> {
        let (page_index, num_pages) = {
            let fm = self.file_manager()?;
            let mut fm = fm.lock().unwrap();
            let file = fm.file_mut(file_id)?;
            (file.available_page(), file.num_pages())
        };

        let page_id = if page_index < num_pages {
            let idx = self.get_page(PageId::new(file_id, page_index))?;
            self.frames[idx].as_ref().unwrap().page_id
        } else {
            self.allocate_page(file_id)?
        };

        let idx = *self.page_table.get(&page_id).unwrap();
        let slot = {
            let page = self.page_mut(idx);
            page.insert_tuple(packed)?
        };
        let free_space = self.page(idx).free_space();
        self.unpin_page(page_id, true)?;

        let fm = self.file_manager()?;
        let mut fm = fm.lock().unwrap();
        let file = fm.file_mut(file_id)?;
        file.note_free_space(page_id.page_index, free_space)?;

        Ok((page_id, TupleId::new(page_id, slot)))
    }

    pub fn page(&self, idx: usize) -> &SlottedPage {
        &self.frames[idx].as_ref().unwrap().page
    }

    pub fn page_mut(&mut self, idx: usize) -> &mut SlottedPage {
        let frame = self.frames[idx].as_mut().unwrap();
        frame.dirty = true;
        &mut frame.page
    }

    pub fn unpin_page(&mut self, page_id: PageId, dirty: bool) -> Result<()> {
        let &idx = self
            .page_table
            .get(&page_id)
            .ok_or_else(|| Error::Internal(format!("{page_id} is not in the buffer pool")))?;
        let frame = self.frames[idx].as_mut().unwrap();
        if dirty {
            frame.dirty = true;
        }
        if frame.pin_count == 0 {
            warn!(%page_id, "unpin called on a page with zero pins");
            return Ok(());
        }
        frame.pin_count -= 1;
        Ok(())
    }

    pub fn flush_page(&mut self, page_id: PageId) -> Result<()> {
        let &idx = self
            .page_table
            .get(&page_id)
            .ok_or_else(|| Error::Internal(format!("{page_id} is not in the buffer pool")))?;
        self.flush_frame(idx)?;
        self.frames[idx].as_mut().unwrap().dirty = false;
        Ok(())
    }

    pub fn discard_page(&mut self, page_id: PageId) -> Result<()> {
        if let Some(idx) = self.page_table.remove(&page_id) {
            self.frames[idx] = None;
            self.free_list.push(idx);
        }
        Ok(())
    }

    /// Flush every dirty page and release every frame.
    pub fn clear(&mut self) -> Result<()> {
        let page_ids: Vec<PageId> = self.page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
            self.discard_page(page_id)?;
        }
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Schema};
    use crate::storage::file_manager::FileManager;
    use tempfile::TempDir;

    fn setup(pool_size: usize) -> (BufferPool, Arc<Mutex<FileManager>>, FileId, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut fm = FileManager::new(dir.path(), 128);
        let schema = Schema::new(vec![Column::new("id", DataType::Integer)]);
        let file_id = fm.create_relation("t", schema).unwrap();
        let fm = Arc::new(Mutex::new(fm));
        let mut pool = BufferPool::new(pool_size);
        pool.set_file_manager(fm.clone());
        (pool, fm, file_id, dir)
    }

    #[test]
    fn test_allocate_and_fetch() {
        let (mut pool, _fm, file_id, _dir) = setup(4);
        let page_id = pool.allocate_page(file_id).unwrap();
        pool.unpin_page(page_id, false).unwrap();
        let idx = pool.get_page(page_id).unwrap();
        assert_eq!(pool.page(idx).num_slots() > 0, true);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let (mut pool, _fm, file_id, _dir) = setup(2);
        let p0 = pool.allocate_page(file_id).unwrap();
        pool.unpin_page(p0, false).unwrap();
        let p1 = pool.allocate_page(file_id).unwrap();
        pool.unpin_page(p1, false).unwrap();

        // touch p0 again so p1 becomes the least-recently-accessed frame
        pool.get_page(p0).unwrap();
        pool.unpin_page(p0, false).unwrap();

        let p2 = pool.allocate_page(file_id).unwrap();
        pool.unpin_page(p2, false).unwrap();

        // p1 should have been evicted, p0 retained
        assert!(pool.page_table.contains_key(&p0));
        assert!(!pool.page_table.contains_key(&p1));
        assert!(pool.page_table.contains_key(&p2));
    }

    #[test]
    fn test_pool_exhausted_when_everything_pinned() {
        let (mut pool, _fm, file_id, _dir) = setup(1);
        let _p0 = pool.allocate_page(file_id).unwrap(); // stays pinned
        let result = pool.allocate_page(file_id);
        assert!(matches!(result, Err(Error::PoolExhausted)));
    }

    #[test]
    fn test_num_free_pages_accounts_for_pins() {
        let (mut pool, _fm, file_id, _dir) = setup(3);
        assert_eq!(pool.num_free_pages(), 3);
        let p0 = pool.allocate_page(file_id).unwrap();
        assert_eq!(pool.num_free_pages(), 2);
        pool.unpin_page(p0, false).unwrap();
        assert_eq!(pool.num_free_pages(), 3);
    }
}
