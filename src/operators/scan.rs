//! Full scan of a relation, one page at a time through the buffer pool.

use std::sync::{Arc, Mutex};

use crate::catalog::Schema;
use crate::error::Result;
use crate::operators::operator::Operator;
use crate::storage::{BufferPool, FileId, FileManager, PageId, Tuple};

#[derive(Debug)]
pub struct TableScan {
    relation_name: String,
    file_id: FileId,
    schema: Schema,
    buffer_pool: Arc<Mutex<BufferPool>>,
    file_manager: Arc<Mutex<FileManager>>,
    num_pages: u32,
    current_page_index: u32,
    /// Tuples read out of the currently pinned page, and our position in it.
    current_page_tuples: Vec<Vec<u8>>,
    position_in_page: usize,
    pinned_page: Option<PageId>,
}

impl TableScan {
    pub fn new(
        relation_name: impl Into<String>,
        file_id: FileId,
        schema: Schema,
        buffer_pool: Arc<Mutex<BufferPool>>,
        file_manager: Arc<Mutex<FileManager>>,
    ) -> Self {
        Self {
            relation_name: relation_name.into(),
            file_id,
            schema,
            buffer_pool,
            file_manager,
            num_pages: 0,
            current_page_index: 0,
            current_page_tuples: Vec::new(),
            position_in_page: 0,
            pinned_page: None,
        }
    }

    fn unpin_current(&mut self) -> Result<()> {
        if let Some(page_id) = self.pinned_page.take() {
            self.buffer_pool.lock().unwrap().unpin_page(page_id, false)?;
        }
        Ok(())
    }

    fn load_page(&mut self, page_index: u32) -> Result<()> {
        let page_id = PageId::new(self.file_id, page_index);
        let idx = self.buffer_pool.lock().unwrap().get_page(page_id)?;
        let tuples = {
            let pool = self.buffer_pool.lock().unwrap();
            pool.page(idx).iter().map(|(_, b)| b.to_vec()).collect()
        };
        self.pinned_page = Some(page_id);
        self.current_page_tuples = tuples;
        self.position_in_page = 0;
        Ok(())
    }
}

impl Operator for TableScan {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open(&mut self) -> Result<()> {
        self.num_pages = self.file_manager.lock().unwrap().file(self.file_id)?.num_pages();
        self.current_page_index = 0;
        self.current_page_tuples.clear();
        self.position_in_page = 0;
        self.pinned_page = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if self.position_in_page < self.current_page_tuples.len() {
                let bytes = self.current_page_tuples[self.position_in_page].clone();
                self.position_in_page += 1;
                let values = self.schema.unpack(&bytes)?;
                return Ok(Some(Tuple::new(values)));
            }
            self.unpin_current()?;
            if self.current_page_index >= self.num_pages {
                return Ok(None);
            }
            self.load_page(self.current_page_index)?;
            self.current_page_index += 1;
        }
    }

    fn close(&mut self) -> Result<()> {
        self.unpin_current()
    }

    fn explain(&self, indent: usize) -> String {
        format!("{}TableScan({})", " ".repeat(indent), self.relation_name)
    }

    fn current_page_id(&self) -> Option<PageId> {
        self.pinned_page
    }
}
