//! Catalog of on-disk relations: maps relation names to their backing
//! `StorageFile`s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::storage::file::StorageFile;
use crate::storage::ids::FileId;

/// Owns every relation's `StorageFile` and hands out `FileId`s.
#[derive(Debug)]
pub struct FileManager {
    base_dir: PathBuf,
    page_size: u16,
    next_file_id: u32,
    files: HashMap<FileId, StorageFile>,
    names: HashMap<String, FileId>,
}

impl FileManager {
    pub fn new(base_dir: impl Into<PathBuf>, page_size: u16) -> Self {
        Self {
            base_dir: base_dir.into(),
            page_size,
            next_file_id: 0,
            files: HashMap::new(),
            names: HashMap::new(),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.tbl"))
    }

    pub fn create_relation(&mut self, name: &str, schema: Schema) -> Result<FileId> {
        if self.names.contains_key(name) {
            return Err(Error::RelationAlreadyExists(name.to_string()));
        }
        let file_id = FileId(self.next_file_id);
        self.next_file_id += 1;
        let path = self.path_for(name);
        let file = StorageFile::create(file_id, &path, self.page_size, schema)?;
        self.files.insert(file_id, file);
        self.names.insert(name.to_string(), file_id);
        info!(relation = name, file_id = file_id.0, "created relation");
        Ok(file_id)
    }

    /// Attach an already-existing relation file on disk under `name`.
    pub fn open_relation(&mut self, name: &str) -> Result<FileId> {
        if self.names.contains_key(name) {
            return Err(Error::RelationAlreadyExists(name.to_string()));
        }
        let file_id = FileId(self.next_file_id);
        self.next_file_id += 1;
        let path = self.path_for(name);
        let file = StorageFile::open(file_id, &path)?;
        self.files.insert(file_id, file);
        self.names.insert(name.to_string(), file_id);
        Ok(file_id)
    }

    pub fn remove_relation(&mut self, name: &str) -> Result<()> {
        let file_id = self
            .names
            .remove(name)
            .ok_or_else(|| Error::RelationNotFound(name.to_string()))?;
        self.files.remove(&file_id);
        let path = self.path_for(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        info!(relation = name, "removed relation");
        Ok(())
    }

    pub fn relation_file_id(&self, name: &str) -> Result<FileId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::RelationNotFound(name.to_string()))
    }

    pub fn relation_schema(&self, name: &str) -> Result<&Schema> {
        let file_id = self.relation_file_id(name)?;
        Ok(self.files[&file_id].schema())
    }

    pub fn file(&self, file_id: FileId) -> Result<&StorageFile> {
        self.files
            .get(&file_id)
            .ok_or_else(|| Error::Internal(format!("no open file for {file_id}")))
    }

    pub fn file_mut(&mut self, file_id: FileId) -> Result<&mut StorageFile> {
        self.files
            .get_mut(&file_id)
            .ok_or_else(|| Error::Internal(format!("no open file for {file_id}")))
    }

    pub fn relation_names(&self) -> Vec<&str> {
        self.names.keys().map(|s| s.as_str()).collect()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
