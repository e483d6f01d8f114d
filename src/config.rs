//! Engine-wide configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tunable parameters for a `Database` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size, in bytes, of every page in every relation file.
    pub page_size: u16,
    /// Number of frames in the buffer pool.
    pub pool_size: usize,
    /// Directory holding relation files.
    pub base_dir: PathBuf,
}

impl EngineConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            page_size: 4096,
            pool_size: 16,
            base_dir: base_dir.into(),
        }
    }

    pub fn with_page_size(mut self, page_size: u16) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}
