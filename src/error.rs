//! Error types for the storage and query engine.
//!
//! This module defines all error types used throughout the engine, grouped
//! by the taxonomy of kinds the core distinguishes.

use thiserror::Error;

/// The main error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    // ========== Schema Errors ==========
    #[error("schema mismatch: expected tuple of {expected} bytes, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    #[error("column '{0}' not found in schema")]
    ColumnNotFound(String),

    #[error("value too large for column '{0}'")]
    ValueTooLarge(String),

    // ========== Storage Errors ==========
    #[error("invalid page id: page {page_index} out of range for file {file_id} ({num_pages} pages)")]
    InvalidPageId {
        file_id: u32,
        page_index: u32,
        num_pages: u32,
    },

    #[error("page {0} is full")]
    PageFull(u32),

    #[error("buffer pool exhausted: every frame is pinned")]
    PoolExhausted,

    #[error("corrupt file header: {0}")]
    CorruptHeader(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    // ========== Catalog Errors ==========
    #[error("relation '{0}' not found")]
    RelationNotFound(String),

    #[error("relation '{0}' already exists")]
    RelationAlreadyExists(String),

    // ========== Plan / Execution Errors ==========
    #[error("invalid plan: {0}")]
    PlanInvalid(String),

    #[error("evaluation error: {0}")]
    EvalError(String),

    // ========== Internal Errors ==========
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RelationNotFound("employee".to_string());
        assert_eq!(err.to_string(), "relation 'employee' not found");

        let err = Error::PageFull(3);
        assert_eq!(err.to_string(), "page 3 is full");
    }
}
