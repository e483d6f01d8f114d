//! Schema and data-type definitions shared across the storage and
//! execution layers.

pub mod schema;
pub mod types;

pub use schema::{Column, Schema};
pub use types::DataType;
