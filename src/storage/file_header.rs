//! The on-disk file header prefixing every relation file.
//!
//! Layout, little-endian, matching the original engine byte-for-byte:
//!
//! ```text
//! u16 headerLen
//! u16 pageSize
//! u16 packedPageClassLen
//! u16 packedSchemaLen
//! bytes packedPageClass[packedPageClassLen]
//! bytes packedSchema[packedSchemaLen]
//! ```
//!
//! `packedPageClass` is a short tag identifying the page implementation
//! (always `"slotted"` in this engine); `packedSchema` is the JSON encoding
//! of the relation's `Schema`, via `serde_json`.

use crate::catalog::Schema;
use crate::error::{Error, Result};

const PAGE_CLASS_TAG: &str = "slotted";
const FIXED_FIELDS_LEN: usize = 8; // four u16 fields

#[derive(Debug, Clone)]
pub struct FileHeader {
    pub page_size: u16,
    pub schema: Schema,
}

impl FileHeader {
    pub fn new(page_size: u16, schema: Schema) -> Self {
        Self { page_size, schema }
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        let packed_schema = serde_json::to_vec(&self.schema)
            .map_err(|e| Error::Internal(format!("failed to serialize schema: {e}")))?;
        let packed_page_class = PAGE_CLASS_TAG.as_bytes();
        let header_len = FIXED_FIELDS_LEN + packed_page_class.len() + packed_schema.len();

        let mut buf = Vec::with_capacity(header_len);
        buf.extend_from_slice(&(header_len as u16).to_le_bytes());
        buf.extend_from_slice(&self.page_size.to_le_bytes());
        buf.extend_from_slice(&(packed_page_class.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(packed_schema.len() as u16).to_le_bytes());
        buf.extend_from_slice(packed_page_class);
        buf.extend_from_slice(&packed_schema);
        Ok(buf)
    }

    pub fn unpack(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < FIXED_FIELDS_LEN {
            return Err(Error::CorruptHeader("file too short for header".to_string()));
        }
        let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let page_size = u16::from_le_bytes([bytes[2], bytes[3]]);
        let page_class_len = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;
        let schema_len = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;

        if bytes.len() < header_len {
            return Err(Error::CorruptHeader(format!(
                "file header claims {} bytes but only {} are present",
                header_len,
                bytes.len()
            )));
        }
        let page_class_start = FIXED_FIELDS_LEN;
        let page_class_end = page_class_start + page_class_len;
        let schema_start = page_class_end;
        let schema_end = schema_start + schema_len;

        let page_class = std::str::from_utf8(&bytes[page_class_start..page_class_end])
            .map_err(|e| Error::CorruptHeader(format!("invalid page class tag: {e}")))?;
        if page_class != PAGE_CLASS_TAG {
            return Err(Error::CorruptHeader(format!(
                "unsupported page class '{}'",
                page_class
            )));
        }
        let schema: Schema = serde_json::from_slice(&bytes[schema_start..schema_end])
            .map_err(|e| Error::CorruptHeader(format!("invalid packed schema: {e}")))?;

        Ok((Self::new(page_size, schema), header_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};

    #[test]
    fn test_pack_unpack_round_trip() {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Varchar(32)),
        ]);
        let header = FileHeader::new(4096, schema);
        let packed = header.pack().unwrap();
        let (unpacked, consumed) = FileHeader::unpack(&packed).unwrap();
        assert_eq!(consumed, packed.len());
        assert_eq!(unpacked.page_size, 4096);
        assert_eq!(unpacked.schema.column_count(), 2);
    }

    #[test]
    fn test_unpack_rejects_truncated_buffer() {
        assert!(FileHeader::unpack(&[1, 2, 3]).is_err());
    }
}
