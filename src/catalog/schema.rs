//! Table schemas: ordered column lists with a fixed packed tuple size.
//!
//! A `Schema` is the contract the storage layer relies on: every tuple
//! belonging to a relation packs to exactly `Schema::packed_size()` bytes,
//! which lets `SlottedPage` size its payload area from the schema alone.

use crate::catalog::types::DataType;
use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Column definition in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// Packed width of one field: one null-flag byte plus the type's payload.
    fn packed_width(&self) -> usize {
        1 + self.data_type.size()
    }
}

/// An ordered list of columns with O(1) name lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
    #[serde(skip)]
    name_to_index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        let name_to_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            columns,
            name_to_index,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        let idx = self.column_index(name)?;
        Ok(&self.columns[idx])
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Total packed size of one tuple conforming to this schema, in bytes.
    /// Constant for the lifetime of the schema — this is what `SlottedPage`
    /// uses to size its payload area.
    pub fn packed_size(&self) -> usize {
        self.columns.iter().map(Column::packed_width).sum()
    }

    /// Build a new schema containing only the named columns, in the given
    /// order (used for Project pushdown).
    pub fn project(&self, names: &[&str]) -> Result<Schema> {
        let columns = names
            .iter()
            .map(|n| self.column(n).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(columns))
    }

    /// Concatenate two schemas, used to build a join's output schema.
    /// Errors if the two schemas share a column name.
    pub fn concat(&self, other: &Schema) -> Result<Schema> {
        for c in &self.columns {
            if other.has_column(&c.name) {
                return Err(Error::PlanInvalid(format!(
                    "duplicate column '{}' when concatenating schemas",
                    c.name
                )));
            }
        }
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Ok(Schema::new(columns))
    }

    /// Encode a tuple's values into this schema's fixed-width packed form.
    pub fn pack(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(Error::SchemaMismatch {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        let mut buf = Vec::with_capacity(self.packed_size());
        for (col, value) in self.columns.iter().zip(values) {
            pack_field(&col.data_type, value, &mut buf)?;
        }
        Ok(buf)
    }

    /// Decode a schema-sized byte buffer back into typed values.
    pub fn unpack(&self, bytes: &[u8]) -> Result<Vec<Value>> {
        if bytes.len() != self.packed_size() {
            return Err(Error::SchemaMismatch {
                expected: self.packed_size(),
                actual: bytes.len(),
            });
        }
        let mut values = Vec::with_capacity(self.columns.len());
        let mut offset = 0;
        for col in &self.columns {
            let width = col.packed_width();
            let field = &bytes[offset..offset + width];
            values.push(unpack_field(&col.data_type, field));
            offset += width;
        }
        Ok(values)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::empty()
    }
}

fn pack_field(data_type: &DataType, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    if value.is_null() {
        out.push(0);
        out.resize(out.len() + data_type.size(), 0);
        return Ok(());
    }
    out.push(1);
    let start = out.len();
    out.resize(start + data_type.size(), 0);
    let payload = &mut out[start..];
    match (data_type, value) {
        (DataType::Boolean, Value::Boolean(b)) => payload[0] = *b as u8,
        (DataType::SmallInt, Value::SmallInt(v)) => payload.copy_from_slice(&v.to_le_bytes()),
        (DataType::Integer, Value::Integer(v)) => payload.copy_from_slice(&v.to_le_bytes()),
        (DataType::BigInt, Value::BigInt(v)) => payload.copy_from_slice(&v.to_le_bytes()),
        (DataType::Float, Value::Float(v)) => payload.copy_from_slice(&v.to_le_bytes()),
        (DataType::Double, Value::Double(v)) => payload.copy_from_slice(&v.to_le_bytes()),
        (DataType::Date, Value::Date(v)) => payload.copy_from_slice(&v.to_le_bytes()),
        (DataType::Timestamp, Value::Timestamp(v)) => payload.copy_from_slice(&v.to_le_bytes()),
        (DataType::Char(n), Value::Varchar(s)) | (DataType::Varchar(n), Value::Varchar(s)) => {
            let bytes = s.as_bytes();
            if bytes.len() > *n {
                return Err(Error::ValueTooLarge(s.clone()));
            }
            payload[..bytes.len()].copy_from_slice(bytes);
        }
        _ => {
            return Err(Error::EvalError(format!(
                "cannot pack value of type {} into column of type {}",
                value.type_name(),
                data_type
            )))
        }
    }
    Ok(())
}

fn unpack_field(data_type: &DataType, field: &[u8]) -> Value {
    let null_flag = field[0];
    let payload = &field[1..];
    if null_flag == 0 {
        return Value::Null;
    }
    match data_type {
        DataType::Boolean => Value::Boolean(payload[0] != 0),
        DataType::SmallInt => Value::SmallInt(i16::from_le_bytes(payload.try_into().unwrap())),
        DataType::Integer => Value::Integer(i32::from_le_bytes(payload.try_into().unwrap())),
        DataType::BigInt => Value::BigInt(i64::from_le_bytes(payload.try_into().unwrap())),
        DataType::Float => Value::Float(f32::from_le_bytes(payload.try_into().unwrap())),
        DataType::Double => Value::Double(f64::from_le_bytes(payload.try_into().unwrap())),
        DataType::Date => Value::Date(i32::from_le_bytes(payload.try_into().unwrap())),
        DataType::Timestamp => Value::Timestamp(i64::from_le_bytes(payload.try_into().unwrap())),
        DataType::Char(_) | DataType::Varchar(_) => {
            let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
            Value::Varchar(String::from_utf8_lossy(&payload[..end]).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Varchar(16)),
            Column::new("salary", DataType::Double),
        ])
    }

    #[test]
    fn test_packed_size_is_constant() {
        let schema = employee_schema();
        assert_eq!(schema.packed_size(), (1 + 4) + (1 + 16) + (1 + 8));
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let schema = employee_schema();
        let values = vec![
            Value::Integer(7),
            Value::Varchar("ada".to_string()),
            Value::Double(95000.0),
        ];
        let packed = schema.pack(&values).unwrap();
        assert_eq!(packed.len(), schema.packed_size());
        let unpacked = schema.unpack(&packed).unwrap();
        assert_eq!(unpacked, values);
    }

    #[test]
    fn test_pack_with_null() {
        let schema = employee_schema();
        let values = vec![Value::Integer(1), Value::Null, Value::Double(1.0)];
        let packed = schema.pack(&values).unwrap();
        let unpacked = schema.unpack(&packed).unwrap();
        assert!(unpacked[1].is_null());
    }

    #[test]
    fn test_pack_string_too_large_errors() {
        let schema = employee_schema();
        let values = vec![
            Value::Integer(1),
            Value::Varchar("a much too long name for this column".to_string()),
            Value::Double(1.0),
        ];
        assert!(matches!(
            schema.pack(&values),
            Err(Error::ValueTooLarge(_))
        ));
    }

    #[test]
    fn test_project() {
        let schema = employee_schema();
        let projected = schema.project(&["name", "id"]).unwrap();
        assert_eq!(projected.column_names(), vec!["name", "id"]);
    }

    #[test]
    fn test_concat_rejects_duplicate_columns() {
        let a = employee_schema();
        let b = employee_schema();
        assert!(a.concat(&b).is_err());
    }
}
