//! Concatenates two operators with identical schemas, left then right.
//!
//! `UnionAll` is purely pipelined: it pulls from the left child until
//! exhausted, then the right. Plain `Union` additionally suppresses
//! duplicates, which forces it to materialize everything it has emitted so
//! far in memory.

use std::collections::HashSet;

use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::operators::operator::Operator;
use crate::storage::{PageId, Tuple};
use crate::value::Value;

fn check_compatible(left: &Schema, right: &Schema) -> Result<()> {
    if left.column_count() != right.column_count() {
        return Err(Error::SchemaMismatch {
            expected: left.column_count(),
            actual: right.column_count(),
        });
    }
    for (l, r) in left.columns().iter().zip(right.columns()) {
        if !l.data_type.is_comparable_with(&r.data_type) {
            return Err(Error::PlanInvalid(format!(
                "union arms disagree on column '{}': {} vs {}",
                l.name, l.data_type, r.data_type
            )));
        }
    }
    Ok(())
}

/// Hashable key for duplicate suppression in `Union`. Values don't
/// implement `Eq`/`Hash` transitively through floats' NaN quirks beyond
/// what `Value` already provides, which is sufficient here.
fn row_key(values: &[Value]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[derive(Debug)]
pub struct UnionAll {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    schema: Schema,
    left_exhausted: bool,
}

impl UnionAll {
    pub fn new(left: Box<dyn Operator>, right: Box<dyn Operator>) -> Result<Self> {
        check_compatible(left.schema(), right.schema())?;
        let schema = left.schema().clone();
        Ok(Self {
            left,
            right,
            schema,
            left_exhausted: false,
        })
    }
}

impl Operator for UnionAll {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open(&mut self) -> Result<()> {
        self.left_exhausted = false;
        self.left.open()?;
        self.right.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.left_exhausted {
            if let Some(tuple) = self.left.next()? {
                return Ok(Some(tuple));
            }
            self.left_exhausted = true;
        }
        self.right.next()
    }

    fn close(&mut self) -> Result<()> {
        self.left.close()?;
        self.right.close()
    }

    fn explain(&self, indent: usize) -> String {
        format!(
            "{}UnionAll\n{}\n{}",
            " ".repeat(indent),
            self.left.explain(indent + 2),
            self.right.explain(indent + 2)
        )
    }

    fn current_page_id(&self) -> Option<PageId> {
        if self.left_exhausted {
            self.right.current_page_id()
        } else {
            self.left.current_page_id()
        }
    }
}

#[derive(Debug)]
pub struct Union {
    inner: UnionAll,
    seen: HashSet<Vec<String>>,
}

impl Union {
    pub fn new(left: Box<dyn Operator>, right: Box<dyn Operator>) -> Result<Self> {
        Ok(Self {
            inner: UnionAll::new(left, right)?,
            seen: HashSet::new(),
        })
    }
}

impl Operator for Union {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn open(&mut self) -> Result<()> {
        self.seen.clear();
        self.inner.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.inner.next()? {
            let key = row_key(tuple.values());
            if self.seen.insert(key) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn explain(&self, indent: usize) -> String {
        format!("{}Union\n{}", " ".repeat(indent), {
            let inner = self.inner.explain(indent + 2);
            inner.splitn(2, '\n').nth(1).unwrap_or("").to_string()
        })
    }

    fn current_page_id(&self) -> Option<PageId> {
        self.inner.current_page_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::operators::mock::MockScan;

    fn schema() -> Schema {
        Schema::new(vec![Column::new("id", DataType::Integer)])
    }

    #[test]
    fn test_union_all_preserves_left_before_right_order_and_duplicates() {
        let left = MockScan::new(schema(), vec![Tuple::new(vec![Value::Integer(1)])]);
        let right = MockScan::new(
            schema(),
            vec![
                Tuple::new(vec![Value::Integer(1)]),
                Tuple::new(vec![Value::Integer(2)]),
            ],
        );
        let mut union_all = UnionAll::new(Box::new(left), Box::new(right)).unwrap();
        union_all.open().unwrap();
        let mut out = Vec::new();
        while let Some(t) = union_all.next().unwrap() {
            out.push(t.get(0).unwrap().clone());
        }
        assert_eq!(out, vec![Value::Integer(1), Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn test_union_suppresses_duplicates() {
        let left = MockScan::new(schema(), vec![Tuple::new(vec![Value::Integer(1)])]);
        let right = MockScan::new(
            schema(),
            vec![
                Tuple::new(vec![Value::Integer(1)]),
                Tuple::new(vec![Value::Integer(2)]),
            ],
        );
        let mut union = Union::new(Box::new(left), Box::new(right)).unwrap();
        union.open().unwrap();
        let mut out = Vec::new();
        while let Some(t) = union.next().unwrap() {
            out.push(t.get(0).unwrap().clone());
        }
        assert_eq!(out, vec![Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn test_incompatible_schemas_rejected() {
        let left = MockScan::new(schema(), vec![]);
        let right_schema = Schema::new(vec![Column::new("id", DataType::Varchar(4))]);
        let right = MockScan::new(right_schema, vec![]);
        assert!(UnionAll::new(Box::new(left), Box::new(right)).is_err());
    }
}
