//! An in-memory stand-in for `TableScan`, used by operator unit tests so
//! they don't need a buffer pool or on-disk file.

use crate::catalog::Schema;
use crate::error::Result;
use crate::operators::operator::Operator;
use crate::storage::Tuple;

#[derive(Debug)]
pub struct MockScan {
    schema: Schema,
    rows: Vec<Tuple>,
    position: usize,
}

impl MockScan {
    pub fn new(schema: Schema, rows: Vec<Tuple>) -> Self {
        Self {
            schema,
            rows,
            position: 0,
        }
    }
}

impl Operator for MockScan {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.position < self.rows.len() {
            let tuple = self.rows[self.position].clone();
            self.position += 1;
            Ok(Some(tuple))
        } else {
            Ok(None)
        }
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn explain(&self, indent: usize) -> String {
        format!("{}MockScan", " ".repeat(indent))
    }
}
