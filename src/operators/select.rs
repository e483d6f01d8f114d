//! Filters rows from a child operator by a predicate.

use crate::catalog::Schema;
use crate::error::Result;
use crate::expr::Expr;
use crate::operators::operator::Operator;
use crate::storage::{PageId, Tuple};

#[derive(Debug)]
pub struct Select {
    input: Box<dyn Operator>,
    predicate: Expr,
}

impl Select {
    pub fn new(input: Box<dyn Operator>, predicate: Expr) -> Self {
        Self { input, predicate }
    }
}

impl Operator for Select {
    fn schema(&self) -> &Schema {
        self.input.schema()
    }

    fn open(&mut self) -> Result<()> {
        self.input.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.input.next()? {
            if self.predicate.eval_predicate(self.input.schema(), &tuple)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn explain(&self, indent: usize) -> String {
        format!(
            "{}Select\n{}",
            " ".repeat(indent),
            self.input.explain(indent + 2)
        )
    }

    fn current_page_id(&self) -> Option<PageId> {
        self.input.current_page_id()
    }
}
