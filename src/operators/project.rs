//! Projects a child operator's rows through an ordered list of output
//! expressions: `outputField -> expression`. Each expression is evaluated
//! against the input schema/tuple and the output schema is the expressions'
//! inferred result types, concatenated in order.

use crate::catalog::{Column, Schema};
use crate::error::Result;
use crate::expr::Expr;
use crate::operators::operator::Operator;
use crate::storage::{PageId, Tuple};

/// One output column: its name plus the expression that computes it.
#[derive(Debug, Clone)]
pub struct ProjectExpr {
    pub output_name: String,
    pub expr: Expr,
}

impl ProjectExpr {
    pub fn new(output_name: impl Into<String>, expr: Expr) -> Self {
        Self {
            output_name: output_name.into(),
            expr,
        }
    }

    /// Pass an input column through unchanged, keeping its name.
    pub fn column(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output_name: name.clone(),
            expr: Expr::column(name),
        }
    }
}

#[derive(Debug)]
pub struct Project {
    input: Box<dyn Operator>,
    input_schema: Schema,
    output_schema: Schema,
    exprs: Vec<ProjectExpr>,
}

impl Project {
    pub fn new(input: Box<dyn Operator>, exprs: Vec<ProjectExpr>) -> Result<Self> {
        let input_schema = input.schema().clone();
        let columns = exprs
            .iter()
            .map(|pe| {
                let data_type = pe.expr.result_type(&input_schema)?;
                Ok(Column::new(pe.output_name.clone(), data_type))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            input,
            input_schema,
            output_schema: Schema::new(columns),
            exprs,
        })
    }

    /// Convenience constructor for the common case of selecting/reordering
    /// a subset of input columns by name, with no other expressions.
    pub fn columns(input: Box<dyn Operator>, names: &[&str]) -> Result<Self> {
        let exprs = names.iter().map(|n| ProjectExpr::column(*n)).collect();
        Self::new(input, exprs)
    }
}

impl Operator for Project {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn open(&mut self) -> Result<()> {
        self.input.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        match self.input.next()? {
            Some(tuple) => {
                let values = self
                    .exprs
                    .iter()
                    .map(|pe| pe.expr.eval(&self.input_schema, &tuple))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(Tuple::new(values)))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn explain(&self, indent: usize) -> String {
        format!(
            "{}Project({:?})\n{}",
            " ".repeat(indent),
            self.output_schema.column_names(),
            self.input.explain(indent + 2)
        )
    }

    fn current_page_id(&self) -> Option<PageId> {
        self.input.current_page_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column as SchemaColumn, DataType};
    use crate::operators::mock::MockScan;
    use crate::value::Value;

    #[test]
    fn test_project_reorders_columns() {
        let schema = Schema::new(vec![
            SchemaColumn::new("id", DataType::Integer),
            SchemaColumn::new("name", DataType::Varchar(8)),
        ]);
        let rows = vec![Tuple::new(vec![
            Value::Integer(1),
            Value::Varchar("ada".to_string()),
        ])];
        let scan = MockScan::new(schema, rows);
        let mut project = Project::columns(Box::new(scan), &["name", "id"]).unwrap();
        project.open().unwrap();
        let tuple = project.next().unwrap().unwrap();
        assert_eq!(tuple.get(0), Some(&Value::Varchar("ada".to_string())));
        assert_eq!(tuple.get(1), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_project_computed_expression() {
        let schema = Schema::new(vec![SchemaColumn::new("id", DataType::Integer)]);
        let rows = vec![Tuple::new(vec![Value::Integer(7)])];
        let scan = MockScan::new(schema, rows);
        let exprs = vec![ProjectExpr::new(
            "is_odd",
            Expr::column("id")
                .modulo(Expr::literal(Value::Integer(2)))
                .eq(Expr::literal(Value::Integer(1))),
        )];
        let mut project = Project::new(Box::new(scan), exprs).unwrap();
        project.open().unwrap();
        let tuple = project.next().unwrap().unwrap();
        assert_eq!(tuple.get(0), Some(&Value::Boolean(true)));
    }
}
