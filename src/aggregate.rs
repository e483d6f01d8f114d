//! Aggregate functions for `GroupBy`.
//!
//! Each aggregate is a closed `(initial, step, finalize)` triple, mirroring
//! how the original group-by operator represents its per-group
//! accumulators: `initial` seeds the accumulator before any row is seen,
//! `step` folds one more value in, `finalize` converts the accumulator into
//! the emitted output value.

use crate::catalog::{DataType, Schema};
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
}

/// One aggregate computed over the value produced by `input` for every
/// tuple in a group.
#[derive(Debug, Clone)]
pub struct AggregateExpr {
    pub kind: AggregateKind,
    pub input: Expr,
    pub alias: String,
}

impl AggregateExpr {
    pub fn new(kind: AggregateKind, input: Expr, alias: impl Into<String>) -> Self {
        Self {
            kind,
            input,
            alias: alias.into(),
        }
    }

    /// The data type of the finalized accumulator, used to type `GroupBy`'s
    /// output schema without running the aggregation.
    pub fn result_type(&self, input_schema: &Schema) -> Result<DataType> {
        match self.kind {
            AggregateKind::Count => Ok(DataType::BigInt),
            AggregateKind::Sum => Ok(DataType::Double),
            AggregateKind::Min | AggregateKind::Max => self.input.result_type(input_schema),
        }
    }

    pub fn initial(&self) -> Value {
        match self.kind {
            AggregateKind::Count => Value::BigInt(0),
            AggregateKind::Sum => Value::Null,
            AggregateKind::Min => Value::Null,
            AggregateKind::Max => Value::Null,
        }
    }

    /// Fold one more input value into the running accumulator.
    pub fn step(&self, acc: &Value, input: &Value) -> Result<Value> {
        if input.is_null() {
            return Ok(acc.clone());
        }
        match self.kind {
            AggregateKind::Count => {
                let n = acc.as_i64().ok_or_else(|| {
                    Error::Internal("COUNT accumulator was not an integer".to_string())
                })?;
                Ok(Value::BigInt(n + 1))
            }
            AggregateKind::Sum => {
                if acc.is_null() {
                    Ok(input.clone())
                } else {
                    let a = acc
                        .as_f64()
                        .ok_or_else(|| Error::EvalError("SUM over non-numeric value".to_string()))?;
                    let b = input
                        .as_f64()
                        .ok_or_else(|| Error::EvalError("SUM over non-numeric value".to_string()))?;
                    Ok(Value::Double(a + b))
                }
            }
            AggregateKind::Min => {
                if acc.is_null() || input.compare(acc) == Some(std::cmp::Ordering::Less) {
                    Ok(input.clone())
                } else {
                    Ok(acc.clone())
                }
            }
            AggregateKind::Max => {
                if acc.is_null() || input.compare(acc) == Some(std::cmp::Ordering::Greater) {
                    Ok(input.clone())
                } else {
                    Ok(acc.clone())
                }
            }
        }
    }

    /// Convert the final accumulator into the emitted value. Identity for
    /// every aggregate this engine supports, kept as a distinct step so new
    /// aggregates (e.g. AVG as sum/count) can differ.
    pub fn finalize(&self, acc: Value) -> Value {
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Schema};
    use crate::storage::Tuple;

    #[test]
    fn test_min_max_over_tuples() {
        let schema = Schema::new(vec![Column::new("salary", DataType::Double)]);
        let agg_min = AggregateExpr::new(AggregateKind::Min, Expr::column("salary"), "min_salary");
        let agg_max = AggregateExpr::new(AggregateKind::Max, Expr::column("salary"), "max_salary");

        let rows = [50_000.0, 75_000.0, 30_000.0];
        let mut min_acc = agg_min.initial();
        let mut max_acc = agg_max.initial();
        for &salary in &rows {
            let tuple = Tuple::new(vec![Value::Double(salary)]);
            let v = agg_min.input.eval(&schema, &tuple).unwrap();
            min_acc = agg_min.step(&min_acc, &v).unwrap();
            max_acc = agg_max.step(&max_acc, &v).unwrap();
        }
        assert_eq!(agg_min.finalize(min_acc), Value::Double(30_000.0));
        assert_eq!(agg_max.finalize(max_acc), Value::Double(75_000.0));
    }

    #[test]
    fn test_count_ignores_nulls() {
        let agg = AggregateExpr::new(AggregateKind::Count, Expr::column("x"), "n");
        let mut acc = agg.initial();
        acc = agg.step(&acc, &Value::Integer(1)).unwrap();
        acc = agg.step(&acc, &Value::Null).unwrap();
        acc = agg.step(&acc, &Value::Integer(2)).unwrap();
        assert_eq!(acc, Value::BigInt(2));
    }
}
