//! Predicate and projection expressions.
//!
//! Expressions are evaluated against a `(Schema, Tuple)` pair. `decompose_cnf`
//! splits a conjunction into its top-level conjuncts so the optimizer can
//! push each one independently through a join tree; `attributes` reports
//! which columns an expression touches, which is what decides how far down
//! a pushdown can go.

use std::collections::HashSet;

use crate::catalog::{DataType, Schema};
use crate::error::{Error, Result};
use crate::storage::Tuple;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn apply(self, ordering: Option<std::cmp::Ordering>) -> bool {
        use std::cmp::Ordering::*;
        match (self, ordering) {
            (CompareOp::Eq, Some(Equal)) => true,
            (CompareOp::Ne, Some(o)) => o != Equal,
            (CompareOp::Lt, Some(Less)) => true,
            (CompareOp::Le, Some(Less)) | (CompareOp::Le, Some(Equal)) => true,
            (CompareOp::Gt, Some(Greater)) => true,
            (CompareOp::Ge, Some(Greater)) | (CompareOp::Ge, Some(Equal)) => true,
            _ => false,
        }
    }
}

impl ArithOp {
    fn apply_int(self, a: i64, b: i64) -> Result<i64> {
        match self {
            ArithOp::Add => Ok(a + b),
            ArithOp::Sub => Ok(a - b),
            ArithOp::Mul => Ok(a * b),
            ArithOp::Div => {
                if b == 0 {
                    Err(Error::EvalError("division by zero".to_string()))
                } else {
                    Ok(a / b)
                }
            }
            ArithOp::Mod => {
                if b == 0 {
                    Err(Error::EvalError("modulo by zero".to_string()))
                } else {
                    Ok(a % b)
                }
            }
        }
    }

    fn apply_float(self, a: f64, b: f64) -> Result<f64> {
        match self {
            ArithOp::Add => Ok(a + b),
            ArithOp::Sub => Ok(a - b),
            ArithOp::Mul => Ok(a * b),
            ArithOp::Div => {
                if b == 0.0 {
                    Err(Error::EvalError("division by zero".to_string()))
                } else {
                    Ok(a / b)
                }
            }
            ArithOp::Mod => {
                if b == 0.0 {
                    Err(Error::EvalError("modulo by zero".to_string()))
                } else {
                    Ok(a % b)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// A predicate or value-producing expression over a single tuple.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    Arith(Box<Expr>, ArithOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn literal(value: Value) -> Self {
        Expr::Literal(value)
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::Compare(Box::new(self), CompareOp::Eq, Box::new(other))
    }

    pub fn ne(self, other: Expr) -> Self {
        Expr::Compare(Box::new(self), CompareOp::Ne, Box::new(other))
    }

    pub fn lt(self, other: Expr) -> Self {
        Expr::Compare(Box::new(self), CompareOp::Lt, Box::new(other))
    }

    pub fn le(self, other: Expr) -> Self {
        Expr::Compare(Box::new(self), CompareOp::Le, Box::new(other))
    }

    pub fn gt(self, other: Expr) -> Self {
        Expr::Compare(Box::new(self), CompareOp::Gt, Box::new(other))
    }

    pub fn ge(self, other: Expr) -> Self {
        Expr::Compare(Box::new(self), CompareOp::Ge, Box::new(other))
    }

    pub fn modulo(self, other: Expr) -> Self {
        Expr::Arith(Box::new(self), ArithOp::Mod, Box::new(other))
    }

    pub fn add(self, other: Expr) -> Self {
        Expr::Arith(Box::new(self), ArithOp::Add, Box::new(other))
    }

    pub fn sub(self, other: Expr) -> Self {
        Expr::Arith(Box::new(self), ArithOp::Sub, Box::new(other))
    }

    pub fn mul(self, other: Expr) -> Self {
        Expr::Arith(Box::new(self), ArithOp::Mul, Box::new(other))
    }

    pub fn div(self, other: Expr) -> Self {
        Expr::Arith(Box::new(self), ArithOp::Div, Box::new(other))
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// Evaluate this expression to a `Value` against one tuple.
    pub fn eval(&self, schema: &Schema, tuple: &Tuple) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => {
                let idx = schema.column_index(name)?;
                tuple
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| Error::ColumnNotFound(name.clone()))
            }
            Expr::Compare(lhs, op, rhs) => {
                let l = lhs.eval(schema, tuple)?;
                let r = rhs.eval(schema, tuple)?;
                Ok(Value::Boolean(op.apply(l.compare(&r))))
            }
            Expr::Arith(lhs, op, rhs) => {
                let l = lhs.eval(schema, tuple)?;
                let r = rhs.eval(schema, tuple)?;
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null);
                }
                let uses_float = matches!(l, Value::Float(_) | Value::Double(_))
                    || matches!(r, Value::Float(_) | Value::Double(_));
                if !uses_float {
                    let (a, b) = (
                        l.as_i64().ok_or_else(|| Error::EvalError("arithmetic over non-numeric value".to_string()))?,
                        r.as_i64().ok_or_else(|| Error::EvalError("arithmetic over non-numeric value".to_string()))?,
                    );
                    return Ok(Value::BigInt(op.apply_int(a, b)?));
                }
                let (a, b) = (
                    l.as_f64().ok_or_else(|| Error::EvalError("arithmetic over non-numeric value".to_string()))?,
                    r.as_f64().ok_or_else(|| Error::EvalError("arithmetic over non-numeric value".to_string()))?,
                );
                Ok(Value::Double(op.apply_float(a, b)?))
            }
            Expr::And(lhs, rhs) => {
                let l = self.eval_bool(lhs, schema, tuple)?;
                let r = self.eval_bool(rhs, schema, tuple)?;
                Ok(Value::Boolean(l && r))
            }
            Expr::Or(lhs, rhs) => {
                let l = self.eval_bool(lhs, schema, tuple)?;
                let r = self.eval_bool(rhs, schema, tuple)?;
                Ok(Value::Boolean(l || r))
            }
            Expr::Not(inner) => {
                let v = self.eval_bool(inner, schema, tuple)?;
                Ok(Value::Boolean(!v))
            }
        }
    }

    fn eval_bool(&self, expr: &Expr, schema: &Schema, tuple: &Tuple) -> Result<bool> {
        expr.eval(schema, tuple)?
            .as_bool()
            .ok_or_else(|| Error::EvalError("expected boolean expression".to_string()))
    }

    /// Evaluate this expression as a predicate, treating NULL as false.
    pub fn eval_predicate(&self, schema: &Schema, tuple: &Tuple) -> Result<bool> {
        match self.eval(schema, tuple)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(Error::EvalError(format!(
                "expected a boolean predicate, got {}",
                other.type_name()
            ))),
        }
    }

    /// Every column name referenced anywhere within this expression.
    pub fn attributes(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes(&self, out: &mut HashSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(name) => {
                out.insert(name.clone());
            }
            Expr::Compare(l, _, r) | Expr::Arith(l, _, r) => {
                l.collect_attributes(out);
                r.collect_attributes(out);
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_attributes(out);
                r.collect_attributes(out);
            }
            Expr::Not(inner) => inner.collect_attributes(out),
        }
    }

    /// Split a top-level conjunction into its conjuncts. A non-`And`
    /// expression decomposes to itself.
    pub fn decompose_cnf(&self) -> Vec<Expr> {
        match self {
            Expr::And(l, r) => {
                let mut parts = l.decompose_cnf();
                parts.extend(r.decompose_cnf());
                parts
            }
            other => vec![other.clone()],
        }
    }

    /// Recombine conjuncts into a single expression, `Literal(Boolean(true))`
    /// if `exprs` is empty.
    pub fn conjoin(exprs: Vec<Expr>) -> Expr {
        let mut iter = exprs.into_iter();
        let Some(first) = iter.next() else {
            return Expr::Literal(Value::Boolean(true));
        };
        iter.fold(first, |acc, e| acc.and(e))
    }

    /// The data type this expression would produce when evaluated against
    /// tuples of `schema`, used by `Project`/`GroupBy` to type their output
    /// columns without evaluating a tuple.
    pub fn result_type(&self, schema: &Schema) -> Result<DataType> {
        match self {
            Expr::Literal(v) => v
                .data_type()
                .ok_or_else(|| Error::EvalError("cannot infer a type for a NULL literal".to_string())),
            Expr::Column(name) => Ok(schema.column(name)?.data_type),
            Expr::Compare(..) | Expr::And(..) | Expr::Or(..) | Expr::Not(..) => Ok(DataType::Boolean),
            Expr::Arith(l, _, r) => {
                let lt = l.result_type(schema)?;
                let rt = r.result_type(schema)?;
                let is_float = matches!(lt, DataType::Float | DataType::Double)
                    || matches!(rt, DataType::Float | DataType::Double);
                if is_float {
                    Ok(DataType::Double)
                } else {
                    Ok(DataType::BigInt)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("age", DataType::Integer),
        ])
    }

    #[test]
    fn test_compare_and_conjunction() {
        let schema = schema();
        let tuple = Tuple::new(vec![Value::Integer(1), Value::Integer(30)]);
        let pred = Expr::column("id")
            .eq(Expr::literal(Value::Integer(1)))
            .and(Expr::column("age").lt(Expr::literal(Value::Integer(40))));
        assert!(pred.eval_predicate(&schema, &tuple).unwrap());
    }

    #[test]
    fn test_decompose_cnf_splits_top_level_and() {
        let a = Expr::column("id").eq(Expr::literal(Value::Integer(1)));
        let b = Expr::column("age").lt(Expr::literal(Value::Integer(40)));
        let conjunction = a.clone().and(b.clone());
        let parts = conjunction.decompose_cnf();
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_attributes() {
        let pred = Expr::column("id")
            .eq(Expr::literal(Value::Integer(1)))
            .and(Expr::column("age").lt(Expr::literal(Value::Integer(40))));
        let attrs = pred.attributes();
        assert!(attrs.contains("id"));
        assert!(attrs.contains("age"));
    }

    #[test]
    fn test_null_predicate_is_false() {
        let schema = schema();
        let tuple = Tuple::new(vec![Value::Null, Value::Integer(30)]);
        let pred = Expr::column("id").eq(Expr::literal(Value::Integer(1)));
        assert!(!pred.eval_predicate(&schema, &tuple).unwrap());
    }

    #[test]
    fn test_modulo_grouping_key() {
        let schema = schema();
        let tuple = Tuple::new(vec![Value::Integer(7), Value::Integer(30)]);
        let key_expr = Expr::column("id").modulo(Expr::literal(Value::Integer(2)));
        let key = key_expr.eval(&schema, &tuple).unwrap();
        assert_eq!(key, Value::BigInt(1));
        assert_eq!(key_expr.result_type(&schema).unwrap(), DataType::BigInt);
    }

    #[test]
    fn test_division_by_zero_errors() {
        let schema = schema();
        let tuple = Tuple::new(vec![Value::Integer(7), Value::Integer(0)]);
        let expr = Expr::column("id").div(Expr::column("age"));
        assert!(expr.eval(&schema, &tuple).is_err());
    }
}
