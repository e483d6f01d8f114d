//! Logical query plans.
//!
//! A `Plan` mirrors the operator tree one-to-one except it names base
//! relations and carries expressions rather than open file handles, which is
//! what lets the optimizer rewrite it freely (pushdown, join reordering)
//! before a single page is touched. `prepare` is the one place a `Plan`
//! turns into a runnable `Operator` tree.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::aggregate::AggregateExpr;
use crate::catalog::{Column, Schema};
use crate::database::Database;
use crate::error::Result;
use crate::expr::{CompareOp, Expr};
use crate::operators::groupby::group_key_name;
use crate::operators::{GroupBy, Join, JoinAlgorithm, Operator, Project, ProjectExpr, Select, Union, UnionAll};
use crate::storage::{BufferPool, FileManager};

#[derive(Debug, Clone)]
pub enum Plan {
    Scan(String),
    Select(Box<Plan>, Expr),
    Project(Box<Plan>, Vec<ProjectExpr>),
    Union {
        left: Box<Plan>,
        right: Box<Plan>,
        all: bool,
    },
    Join {
        left: Box<Plan>,
        right: Box<Plan>,
        predicate: Expr,
        algorithm: JoinAlgorithm,
    },
    GroupBy {
        input: Box<Plan>,
        keys: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
    },
}

impl Plan {
    pub fn scan(relation_name: impl Into<String>) -> Self {
        Plan::Scan(relation_name.into())
    }

    pub fn select(self, predicate: Expr) -> Self {
        Plan::Select(Box::new(self), predicate)
    }

    pub fn project(self, exprs: Vec<ProjectExpr>) -> Self {
        Plan::Project(Box::new(self), exprs)
    }

    pub fn project_columns(self, names: &[&str]) -> Self {
        let exprs = names.iter().map(|n| ProjectExpr::column(*n)).collect();
        Plan::Project(Box::new(self), exprs)
    }

    pub fn join(self, right: Plan, predicate: Expr, algorithm: JoinAlgorithm) -> Self {
        Plan::Join {
            left: Box::new(self),
            right: Box::new(right),
            predicate,
            algorithm,
        }
    }

    pub fn union_all(self, right: Plan) -> Self {
        Plan::Union {
            left: Box::new(self),
            right: Box::new(right),
            all: true,
        }
    }

    pub fn union(self, right: Plan) -> Self {
        Plan::Union {
            left: Box::new(self),
            right: Box::new(right),
            all: false,
        }
    }

    pub fn group_by(self, keys: Vec<Expr>, aggregates: Vec<AggregateExpr>) -> Self {
        Plan::GroupBy {
            input: Box::new(self),
            keys,
            aggregates,
        }
    }

    /// The schema this plan node would yield if executed, computed purely
    /// from catalog metadata (no relation is scanned).
    pub fn schema(&self, file_manager: &FileManager) -> Result<Schema> {
        match self {
            Plan::Scan(name) => file_manager.relation_schema(name).map(|s| s.clone()),
            Plan::Select(input, _) => input.schema(file_manager),
            Plan::Project(input, exprs) => {
                let input_schema = input.schema(file_manager)?;
                let columns = exprs
                    .iter()
                    .map(|pe| {
                        let data_type = pe.expr.result_type(&input_schema)?;
                        Ok(Column::new(pe.output_name.clone(), data_type))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Schema::new(columns))
            }
            Plan::Union { left, .. } => left.schema(file_manager),
            Plan::Join { left, right, .. } => {
                left.schema(file_manager)?.concat(&right.schema(file_manager)?)
            }
            Plan::GroupBy {
                input,
                keys,
                aggregates,
            } => {
                let input_schema = input.schema(file_manager)?;
                let mut columns = Vec::with_capacity(keys.len() + aggregates.len());
                for (i, key) in keys.iter().enumerate() {
                    columns.push(Column::new(group_key_name(key, i), key.result_type(&input_schema)?));
                }
                for agg in aggregates {
                    columns.push(Column::new(agg.alias.clone(), agg.result_type(&input_schema)?));
                }
                Ok(Schema::new(columns))
            }
        }
    }

    /// The set of column names this plan node produces.
    pub fn attributes(&self, file_manager: &FileManager) -> Result<HashSet<String>> {
        Ok(self
            .schema(file_manager)?
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect())
    }

    /// Whether this subtree is a single base relation, possibly wrapped in
    /// `Select`/`Project` nodes that carry no join of their own. The DP
    /// join-order search collects subtrees like this as its leaves.
    pub fn is_table_like(&self) -> bool {
        match self {
            Plan::Scan(_) => true,
            Plan::Select(input, _) => input.is_table_like(),
            Plan::Project(input, _) => input.is_table_like(),
            _ => false,
        }
    }

    pub fn base_relation_name(&self) -> Option<&str> {
        match self {
            Plan::Scan(name) => Some(name),
            Plan::Select(input, _) => input.base_relation_name(),
            Plan::Project(input, _) => input.base_relation_name(),
            _ => None,
        }
    }

    /// Rough estimated output cardinality, used by the optimizer to order
    /// joins and size block-nested-loops blocks. Base relation cardinalities
    /// come from the catalog; everything above them is a standard heuristic
    /// (10% selectivity for an equality, 33% for a range, product of
    /// children for conjunctions) rather than column histograms, which this
    /// engine does not maintain.
    pub fn estimate_cardinality(&self, db: &Database) -> Result<f64> {
        match self {
            Plan::Scan(name) => Ok(db.relation_cardinality(name)? as f64),
            Plan::Select(input, predicate) => {
                Ok(input.estimate_cardinality(db)? * selectivity(predicate))
            }
            Plan::Project(input, _) => input.estimate_cardinality(db),
            Plan::Union { left, right, all } => {
                let sum = left.estimate_cardinality(db)? + right.estimate_cardinality(db)?;
                if *all {
                    Ok(sum)
                } else {
                    Ok(sum * 0.9)
                }
            }
            Plan::Join {
                left,
                right,
                predicate,
                ..
            } => {
                let l = left.estimate_cardinality(db)?;
                let r = right.estimate_cardinality(db)?;
                Ok(l * r * selectivity(predicate))
            }
            Plan::GroupBy { input, keys, .. } => {
                if keys.is_empty() {
                    Ok(1.0)
                } else {
                    Ok(input.estimate_cardinality(db)?.sqrt().max(1.0))
                }
            }
        }
    }

    /// Estimated cost in page I/Os for executing this plan as-is, used to
    /// compare candidate join algorithms/orders at the same position in the
    /// DP lattice.
    pub fn cost(&self, db: &Database) -> Result<f64> {
        match self {
            Plan::Scan(name) => Ok(db.relation_page_count(name)? as f64),
            Plan::Select(input, _) => input.cost(db),
            Plan::Project(input, _) => input.cost(db),
            Plan::Union { left, right, .. } => Ok(left.cost(db)? + right.cost(db)?),
            Plan::Join {
                left,
                right,
                algorithm,
                ..
            } => {
                let left_cost = left.cost(db)?;
                let right_cost = right.cost(db)?;
                let left_card = left.estimate_cardinality(db)?;
                match algorithm {
                    JoinAlgorithm::NestedLoops => Ok(left_cost + left_card * right_cost),
                    JoinAlgorithm::BlockNestedLoops => {
                        let block = db.buffer_pool_free_pages()? as f64 + 1.0;
                        Ok(left_cost + (left_cost / block).ceil() * right_cost)
                    }
                    JoinAlgorithm::Hash | JoinAlgorithm::Indexed => Ok(left_cost + right_cost),
                }
            }
            Plan::GroupBy { input, .. } => input.cost(db),
        }
    }

    /// Flatten a left-deep tree of inner equi-joins into its leaves plus the
    /// join predicates connecting them, discarding the specific left-deep
    /// shape and algorithm choices so the optimizer can re-derive both.
    /// Returns `None` if this subtree is not a pure join region (e.g. a
    /// Union sits somewhere inside it).
    pub fn flatten(&self) -> Option<(Vec<Plan>, Vec<Expr>)> {
        if self.is_table_like() {
            return Some((vec![self.clone()], Vec::new()));
        }
        match self {
            Plan::Join {
                left,
                right,
                predicate,
                ..
            } => {
                let (mut leaves, mut predicates) = left.flatten()?;
                if right.is_table_like() {
                    leaves.push((**right).clone());
                } else {
                    let (right_leaves, right_predicates) = right.flatten()?;
                    leaves.extend(right_leaves);
                    predicates.extend(right_predicates);
                }
                predicates.push(predicate.clone());
                Some((leaves, predicates))
            }
            _ => None,
        }
    }

    /// Build the runnable operator tree for this plan.
    pub fn prepare(
        &self,
        file_manager: &Arc<Mutex<FileManager>>,
        buffer_pool: &Arc<Mutex<BufferPool>>,
    ) -> Result<Box<dyn Operator>> {
        match self {
            Plan::Scan(name) => {
                let (file_id, schema) = {
                    let fm = file_manager.lock().unwrap();
                    (fm.relation_file_id(name)?, fm.relation_schema(name)?.clone())
                };
                Ok(Box::new(crate::operators::TableScan::new(
                    name.clone(),
                    file_id,
                    schema,
                    buffer_pool.clone(),
                    file_manager.clone(),
                )))
            }
            Plan::Select(input, predicate) => {
                let child = input.prepare(file_manager, buffer_pool)?;
                Ok(Box::new(Select::new(child, predicate.clone())))
            }
            Plan::Project(input, exprs) => {
                let child = input.prepare(file_manager, buffer_pool)?;
                Ok(Box::new(Project::new(child, exprs.clone())?))
            }
            Plan::Union { left, right, all } => {
                let left_op = left.prepare(file_manager, buffer_pool)?;
                let right_op = right.prepare(file_manager, buffer_pool)?;
                if *all {
                    Ok(Box::new(UnionAll::new(left_op, right_op)?))
                } else {
                    Ok(Box::new(Union::new(left_op, right_op)?))
                }
            }
            Plan::Join {
                left,
                right,
                predicate,
                algorithm,
            } => {
                let left_op = left.prepare(file_manager, buffer_pool)?;
                let right_op = right.prepare(file_manager, buffer_pool)?;
                let join = Join::new(left_op, right_op, predicate.clone(), *algorithm)?
                    .with_buffer_pool(buffer_pool.clone())
                    .with_file_manager(file_manager.clone());
                Ok(Box::new(join))
            }
            Plan::GroupBy {
                input,
                keys,
                aggregates,
            } => {
                let child = input.prepare(file_manager, buffer_pool)?;
                Ok(Box::new(
                    GroupBy::new(child, keys.clone(), aggregates.clone())?
                        .with_file_manager(file_manager.clone()),
                ))
            }
        }
    }
}

/// A System-R-style heuristic for predicate selectivity: equality narrows
/// more than an inequality, conjunctions compound, disjunctions widen.
pub(crate) fn selectivity(predicate: &Expr) -> f64 {
    match predicate {
        Expr::Compare(_, CompareOp::Eq, _) => 0.1,
        Expr::Compare(..) => 0.33,
        Expr::And(l, r) => selectivity(l) * selectivity(r),
        Expr::Or(l, r) => (selectivity(l) + selectivity(r)).min(1.0),
        Expr::Not(inner) => 1.0 - selectivity(inner),
        _ => 1.0,
    }
}
