//! The cost-based query optimizer.
//!
//! Two independent rewrites run over a `Plan`: predicate/projection pushdown
//! (move `Select`/`Project` as close to their base relations as CNF
//! decomposition and attribute membership allow) and System-R-style dynamic
//! programming over join order, which picks both the join order and, per
//! join, the cheapest available algorithm.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::database::Database;
use crate::error::Result;
use crate::expr::Expr;
use crate::operators::join::is_equi_join_predicate;
use crate::operators::{JoinAlgorithm, ProjectExpr};
use crate::plan::Plan;

pub struct Optimizer<'a> {
    db: &'a Database,
}

impl<'a> Optimizer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn optimize(&self, plan: Plan) -> Result<Plan> {
        let pushed = self.pushdown(plan)?;
        self.reorder_joins(pushed)
    }

    // ---- predicate/projection pushdown ----

    fn pushdown(&self, plan: Plan) -> Result<Plan> {
        match plan {
            Plan::Select(input, predicate) => {
                let input = self.pushdown(*input)?;
                self.push_predicate(input, predicate)
            }
            Plan::Project(input, exprs) => {
                let input = self.pushdown(*input)?;
                self.push_project(input, exprs)
            }
            Plan::Union { left, right, all } => Ok(Plan::Union {
                left: Box::new(self.pushdown(*left)?),
                right: Box::new(self.pushdown(*right)?),
                all,
            }),
            Plan::Join {
                left,
                right,
                predicate,
                algorithm,
            } => Ok(Plan::Join {
                left: Box::new(self.pushdown(*left)?),
                right: Box::new(self.pushdown(*right)?),
                predicate,
                algorithm,
            }),
            Plan::GroupBy {
                input,
                keys,
                aggregates,
            } => Ok(Plan::GroupBy {
                input: Box::new(self.pushdown(*input)?),
                keys,
                aggregates,
            }),
            other @ Plan::Scan(_) => Ok(other),
        }
    }

    /// Decompose `predicate` into its top-level conjuncts and push each one
    /// as far down through `plan` as it will go, wrapping whatever doesn't
    /// make it all the way down in a single residual `Select`.
    fn push_predicate(&self, plan: Plan, predicate: Expr) -> Result<Plan> {
        let mut residual = Vec::new();
        let mut result = plan;
        for conjunct in predicate.decompose_cnf() {
            result = self.push_conjunct(result, conjunct, &mut residual)?;
        }
        if residual.is_empty() {
            Ok(result)
        } else {
            Ok(Plan::Select(Box::new(result), Expr::conjoin(residual)))
        }
    }

    fn push_conjunct(&self, plan: Plan, conjunct: Expr, residual: &mut Vec<Expr>) -> Result<Plan> {
        match plan {
            Plan::Join {
                left,
                right,
                predicate,
                algorithm,
            } => {
                let fm = self.db.file_manager();
                let fm = fm.lock().unwrap();
                let left_attrs = left.attributes(&fm)?;
                let right_attrs = right.attributes(&fm)?;
                let needed = conjunct.attributes();
                drop(fm);
                if needed.is_subset(&left_attrs) {
                    let left = Box::new(self.push_conjunct(*left, conjunct, residual)?);
                    Ok(Plan::Join {
                        left,
                        right,
                        predicate,
                        algorithm,
                    })
                } else if needed.is_subset(&right_attrs) {
                    let right = Box::new(self.push_conjunct(*right, conjunct, residual)?);
                    Ok(Plan::Join {
                        left,
                        right,
                        predicate,
                        algorithm,
                    })
                } else {
                    residual.push(conjunct);
                    Ok(Plan::Join {
                        left,
                        right,
                        predicate,
                        algorithm,
                    })
                }
            }
            // A Union's arms share a schema, so a predicate valid above the
            // union is valid against either arm directly.
            Plan::Union { left, right, all } => Ok(Plan::Union {
                left: Box::new(Plan::Select(left, conjunct.clone())),
                right: Box::new(Plan::Select(right, conjunct)),
                all,
            }),
            other => Ok(Plan::Select(Box::new(other), conjunct)),
        }
    }

    /// Partition `exprs` by which side of a `Join` each one's attributes
    /// fall inside, push the matching subset down as a `Project` on that
    /// side, and leave whatever references both sides at the current level.
    /// `UnionAll` gets the whole list pushed to both arms unchanged, since
    /// they share a schema; a deduplicating `Union` is left alone, since
    /// distinctness is computed over the un-projected rows.
    fn push_project(&self, plan: Plan, exprs: Vec<ProjectExpr>) -> Result<Plan> {
        match plan {
            Plan::Join {
                left,
                right,
                predicate,
                algorithm,
            } => {
                let fm = self.db.file_manager();
                let fm = fm.lock().unwrap();
                let left_attrs = left.attributes(&fm)?;
                let right_attrs = right.attributes(&fm)?;
                drop(fm);

                enum Side {
                    Left,
                    Right,
                    Cross,
                }

                let mut sides = Vec::with_capacity(exprs.len());
                let mut left_exprs = Vec::new();
                let mut right_exprs = Vec::new();
                let mut cross_exprs = Vec::new();
                for pe in &exprs {
                    let needed = pe.expr.attributes();
                    if needed.is_subset(&left_attrs) {
                        sides.push(Side::Left);
                        left_exprs.push(pe.clone());
                    } else if needed.is_subset(&right_attrs) {
                        sides.push(Side::Right);
                        right_exprs.push(pe.clone());
                    } else {
                        sides.push(Side::Cross);
                        cross_exprs.push(pe.clone());
                    }
                }

                // The join predicate, and any cross-side expression kept at
                // this level, may still need a column neither bucket asked
                // for by name. Keep it alive through the pushed Project so
                // the Join above still has it to evaluate against.
                let mut required: HashSet<String> = predicate.attributes();
                for pe in &cross_exprs {
                    required.extend(pe.expr.attributes());
                }
                let mut pushed_extra = false;
                for name in required.intersection(&left_attrs) {
                    if !left_exprs.iter().any(|pe| pe.output_name == *name) {
                        left_exprs.push(ProjectExpr::column(name.clone()));
                        pushed_extra = true;
                    }
                }
                for name in required.intersection(&right_attrs) {
                    if !right_exprs.iter().any(|pe| pe.output_name == *name) {
                        right_exprs.push(ProjectExpr::column(name.clone()));
                        pushed_extra = true;
                    }
                }

                let new_left = if left_exprs.is_empty() {
                    *left
                } else {
                    Plan::Project(left, left_exprs)
                };
                let new_right = if right_exprs.is_empty() {
                    *right
                } else {
                    Plan::Project(right, right_exprs)
                };
                let new_join = Plan::Join {
                    left: Box::new(new_left),
                    right: Box::new(new_right),
                    predicate,
                    algorithm,
                };

                if cross_exprs.is_empty() && !pushed_extra {
                    return Ok(new_join);
                }

                // Something was kept at this level or padded in for the
                // predicate's sake; restore the caller's exact column list.
                // Anything already pushed down is just a passthrough of its
                // own (already materialized) output name.
                let mut sides = sides.into_iter();
                let final_exprs = exprs
                    .into_iter()
                    .map(|pe| match sides.next().unwrap() {
                        Side::Cross => pe,
                        Side::Left | Side::Right => ProjectExpr::new(pe.output_name.clone(), Expr::column(pe.output_name)),
                    })
                    .collect();
                Ok(Plan::Project(Box::new(new_join), final_exprs))
            }
            Plan::Union { left, right, all: true } => Ok(Plan::Union {
                left: Box::new(Plan::Project(left, exprs.clone())),
                right: Box::new(Plan::Project(right, exprs)),
                all: true,
            }),
            other => Ok(Plan::Project(Box::new(other), exprs)),
        }
    }

    // ---- join-order selection ----

    fn reorder_joins(&self, plan: Plan) -> Result<Plan> {
        match plan {
            join @ Plan::Join { .. } => self.optimize_join_region(join),
            Plan::Select(input, predicate) => Ok(Plan::Select(Box::new(self.reorder_joins(*input)?), predicate)),
            Plan::Project(input, exprs) => Ok(Plan::Project(Box::new(self.reorder_joins(*input)?), exprs)),
            Plan::Union { left, right, all } => Ok(Plan::Union {
                left: Box::new(self.reorder_joins(*left)?),
                right: Box::new(self.reorder_joins(*right)?),
                all,
            }),
            Plan::GroupBy {
                input,
                keys,
                aggregates,
            } => Ok(Plan::GroupBy {
                input: Box::new(self.reorder_joins(*input)?),
                keys,
                aggregates,
            }),
            other @ Plan::Scan(_) => Ok(other),
        }
    }

    /// Resolve one join region. A region is the maximal chain of `Join`
    /// nodes directly wrapping table-like leaves; if a residual `Select`
    /// from pushdown splits a chain into two regions (because its predicate
    /// couldn't be routed to either side), each region is optimized on its
    /// own rather than jointly — a narrower search than a single global DP
    /// pass, but one that keeps the DP step itself a plain flat subset
    /// search.
    fn optimize_join_region(&self, plan: Plan) -> Result<Plan> {
        match plan.flatten() {
            Some((leaves, predicates)) => {
                let leaves = leaves
                    .into_iter()
                    .map(|leaf| self.reorder_joins(leaf))
                    .collect::<Result<Vec<_>>>()?;
                self.pick_join_order(leaves, predicates)
            }
            None => {
                let Plan::Join {
                    left,
                    right,
                    predicate,
                    algorithm,
                } = plan
                else {
                    unreachable!("optimize_join_region is only called with a Plan::Join")
                };
                Ok(Plan::Join {
                    left: Box::new(self.reorder_joins(*left)?),
                    right: Box::new(self.reorder_joins(*right)?),
                    predicate,
                    algorithm,
                })
            }
        }
    }

    /// Classic System-R dynamic program: `best[S]` is the cheapest left-deep
    /// plan joining exactly the leaves in subset `S`, built by extending a
    /// cheaper `best[S \ {j}]` with leaf `j` for every `j` in `S`.
    fn pick_join_order(&self, leaves: Vec<Plan>, predicates: Vec<Expr>) -> Result<Plan> {
        let n = leaves.len();
        if n == 0 {
            return Err(crate::error::Error::PlanInvalid(
                "join region has no relations to order".to_string(),
            ));
        }
        if n == 1 {
            return Ok(leaves.into_iter().next().unwrap());
        }

        let mut best: HashMap<u32, (Plan, f64)> = HashMap::new();
        for (i, leaf) in leaves.iter().enumerate() {
            let cost = leaf.cost(self.db)?;
            best.insert(1u32 << i, (leaf.clone(), cost));
        }

        for size in 2..=n {
            for mask in 1u32..(1 << n) {
                if mask.count_ones() as usize != size {
                    continue;
                }
                let mut best_for_mask: Option<(Plan, f64)> = None;
                for j in 0..n {
                    let bit = 1u32 << j;
                    if mask & bit == 0 {
                        continue;
                    }
                    let prev_mask = mask & !bit;
                    if prev_mask == 0 {
                        continue;
                    }
                    let Some((left_plan, left_cost)) = best.get(&prev_mask).cloned() else {
                        continue;
                    };
                    let right_plan = leaves[j].clone();
                    let candidate = self.build_best_join(&left_plan, &right_plan, &predicates)?;
                    let total_cost = left_cost + candidate.cost(self.db)?;
                    if best_for_mask.as_ref().map_or(true, |(_, c)| total_cost < *c) {
                        best_for_mask = Some((candidate, total_cost));
                    }
                }
                if let Some(result) = best_for_mask {
                    trace!(mask, cost = result.1, "DP subset cost");
                    best.insert(mask, result);
                }
            }
        }

        let full_mask = (1u32 << n) - 1;
        Ok(best
            .remove(&full_mask)
            .expect("DP always fills in the full subset")
            .0)
    }

    /// For a fixed `(left, right)` pairing, find the predicates that
    /// straddle both sides, then pick the cheapest legal join algorithm for
    /// that predicate.
    fn build_best_join(&self, left: &Plan, right: &Plan, predicates: &[Expr]) -> Result<Plan> {
        let fm = self.db.file_manager();
        let fm = fm.lock().unwrap();
        let left_attrs = left.attributes(&fm)?;
        let right_attrs = right.attributes(&fm)?;
        drop(fm);

        let connecting: Vec<Expr> = predicates
            .iter()
            .filter(|p| {
                let attrs = p.attributes();
                attrs.intersection(&left_attrs).next().is_some()
                    && attrs.intersection(&right_attrs).next().is_some()
            })
            .cloned()
            .collect();
        let join_predicate = Expr::conjoin(connecting.clone());

        let mut candidates = vec![JoinAlgorithm::NestedLoops, JoinAlgorithm::BlockNestedLoops];
        if connecting.len() == 1 && is_equi_join_predicate(&connecting[0]) {
            candidates.push(JoinAlgorithm::Hash);
        }

        let mut best: Option<(Plan, f64, JoinAlgorithm)> = None;
        for algorithm in candidates {
            let candidate = Plan::Join {
                left: Box::new(left.clone()),
                right: Box::new(right.clone()),
                predicate: join_predicate.clone(),
                algorithm,
            };
            let cost = candidate.cost(self.db)?;
            if best.as_ref().map_or(true, |(_, c, _)| cost < *c) {
                best = Some((candidate, cost, algorithm));
            }
        }
        let (plan, cost, algorithm) = best.expect("at least NestedLoops is always a candidate");
        debug!(?algorithm, cost, "join region: algorithm chosen");
        Ok(plan)
    }
}
