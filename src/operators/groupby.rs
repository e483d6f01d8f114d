//! Groups a child operator's rows by one or more key expressions and
//! computes aggregates per group.
//!
//! Grouping is set-at-a-time, not pipelined: `open` first partitions the
//! whole input into on-disk buckets keyed by `groupHashFn`, then reads each
//! partition back and folds its rows into per-group accumulators, matching
//! `GroupBy.py`'s `partitionPlan` / `processAllPages` split (partition by
//! hash into per-bucket temp relations, then aggregate each bucket in turn).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::aggregate::AggregateExpr;
use crate::catalog::{Column, Schema};
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::operators::operator::Operator;
use crate::storage::{FileManager, Tuple};
use crate::value::Value;

/// Number of on-disk partitions the hash bucket index is reduced into.
const GROUP_BUCKETS: usize = 16;

static GROUPBY_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn group_key_name(expr: &Expr, index: usize) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        _ => format!("key_{}", index),
    }
}

fn hash_values(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    for v in values {
        v.hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Debug)]
pub struct GroupBy {
    id: u64,
    input: Box<dyn Operator>,
    input_schema: Schema,
    group_exprs: Vec<Expr>,
    aggregates: Vec<AggregateExpr>,
    output_schema: Schema,
    key_schema: Schema,
    group_hash_fn: Option<Expr>,
    file_manager: Option<Arc<Mutex<FileManager>>>,
    groups: Vec<Tuple>,
    position: usize,
}

impl GroupBy {
    pub fn new(
        input: Box<dyn Operator>,
        group_exprs: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
    ) -> Result<Self> {
        let input_schema = input.schema().clone();
        let mut key_columns = Vec::with_capacity(group_exprs.len());
        let mut columns = Vec::with_capacity(group_exprs.len() + aggregates.len());
        for (i, expr) in group_exprs.iter().enumerate() {
            let data_type = expr.result_type(&input_schema)?;
            let column = Column::new(group_key_name(expr, i), data_type);
            key_columns.push(column.clone());
            columns.push(column);
        }
        for agg in &aggregates {
            let data_type = agg.result_type(&input_schema)?;
            columns.push(Column::new(agg.alias.clone(), data_type));
        }
        Ok(Self {
            id: GROUPBY_COUNTER.fetch_add(1, Ordering::Relaxed),
            input,
            input_schema,
            group_exprs,
            aggregates,
            output_schema: Schema::new(columns),
            key_schema: Schema::new(key_columns),
            group_hash_fn: None,
            file_manager: None,
            groups: Vec::new(),
            position: 0,
        })
    }

    /// Supply the `FileManager` needed to partition the input into on-disk
    /// buckets.
    pub fn with_file_manager(mut self, file_manager: Arc<Mutex<FileManager>>) -> Self {
        self.file_manager = Some(file_manager);
        self
    }

    /// Configure the bucketing function applied to each row's group key,
    /// per `groupHashFn`. Falls back to hashing the key's values if omitted.
    pub fn with_group_hash_fn(mut self, expr: Expr) -> Self {
        self.group_hash_fn = Some(expr);
        self
    }

    fn group_key(&self, tuple: &Tuple) -> Result<Vec<Value>> {
        self.group_exprs
            .iter()
            .map(|e| e.eval(&self.input_schema, tuple))
            .collect()
    }

    /// Bucket index a group key partitions into, per `groupHashFn`.
    fn hash_bucket(&self, key: &[Value]) -> Result<usize> {
        match &self.group_hash_fn {
            Some(expr) => {
                let key_tuple = Tuple::new(key.to_vec());
                let v = expr.eval(&self.key_schema, &key_tuple)?;
                let n = v
                    .as_i64()
                    .ok_or_else(|| Error::EvalError("groupHashFn must evaluate to an integer".to_string()))?;
                Ok(n.rem_euclid(GROUP_BUCKETS as i64) as usize)
            }
            None => Ok((hash_values(key) as usize) % GROUP_BUCKETS),
        }
    }

    fn partition_name(&self, bucket: usize) -> String {
        format!("__groupby_{}_{}", self.id, bucket)
    }

    /// Partition the whole input into on-disk buckets by `hash_bucket`,
    /// returning the names of the partitions actually created (some buckets
    /// may end up empty and are simply never materialized).
    fn partition_input(&mut self, fm: &Arc<Mutex<FileManager>>) -> Result<HashSet<String>> {
        let mut created = HashSet::new();
        while let Some(tuple) = self.input.next()? {
            let key = self.group_key(&tuple)?;
            let bucket = self.hash_bucket(&key)?;
            let name = self.partition_name(bucket);
            let packed = self.input_schema.pack(tuple.values())?;

            let mut fm = fm.lock().unwrap();
            if !created.contains(&name) {
                if fm.relation_file_id(&name).is_ok() {
                    fm.remove_relation(&name)?;
                }
                fm.create_relation(&name, self.input_schema.clone())?;
                created.insert(name.clone());
            }
            let file_id = fm.relation_file_id(&name)?;
            fm.file_mut(file_id)?.insert_tuple(&packed)?;
        }
        Ok(created)
    }

    /// Read one partition back and fold its tuples into the shared
    /// (key, accumulators) map.
    fn aggregate_partition(
        &self,
        fm: &Arc<Mutex<FileManager>>,
        name: &str,
        buckets: &mut HashMap<String, (Vec<Value>, Vec<Value>)>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        let rows = {
            let mut fm = fm.lock().unwrap();
            let file_id = fm.relation_file_id(name)?;
            fm.file_mut(file_id)?.tuples()?
        };
        for (_, _, bytes) in rows {
            let values = self.input_schema.unpack(&bytes)?;
            let tuple = Tuple::new(values);
            let key = self.group_key(&tuple)?;
            let key_id = format!("{:?}", key);
            if !buckets.contains_key(&key_id) {
                let initial = self.aggregates.iter().map(|a| a.initial()).collect();
                buckets.insert(key_id.clone(), (key.clone(), initial));
                order.push(key_id.clone());
            }
            let (_, accs) = buckets.get_mut(&key_id).unwrap();
            for (i, agg) in self.aggregates.iter().enumerate() {
                let input_value = agg.input.eval(&self.input_schema, &tuple)?;
                accs[i] = agg.step(&accs[i], &input_value)?;
            }
        }
        Ok(())
    }

    fn cleanup_partitions(&self, fm: &Arc<Mutex<FileManager>>, names: &HashSet<String>) {
        let mut fm = fm.lock().unwrap();
        for name in names {
            let _ = fm.remove_relation(name);
        }
    }
}

impl Operator for GroupBy {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        let fm = self
            .file_manager
            .clone()
            .ok_or_else(|| Error::PlanInvalid("GroupBy requires a file manager to partition its input".to_string()))?;

        let partition_result = self.partition_input(&fm);
        let created = match partition_result {
            Ok(created) => created,
            Err(e) => {
                self.input.close()?;
                return Err(e);
            }
        };
        self.input.close()?;

        let mut buckets: HashMap<String, (Vec<Value>, Vec<Value>)> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let aggregate_result = (|| {
            for name in &created {
                self.aggregate_partition(&fm, name, &mut buckets, &mut order)?;
            }
            Ok(())
        })();
        self.cleanup_partitions(&fm, &created);
        aggregate_result?;

        self.groups = order
            .into_iter()
            .map(|key_id| {
                let (key, accs) = buckets.remove(&key_id).unwrap();
                let finalized: Vec<Value> = accs
                    .into_iter()
                    .zip(&self.aggregates)
                    .map(|(acc, agg)| agg.finalize(acc))
                    .collect();
                let mut values = key;
                values.extend(finalized);
                Tuple::new(values)
            })
            .collect();
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.position < self.groups.len() {
            let tuple = self.groups[self.position].clone();
            self.position += 1;
            Ok(Some(tuple))
        } else {
            Ok(None)
        }
    }

    fn close(&mut self) -> Result<()> {
        self.groups.clear();
        self.position = 0;
        Ok(())
    }

    fn explain(&self, indent: usize) -> String {
        format!(
            "{}GroupBy({:?})\n{}",
            " ".repeat(indent),
            self.output_schema.column_names(),
            self.input.explain(indent + 2)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateKind;
    use crate::catalog::DataType;
    use crate::operators::mock::MockScan;
    use tempfile::TempDir;

    fn file_manager() -> (Arc<Mutex<FileManager>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new(dir.path(), 4096);
        (Arc::new(Mutex::new(fm)), dir)
    }

    fn employees() -> MockScan {
        MockScan::new(
            Schema::new(vec![
                Column::new("id", DataType::Integer),
                Column::new("salary", DataType::Double),
            ]),
            vec![
                Tuple::new(vec![Value::Integer(1), Value::Double(50_000.0)]),
                Tuple::new(vec![Value::Integer(2), Value::Double(75_000.0)]),
                Tuple::new(vec![Value::Integer(3), Value::Double(30_000.0)]),
                Tuple::new(vec![Value::Integer(4), Value::Double(90_000.0)]),
            ],
        )
    }

    #[test]
    fn test_groupby_min_max_by_parity() {
        let group_key = Expr::column("id").modulo(Expr::literal(Value::Integer(2)));
        let aggregates = vec![
            AggregateExpr::new(AggregateKind::Min, Expr::column("salary"), "min_salary"),
            AggregateExpr::new(AggregateKind::Max, Expr::column("salary"), "max_salary"),
        ];
        let (fm, _dir) = file_manager();
        let mut groupby = GroupBy::new(Box::new(employees()), vec![group_key], aggregates)
            .unwrap()
            .with_file_manager(fm);
        groupby.open().unwrap();
        let mut rows = Vec::new();
        while let Some(t) = groupby.next().unwrap() {
            rows.push(t);
        }
        assert_eq!(rows.len(), 2);
        for row in &rows {
            let key = row.get(0).unwrap().as_i64().unwrap();
            let min = row.get(1).unwrap().as_f64().unwrap();
            let max = row.get(2).unwrap().as_f64().unwrap();
            if key == 1 {
                // odd ids: 1 -> 50_000, 3 -> 30_000
                assert_eq!(min, 30_000.0);
                assert_eq!(max, 50_000.0);
            } else {
                // even ids: 2 -> 75_000, 4 -> 90_000
                assert_eq!(min, 75_000.0);
                assert_eq!(max, 90_000.0);
            }
        }
    }

    #[test]
    fn test_groupby_count_and_sum() {
        let group_key = Expr::literal(Value::Integer(0));
        let aggregates = vec![
            AggregateExpr::new(AggregateKind::Count, Expr::column("id"), "n"),
            AggregateExpr::new(AggregateKind::Sum, Expr::column("salary"), "total"),
        ];
        let (fm, _dir) = file_manager();
        let mut groupby = GroupBy::new(Box::new(employees()), vec![group_key], aggregates)
            .unwrap()
            .with_file_manager(fm);
        groupby.open().unwrap();
        let row = groupby.next().unwrap().unwrap();
        assert_eq!(row.get(1).unwrap(), &Value::BigInt(4));
        assert_eq!(row.get(2).unwrap().as_f64(), Some(245_000.0));
        assert!(groupby.next().unwrap().is_none());
    }

    #[test]
    fn test_explicit_group_hash_fn_still_groups_correctly() {
        // A deliberately degenerate hash function (every key lands in bucket
        // 0) still has to produce the right groups, since partitioning is
        // just an intermediate step and the final fold-by-key happens per
        // partition regardless of how many keys share a bucket.
        let group_key = Expr::column("id").modulo(Expr::literal(Value::Integer(2)));
        let aggregates = vec![AggregateExpr::new(AggregateKind::Count, Expr::column("id"), "n")];
        let (fm, _dir) = file_manager();
        let mut groupby = GroupBy::new(Box::new(employees()), vec![group_key], aggregates)
            .unwrap()
            .with_file_manager(fm)
            .with_group_hash_fn(Expr::literal(Value::Integer(0)));
        groupby.open().unwrap();
        let mut rows = Vec::new();
        while let Some(t) = groupby.next().unwrap() {
            rows.push(t);
        }
        assert_eq!(rows.len(), 2);
        let total: i64 = rows.iter().map(|r| r.get(1).unwrap().as_i64().unwrap()).sum();
        assert_eq!(total, 4);
    }
}
