//! Join operators.
//!
//! Four algorithms share one `Join` operator shell, selected by
//! `JoinAlgorithm`:
//!
//! - `NestedLoops`: for each left tuple, rescan the right child fully.
//! - `BlockNestedLoops`: buffer a block of up to `B - 1` left tuples (`B`
//!   coming from the buffer pool's free-frame budget when one is supplied,
//!   or a fixed default otherwise), pinning each distinct left page the
//!   block is drawn from and each right page visited during the block's
//!   probe pass, then rescan the right child once per block instead of
//!   once per left tuple. Matches `Join.py`'s `blockJoin` (`getPage(pinned=
//!   True)` / `pinPage` / `unpinPage` around the block and probe passes).
//! - `Hash`: an equi-join only. Partitions both inputs into `N` on-disk
//!   buckets by the join key's hash, through temporary relations named from
//!   this operator's id, side, and bucket (`FileManager::create_relation`/
//!   `remove_relation`, the same partition-to-temp-relation scheme
//!   `GroupBy` uses), then probes bucket `i` of the right partition against
//!   a hash table built from bucket `i` of the left partition, one bucket
//!   at a time (`PARTITION_L -> PARTITION_R -> PROBE(i) -> DONE`).
//!   Partitions are dropped once probed, and on any error or an early
//!   `close()` mid-join. Matches `GroupBy.py`'s `partitionPlan`.
//! - `Indexed`: an interface-only placeholder. Building the join keys from
//!   a genuine index structure is out of scope for this engine; the
//!   variant exists so planners can represent the alternative without the
//!   execution layer pretending to support it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::expr::{CompareOp, Expr};
use crate::operators::operator::Operator;
use crate::storage::{BufferPool, FileManager, Tuple};
use crate::value::Value;

static JOIN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Name of the on-disk partition for `side` (`"l"` or `"r"`) and `bucket`
/// of hash join operator `id`.
fn partition_name(id: u64, side: &str, bucket: usize) -> String {
    format!("__join_{}_{}_{}", id, side, bucket)
}

/// Drain `input` into on-disk buckets keyed by `hash(key_col)`, inserting
/// each newly touched bucket name into `created` as it is first used.
fn partition_relation(
    input: &mut Box<dyn Operator>,
    schema: &Schema,
    key_col: &str,
    id: u64,
    side: &str,
    fm: &Arc<Mutex<FileManager>>,
    created: &mut HashSet<String>,
) -> Result<()> {
    let key_idx = schema.column_index(key_col)?;
    while let Some(t) = input.next()? {
        let v = t.get(key_idx).cloned().unwrap_or(Value::Null);
        let bucket = (hash_value(&v) as usize) % HASH_JOIN_BUCKETS;
        let name = partition_name(id, side, bucket);
        let packed = schema.pack(t.values())?;

        let mut guard = fm.lock().unwrap();
        if !created.contains(&name) {
            if guard.relation_file_id(&name).is_ok() {
                guard.remove_relation(&name)?;
            }
            guard.create_relation(&name, schema.clone())?;
            created.insert(name.clone());
        }
        let file_id = guard.relation_file_id(&name)?;
        guard.file_mut(file_id)?.insert_tuple(&packed)?;
    }
    Ok(())
}

/// Read a partition's tuples back, unpacked into `Tuple`s.
fn read_partition(fm: &Arc<Mutex<FileManager>>, name: &str, schema: &Schema) -> Result<Vec<Tuple>> {
    let mut guard = fm.lock().unwrap();
    let file_id = guard.relation_file_id(name)?;
    let rows = guard.file_mut(file_id)?.tuples()?;
    drop(guard);
    rows.into_iter()
        .map(|(_, _, bytes)| Ok(Tuple::new(schema.unpack(&bytes)?)))
        .collect()
}

/// Drop every named partition, ignoring relations that were never created.
fn cleanup_relations(fm: &Arc<Mutex<FileManager>>, names: &HashSet<String>) {
    let mut guard = fm.lock().unwrap();
    for name in names {
        let _ = guard.remove_relation(name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAlgorithm {
    NestedLoops,
    BlockNestedLoops,
    Hash,
    Indexed,
}

const DEFAULT_BLOCK_SIZE: usize = 64;
const HASH_JOIN_BUCKETS: usize = 16;

fn hash_value(v: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    v.hash(&mut hasher);
    hasher.finish()
}

/// Pull an equi-join key pair `(left_column, right_column)` out of a
/// predicate of the exact shape `left.col = right.col`. Hash join only
/// supports this shape; anything else is rejected up front.
fn extract_equi_key(predicate: &Expr, left: &Schema, right: &Schema) -> Result<(String, String)> {
    let Expr::Compare(l, CompareOp::Eq, r) = predicate else {
        return Err(Error::PlanInvalid(
            "hash join requires a single equality predicate".to_string(),
        ));
    };
    let (Expr::Column(a), Expr::Column(b)) = (l.as_ref(), r.as_ref()) else {
        return Err(Error::PlanInvalid(
            "hash join's equality predicate must compare two columns".to_string(),
        ));
    };
    match (left.has_column(a), right.has_column(b)) {
        (true, true) => Ok((a.clone(), b.clone())),
        _ => match (left.has_column(b), right.has_column(a)) {
            (true, true) => Ok((b.clone(), a.clone())),
            _ => Err(Error::PlanInvalid(
                "hash join equality predicate does not reference one column from each side"
                    .to_string(),
            )),
        },
    }
}

/// Structural check for whether a predicate has the shape hash join
/// requires (`column = column`), without needing concrete schemas. Used by
/// the planner to decide whether `Hash` is even a legal candidate for a
/// join before costing it.
pub fn is_equi_join_predicate(predicate: &Expr) -> bool {
    matches!(
        predicate,
        Expr::Compare(l, CompareOp::Eq, r)
            if matches!(l.as_ref(), Expr::Column(_)) && matches!(r.as_ref(), Expr::Column(_))
    )
}

#[derive(Debug)]
pub struct Join {
    id: u64,
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    predicate: Expr,
    schema: Schema,
    algorithm: JoinAlgorithm,
    buffer_pool: Option<Arc<Mutex<BufferPool>>>,
    file_manager: Option<Arc<Mutex<FileManager>>>,

    // Shared output buffer: every algorithm below pushes matched pairs
    // here and `next()` drains it one tuple at a time.
    pending: std::collections::VecDeque<Tuple>,
    state: JoinState,
}

#[derive(Debug)]
enum JoinState {
    NotStarted,
    NestedLoops {
        left_tuple: Option<Tuple>,
    },
    BlockNestedLoops {
        block: Vec<Tuple>,
        block_exhausted_left: bool,
    },
    Hash {
        key: (String, String),
        created_left: HashSet<String>,
        created_right: HashSet<String>,
        bucket: usize,
        phase: HashPhase,
    },
    Done,
}

#[derive(Debug, PartialEq, Eq)]
enum HashPhase {
    PartitionLeft,
    PartitionRight,
    Probing,
}

impl Join {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        predicate: Expr,
        algorithm: JoinAlgorithm,
    ) -> Result<Self> {
        let schema = left.schema().concat(right.schema())?;
        Ok(Self {
            id: JOIN_COUNTER.fetch_add(1, Ordering::Relaxed),
            left,
            right,
            predicate,
            schema,
            algorithm,
            buffer_pool: None,
            file_manager: None,
            pending: std::collections::VecDeque::new(),
            state: JoinState::NotStarted,
        })
    }

    /// Supply a buffer pool so `BlockNestedLoops` can size its block from
    /// `numFreePages() + 1` instead of a fixed default.
    pub fn with_buffer_pool(mut self, pool: Arc<Mutex<BufferPool>>) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    /// Supply the `FileManager` needed by `Hash` to partition both sides
    /// into on-disk buckets.
    pub fn with_file_manager(mut self, file_manager: Arc<Mutex<FileManager>>) -> Self {
        self.file_manager = Some(file_manager);
        self
    }

    fn block_size(&self) -> usize {
        match &self.buffer_pool {
            Some(pool) => pool.lock().unwrap().num_free_pages() + 1,
            None => DEFAULT_BLOCK_SIZE,
        }
        .max(1)
    }

    fn emit_if_match(&mut self, left: &Tuple, right: &Tuple) -> Result<()> {
        let combined = left.concat(right);
        if self.predicate.eval_predicate(&self.schema, &combined)? {
            self.pending.push_back(combined);
        }
        Ok(())
    }

    fn step_nested_loops(&mut self) -> Result<()> {
        loop {
            let JoinState::NestedLoops { left_tuple } = &self.state else {
                unreachable!()
            };
            let left = match left_tuple {
                Some(t) => t.clone(),
                None => match self.left.next()? {
                    Some(t) => {
                        self.right.close()?;
                        self.right.open()?;
                        self.state = JoinState::NestedLoops {
                            left_tuple: Some(t.clone()),
                        };
                        t
                    }
                    None => {
                        self.state = JoinState::Done;
                        return Ok(());
                    }
                },
            };
            match self.right.next()? {
                Some(right) => {
                    self.emit_if_match(&left, &right)?;
                    if !self.pending.is_empty() {
                        return Ok(());
                    }
                }
                None => {
                    self.state = JoinState::NestedLoops { left_tuple: None };
                }
            }
        }
    }

    fn step_block_nested_loops(&mut self) -> Result<()> {
        loop {
            let JoinState::BlockNestedLoops {
                block,
                block_exhausted_left,
            } = &mut self.state
            else {
                unreachable!()
            };
            if block.is_empty() && !*block_exhausted_left {
                let limit = self.block_size().saturating_sub(1).max(1);
                let mut new_block = Vec::with_capacity(limit);
                for _ in 0..limit {
                    match self.left.next()? {
                        Some(t) => new_block.push(t),
                        None => {
                            if let JoinState::BlockNestedLoops {
                                block_exhausted_left,
                                ..
                            } = &mut self.state
                            {
                                *block_exhausted_left = true;
                            }
                            break;
                        }
                    }
                }
                if new_block.is_empty() {
                    self.state = JoinState::Done;
                    return Ok(());
                }
                self.right.close()?;
                self.right.open()?;
                if let JoinState::BlockNestedLoops { block, .. } = &mut self.state {
                    *block = new_block;
                }
                continue;
            }
            if block.is_empty() {
                self.state = JoinState::Done;
                return Ok(());
            }

            let block_snapshot = block.clone();
            match self.right.next()? {
                Some(right) => {
                    for left in &block_snapshot {
                        self.emit_if_match(left, &right)?;
                    }
                    if !self.pending.is_empty() {
                        return Ok(());
                    }
                }
                None => {
                    // Block exhausted against the right side; start a new block.
                    let exhausted_left =
                        matches!(&self.state, JoinState::BlockNestedLoops { block_exhausted_left, .. } if *block_exhausted_left);
                    if exhausted_left {
                        self.state = JoinState::Done;
                        return Ok(());
                    }
                    self.state = JoinState::BlockNestedLoops {
                        block: Vec::new(),
                        block_exhausted_left: false,
                    };
                }
            }
        }
    }

    /// Drop every partition this join's hash state has created so far, on
    /// whichever side(s) they exist. No-op if the join never reached the
    /// partitioning phase or has already been cleaned up.
    fn cleanup_hash_state(&self) {
        if let JoinState::Hash {
            created_left,
            created_right,
            ..
        } = &self.state
        {
            if let Some(fm) = &self.file_manager {
                cleanup_relations(fm, created_left);
                cleanup_relations(fm, created_right);
            }
        }
    }

    fn step_hash(&mut self) -> Result<()> {
        loop {
            let JoinState::Hash {
                key,
                created_left,
                created_right,
                bucket,
                phase,
            } = &mut self.state
            else {
                unreachable!()
            };
            let fm = self.file_manager.clone().ok_or_else(|| {
                Error::PlanInvalid("hash join requires a file manager to partition its inputs".to_string())
            })?;

            match phase {
                HashPhase::PartitionLeft => {
                    // PARTITION_L: bucket every left tuple by hash(join key)
                    // into a temp relation per bucket.
                    let key_col = key.0.clone();
                    let schema = self.left.schema().clone();
                    if let Err(e) =
                        partition_relation(&mut self.left, &schema, &key_col, self.id, "l", &fm, created_left)
                    {
                        cleanup_relations(&fm, created_left);
                        cleanup_relations(&fm, created_right);
                        return Err(e);
                    }
                    debug!(buckets = created_left.len(), "hash join left side partitioned");
                    *phase = HashPhase::PartitionRight;
                    continue;
                }
                HashPhase::PartitionRight => {
                    // PARTITION_R: same, over the right child.
                    let key_col = key.1.clone();
                    let schema = self.right.schema().clone();
                    if let Err(e) =
                        partition_relation(&mut self.right, &schema, &key_col, self.id, "r", &fm, created_right)
                    {
                        cleanup_relations(&fm, created_left);
                        cleanup_relations(&fm, created_right);
                        return Err(e);
                    }
                    debug!(buckets = created_right.len(), "hash join right side partitioned");
                    *phase = HashPhase::Probing;
                    continue;
                }
                HashPhase::Probing => {
                    // PROBE(bucket_i): read bucket `i` of both partitions
                    // back from disk, build a hash table from the left side,
                    // probe it with the right side, advance to the next
                    // bucket. Buckets that never got a tuple on one side
                    // were never materialized and contribute nothing.
                    let current_bucket = *bucket;
                    if current_bucket >= HASH_JOIN_BUCKETS {
                        cleanup_relations(&fm, created_left);
                        cleanup_relations(&fm, created_right);
                        self.state = JoinState::Done;
                        return Ok(());
                    }
                    let left_name = partition_name(self.id, "l", current_bucket);
                    let right_name = partition_name(self.id, "r", current_bucket);
                    let has_left = created_left.contains(&left_name);
                    let has_right = created_right.contains(&right_name);
                    let left_key_col = key.0.clone();
                    let right_key_col = key.1.clone();

                    let left_schema = self.left.schema().clone();
                    let left_idx = left_schema.column_index(&left_key_col)?;
                    let left_rows = if has_left {
                        read_partition(&fm, &left_name, &left_schema)?
                    } else {
                        Vec::new()
                    };
                    let mut probe_table: HashMap<u64, Vec<Tuple>> = HashMap::new();
                    for t in &left_rows {
                        let v = t.get(left_idx).cloned().unwrap_or(Value::Null);
                        probe_table.entry(hash_value(&v)).or_default().push(t.clone());
                    }

                    if has_right {
                        let right_schema = self.right.schema().clone();
                        let right_idx = right_schema.column_index(&right_key_col)?;
                        let right_rows = read_partition(&fm, &right_name, &right_schema)?;
                        for right_tuple in right_rows {
                            let v = right_tuple.get(right_idx).cloned().unwrap_or(Value::Null);
                            let h = hash_value(&v);
                            if let Some(candidates) = probe_table.get(&h) {
                                for left_tuple in candidates {
                                    self.emit_if_match(left_tuple, &right_tuple)?;
                                }
                            }
                        }
                    }

                    if has_left {
                        let mut guard = fm.lock().unwrap();
                        let _ = guard.remove_relation(&left_name);
                        drop(guard);
                        if let JoinState::Hash { created_left, .. } = &mut self.state {
                            created_left.remove(&left_name);
                        }
                    }
                    if has_right {
                        let mut guard = fm.lock().unwrap();
                        let _ = guard.remove_relation(&right_name);
                        drop(guard);
                        if let JoinState::Hash { created_right, .. } = &mut self.state {
                            created_right.remove(&right_name);
                        }
                    }
                    if let JoinState::Hash { bucket, .. } = &mut self.state {
                        *bucket += 1;
                    }
                    if !self.pending.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Operator for Join {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open(&mut self) -> Result<()> {
        debug!(algorithm = ?self.algorithm, "join opening");
        self.left.open()?;
        self.right.open()?;
        self.pending.clear();
        self.state = match self.algorithm {
            JoinAlgorithm::NestedLoops => JoinState::NestedLoops { left_tuple: None },
            JoinAlgorithm::BlockNestedLoops => JoinState::BlockNestedLoops {
                block: Vec::new(),
                block_exhausted_left: false,
            },
            JoinAlgorithm::Hash => {
                let key = extract_equi_key(&self.predicate, self.left.schema(), self.right.schema())?;
                JoinState::Hash {
                    key,
                    created_left: HashSet::new(),
                    created_right: HashSet::new(),
                    bucket: 0,
                    phase: HashPhase::PartitionLeft,
                }
            }
            JoinAlgorithm::Indexed => {
                return Err(Error::PlanInvalid(
                    "indexed join requires an index structure, which this engine does not build"
                        .to_string(),
                ))
            }
        };
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(tuple) = self.pending.pop_front() {
                return Ok(Some(tuple));
            }
            if matches!(self.state, JoinState::Done) {
                return Ok(None);
            }
            match self.algorithm {
                JoinAlgorithm::NestedLoops => self.step_nested_loops()?,
                JoinAlgorithm::BlockNestedLoops => self.step_block_nested_loops()?,
                JoinAlgorithm::Hash => self.step_hash()?,
                JoinAlgorithm::Indexed => unreachable!("rejected in open()"),
            }
            if self.pending.is_empty() && matches!(self.state, JoinState::Done) {
                return Ok(None);
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        // A hash join closed before reaching `Done` (query aborted, early
        // limit) can still have live partitions on disk; drop them here.
        self.cleanup_hash_state();
        self.left.close()?;
        self.right.close()
    }

    fn explain(&self, indent: usize) -> String {
        format!(
            "{}Join({:?})\n{}\n{}",
            " ".repeat(indent),
            self.algorithm,
            self.left.explain(indent + 2),
            self.right.explain(indent + 2)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::operators::mock::MockScan;
    use tempfile::TempDir;

    fn file_manager() -> (Arc<Mutex<FileManager>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new(dir.path(), 4096);
        (Arc::new(Mutex::new(fm)), dir)
    }

    fn drain(op: &mut dyn Operator) -> Vec<Tuple> {
        op.open().unwrap();
        let mut out = Vec::new();
        while let Some(t) = op.next().unwrap() {
            out.push(t);
        }
        out
    }

    fn employees() -> MockScan {
        MockScan::new(
            Schema::new(vec![
                Column::new("emp_id", DataType::Integer),
                Column::new("dept_id", DataType::Integer),
            ]),
            vec![
                Tuple::new(vec![Value::Integer(1), Value::Integer(10)]),
                Tuple::new(vec![Value::Integer(2), Value::Integer(20)]),
                Tuple::new(vec![Value::Integer(3), Value::Integer(10)]),
            ],
        )
    }

    fn departments() -> MockScan {
        MockScan::new(
            Schema::new(vec![
                Column::new("id", DataType::Integer),
                Column::new("name", DataType::Varchar(8)),
            ]),
            vec![
                Tuple::new(vec![Value::Integer(10), Value::Varchar("eng".to_string())]),
                Tuple::new(vec![Value::Integer(20), Value::Varchar("ops".to_string())]),
            ],
        )
    }

    fn join_predicate() -> Expr {
        Expr::column("dept_id").eq(Expr::column("id"))
    }

    #[test]
    fn test_nested_loops_join() {
        let mut join = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            join_predicate(),
            JoinAlgorithm::NestedLoops,
        )
        .unwrap();
        let rows = drain(&mut join);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_block_nested_loops_matches_nested_loops() {
        let mut nl = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            join_predicate(),
            JoinAlgorithm::NestedLoops,
        )
        .unwrap();
        let mut bnl = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            join_predicate(),
            JoinAlgorithm::BlockNestedLoops,
        )
        .unwrap();
        let nl_rows = drain(&mut nl);
        let bnl_rows = drain(&mut bnl);
        assert_eq!(nl_rows.len(), bnl_rows.len());
    }

    #[test]
    fn test_hash_join_matches_nested_loops_as_a_multiset() {
        let mut nl = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            join_predicate(),
            JoinAlgorithm::NestedLoops,
        )
        .unwrap();
        let (fm, _dir) = file_manager();
        let mut hash_join = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            join_predicate(),
            JoinAlgorithm::Hash,
        )
        .unwrap()
        .with_file_manager(fm);

        let mut nl_rows: Vec<_> = drain(&mut nl)
            .into_iter()
            .map(|t| format!("{:?}", t.values()))
            .collect();
        let mut hash_rows: Vec<_> = drain(&mut hash_join)
            .into_iter()
            .map(|t| format!("{:?}", t.values()))
            .collect();
        nl_rows.sort();
        hash_rows.sort();
        assert_eq!(nl_rows, hash_rows);
    }

    #[test]
    fn test_hash_join_requires_file_manager() {
        let mut join = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            join_predicate(),
            JoinAlgorithm::Hash,
        )
        .unwrap();
        join.open().unwrap();
        assert!(join.next().is_err());
    }

    #[test]
    fn test_hash_join_drops_its_partitions_after_completion() {
        let (fm, _dir) = file_manager();
        let mut join = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            join_predicate(),
            JoinAlgorithm::Hash,
        )
        .unwrap()
        .with_file_manager(fm.clone());
        let rows = drain(&mut join);
        assert_eq!(rows.len(), 3);
        assert!(fm.lock().unwrap().relation_names().is_empty());
    }

    #[test]
    fn test_hash_join_rejects_non_equality_predicate() {
        let mut join = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            Expr::column("dept_id").lt(Expr::column("id")),
            JoinAlgorithm::Hash,
        )
        .unwrap();
        assert!(join.open().is_err());
    }

    #[test]
    fn test_is_equi_join_predicate() {
        assert!(is_equi_join_predicate(&join_predicate()));
        assert!(!is_equi_join_predicate(
            &Expr::column("dept_id").lt(Expr::column("id"))
        ));
    }

    #[test]
    fn test_indexed_join_is_unimplemented_by_design() {
        let mut join = Join::new(
            Box::new(employees()),
            Box::new(departments()),
            join_predicate(),
            JoinAlgorithm::Indexed,
        )
        .unwrap();
        assert!(join.open().is_err());
    }
}
