//! The engine's public entry point: owns the buffer pool and file manager
//! for one data directory, and turns `Plan`s into running operator trees.

use std::sync::{Arc, Mutex};

use crate::catalog::Schema;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::optimizer::Optimizer;
use crate::plan::Plan;
use crate::storage::{BufferPool, FileManager, Tuple};
use crate::value::Value;

/// A single open instance of the storage and query engine, rooted at one
/// base directory on disk.
#[derive(Debug)]
pub struct Database {
    file_manager: Arc<Mutex<FileManager>>,
    buffer_pool: Arc<Mutex<BufferPool>>,
    config: EngineConfig,
}

impl Database {
    /// Open (creating if necessary) the data directory named in `config`.
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.base_dir)?;
        let file_manager = Arc::new(Mutex::new(FileManager::new(
            config.base_dir.clone(),
            config.page_size,
        )));
        let mut buffer_pool = BufferPool::new(config.pool_size);
        buffer_pool.set_file_manager(file_manager.clone());
        Ok(Self {
            file_manager,
            buffer_pool: Arc::new(Mutex::new(buffer_pool)),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_relation(&self, name: &str, schema: Schema) -> Result<()> {
        self.file_manager.lock().unwrap().create_relation(name, schema)?;
        Ok(())
    }

    /// Attach a relation file that already exists on disk (e.g. from a
    /// previous `Database` instance pointed at the same base directory).
    pub fn open_relation(&self, name: &str) -> Result<()> {
        self.file_manager.lock().unwrap().open_relation(name)?;
        Ok(())
    }

    pub fn remove_relation(&self, name: &str) -> Result<()> {
        self.file_manager.lock().unwrap().remove_relation(name)
    }

    pub fn relation_schema(&self, name: &str) -> Result<Schema> {
        self.file_manager
            .lock()
            .unwrap()
            .relation_schema(name)
            .map(|schema| schema.clone())
    }

    pub fn relation_names(&self) -> Vec<String> {
        self.file_manager
            .lock()
            .unwrap()
            .relation_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Append one tuple to `relation`, returning its storage location. Routed
    /// through the buffer pool rather than `StorageFile::insert_tuple`
    /// directly, so a page the pool already holds dirty in a frame doesn't
    /// get silently clobbered by a stale on-disk read.
    pub fn insert(&self, relation: &str, values: Vec<Value>) -> Result<()> {
        let (file_id, packed) = {
            let mut fm = self.file_manager.lock().unwrap();
            let file_id = fm.relation_file_id(relation)?;
            let file = fm.file_mut(file_id)?;
            let packed = file.schema().pack(&values)?;
            (file_id, packed)
        };
        self.buffer_pool.lock().unwrap().insert_tuple(file_id, &packed)?;
        Ok(())
    }

    /// Run `plan` through the optimizer and execute the result, collecting
    /// every output tuple.
    pub fn query(&self, plan: Plan) -> Result<Vec<Tuple>> {
        let optimized = self.optimizer().optimize(plan)?;
        self.execute(&optimized)
    }

    /// Execute a plan as written, with no optimization — useful for tests
    /// that want to compare the optimizer's choice against a fixed baseline.
    pub fn execute(&self, plan: &Plan) -> Result<Vec<Tuple>> {
        let mut operator = plan.prepare(&self.file_manager, &self.buffer_pool)?;
        operator.open()?;
        let mut out = Vec::new();
        while let Some(tuple) = operator.next()? {
            out.push(tuple);
        }
        operator.close()?;
        Ok(out)
    }

    /// A human-readable rendering of the optimized operator tree for `plan`.
    pub fn explain(&self, plan: Plan) -> Result<String> {
        let optimized = self.optimizer().optimize(plan)?;
        let operator = optimized.prepare(&self.file_manager, &self.buffer_pool)?;
        Ok(operator.explain(0))
    }

    pub fn optimizer(&self) -> Optimizer<'_> {
        Optimizer::new(self)
    }

    pub(crate) fn file_manager(&self) -> Arc<Mutex<FileManager>> {
        self.file_manager.clone()
    }

    pub(crate) fn buffer_pool_free_pages(&self) -> Result<usize> {
        Ok(self.buffer_pool.lock().unwrap().num_free_pages())
    }

    pub(crate) fn relation_page_count(&self, name: &str) -> Result<usize> {
        let fm = self.file_manager.lock().unwrap();
        let file_id = fm.relation_file_id(name)?;
        Ok(fm.file(file_id)?.num_pages() as usize)
    }

    /// Live tuple count for `name`, read directly from its pages. This
    /// engine keeps no separate row-count statistic, so the optimizer pays
    /// for an up-to-date count on every planning pass rather than risking a
    /// stale cached one.
    pub(crate) fn relation_cardinality(&self, name: &str) -> Result<usize> {
        let mut fm = self.file_manager.lock().unwrap();
        let file_id = fm.relation_file_id(name)?;
        let file = fm.file_mut(file_id)?;
        Ok(file.tuples()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::expr::Expr;
    use crate::operators::JoinAlgorithm;
    use tempfile::TempDir;

    fn employee_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Varchar(16)),
            Column::new("salary", DataType::Double),
        ])
    }

    #[test]
    fn test_create_insert_and_point_select() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(EngineConfig::new(dir.path())).unwrap();
        db.create_relation("employee", employee_schema()).unwrap();
        db.insert(
            "employee",
            vec![Value::Integer(1), Value::Varchar("ada".to_string()), Value::Double(50_000.0)],
        )
        .unwrap();
        db.insert(
            "employee",
            vec![Value::Integer(2), Value::Varchar("lin".to_string()), Value::Double(75_000.0)],
        )
        .unwrap();

        let plan = Plan::scan("employee").select(Expr::column("id").eq(Expr::literal(Value::Integer(2))));
        let rows = db.query(plan).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(1), Some(&Value::Varchar("lin".to_string())));
    }

    #[test]
    fn test_remove_relation_then_query_errors() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(EngineConfig::new(dir.path())).unwrap();
        db.create_relation("employee", employee_schema()).unwrap();
        db.remove_relation("employee").unwrap();
        let plan = Plan::scan("employee");
        assert!(db.query(plan).is_err());
    }

    #[test]
    fn test_join_across_relations() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(EngineConfig::new(dir.path()).with_pool_size(8)).unwrap();
        db.create_relation(
            "employee",
            Schema::new(vec![
                Column::new("id", DataType::Integer),
                Column::new("dept_id", DataType::Integer),
            ]),
        )
        .unwrap();
        db.create_relation(
            "department",
            Schema::new(vec![
                Column::new("id", DataType::Integer),
                Column::new("name", DataType::Varchar(8)),
            ]),
        )
        .unwrap();
        for (id, dept) in [(1, 10), (2, 20), (3, 10)] {
            db.insert("employee", vec![Value::Integer(id), Value::Integer(dept)])
                .unwrap();
        }
        db.insert("department", vec![Value::Integer(10), Value::Varchar("eng".to_string())])
            .unwrap();
        db.insert("department", vec![Value::Integer(20), Value::Varchar("ops".to_string())])
            .unwrap();

        let plan = Plan::scan("employee").join(
            Plan::scan("department"),
            Expr::column("dept_id").eq(Expr::column("id")),
            JoinAlgorithm::NestedLoops,
        );
        let rows = db.query(plan).unwrap();
        assert_eq!(rows.len(), 3);
    }
}
