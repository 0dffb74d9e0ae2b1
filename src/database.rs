use std::path::Path;
use std::sync::Arc;

use log::debug;
use tempfile::TempDir;

use crate::catalog::{Catalog, ColumnDef, IndexInfo};
use crate::config::EngineConfig;
use crate::error::SiltResult;
use crate::execution::{ExecutionEngine, RowIdAllocator, StatementResult};
use crate::recovery::Lsn;
use crate::sql::parse_sql;
use crate::storage::StorageEngine;

/// Top-level handle: SQL in, rows or confirmation messages out.
///
/// Single-writer by contract; the embedding host serializes calls.
pub struct Database {
    _temp_dir: Option<TempDir>,
    engine: Arc<StorageEngine>,
    catalog: Catalog,
    row_ids: RowIdAllocator,
}

impl Database {
    pub fn open(db_path: impl AsRef<Path>) -> SiltResult<Self> {
        Self::open_with_config(db_path, EngineConfig::default())
    }

    pub fn open_with_config(db_path: impl AsRef<Path>, config: EngineConfig) -> SiltResult<Self> {
        let engine = Arc::new(StorageEngine::open_with_config(db_path, config)?);
        Ok(Self::from_engine(engine, None))
    }

    /// Throwaway database backed by a temp directory, for tests and demos.
    pub fn open_temp() -> SiltResult<Self> {
        let temp_dir = TempDir::new()?;
        let engine = Arc::new(StorageEngine::open(temp_dir.path().join("silt.db"))?);
        Ok(Self::from_engine(engine, Some(temp_dir)))
    }

    fn from_engine(engine: Arc<StorageEngine>, temp_dir: Option<TempDir>) -> Self {
        let catalog = Catalog::new(engine.clone());
        Database {
            _temp_dir: temp_dir,
            engine,
            catalog,
            row_ids: RowIdAllocator::default(),
        }
    }

    /// Parse and execute one SQL statement.
    pub fn run(&self, sql: &str) -> SiltResult<StatementResult> {
        debug!("run: {sql}");
        let statement = parse_sql(sql)?;
        let executor = ExecutionEngine {
            catalog: &self.catalog,
            engine: &self.engine,
            row_ids: &self.row_ids,
        };
        executor.execute(&statement)
    }

    pub fn begin_transaction(&self) -> SiltResult<u64> {
        self.engine.begin()
    }

    pub fn commit_transaction(&self, txn_id: u64) -> SiltResult<()> {
        self.engine.commit(txn_id)
    }

    pub fn abort_transaction(&self, txn_id: u64) -> SiltResult<()> {
        self.engine.abort(txn_id)
    }

    pub fn checkpoint(&self) -> SiltResult<()> {
        self.engine.checkpoint()
    }

    pub fn flush(&self) -> SiltResult<()> {
        self.engine.flush()
    }

    pub fn list_tables(&self) -> SiltResult<Vec<String>> {
        self.catalog.list_tables()
    }

    pub fn describe_table(&self, table: &str) -> SiltResult<Vec<ColumnDef>> {
        self.catalog.columns(table)
    }

    pub fn list_indexes(&self, table: Option<&str>) -> SiltResult<Vec<IndexInfo>> {
        self.catalog.indexes(table)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.engine.cache_hit_rate()
    }

    pub fn last_lsn(&self) -> Lsn {
        self.engine.last_lsn()
    }

    /// Direct access to the transactional key/value engine.
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }
}
