use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::buffer::BufferPoolManager;
use crate::config::EngineConfig;
use crate::error::{SiltError, SiltResult};
use crate::recovery::{Lsn, RecoveryManager, WalManager};
use crate::storage::btree::BPlusTree;
use crate::storage::disk_manager::DiskManager;

/// Transactional key/value store over buffer pool + B+-tree + WAL.
///
/// Write-ahead discipline: every mutation is logged and the log flushed
/// before the tree is touched; commit flushes the log and then the dirty
/// pages. The engine is single-writer; callers serialize access.
#[derive(Debug)]
pub struct StorageEngine {
    buffer_pool: Arc<BufferPoolManager>,
    tree: BPlusTree,
    wal: WalManager,
    next_txn_id: AtomicU64,
    active: Mutex<HashMap<u64, TxnState>>,
}

#[derive(Debug, Default)]
struct TxnState {
    /// Keys inserted under this transaction, kept for best-effort rollback.
    inserted_keys: Vec<Vec<u8>>,
}

impl StorageEngine {
    pub fn open(db_path: impl AsRef<Path>) -> SiltResult<Self> {
        Self::open_with_config(db_path, EngineConfig::default())
    }

    pub fn open_with_config(db_path: impl AsRef<Path>, config: EngineConfig) -> SiltResult<Self> {
        let db_path = db_path.as_ref();
        let disk_manager = DiskManager::try_new(db_path)?;
        let buffer_pool = Arc::new(BufferPoolManager::new(
            config.buffer_pool.pool_size,
            disk_manager,
        ));

        let wal_path = PathBuf::from(format!("{}.wal", db_path.display()));
        let wal = WalManager::open(wal_path, config.wal)?;
        let records = wal.read_all()?;

        // Page 1 is the tree root by convention once the file has content.
        let tree = if buffer_pool.num_disk_pages() > 0 {
            BPlusTree::open(buffer_pool.clone(), 1)
        } else {
            BPlusTree::create(buffer_pool.clone())?
        };

        let next_txn_id = if records.is_empty() {
            1
        } else {
            let summary = RecoveryManager::new(&tree).replay(&records)?;
            debug!(
                "opened with recovery: {} replayed, next txn id {}",
                summary.replayed, summary.next_txn_id
            );
            summary.next_txn_id
        };

        Ok(StorageEngine {
            buffer_pool,
            tree,
            wal,
            next_txn_id: AtomicU64::new(next_txn_id),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Begin an explicit transaction. The begin record is durable before
    /// the id is handed out.
    pub fn begin(&self) -> SiltResult<u64> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.wal.log_begin(txn_id)?;
        self.wal.flush()?;
        self.active.lock().insert(txn_id, TxnState::default());
        Ok(txn_id)
    }

    pub fn commit(&self, txn_id: u64) -> SiltResult<()> {
        self.take_active(txn_id)?;
        self.wal.log_commit(txn_id)?;
        self.wal.flush()?;
        self.buffer_pool.flush_dirty()?;
        Ok(())
    }

    /// Best-effort rollback: inserts recorded under the transaction are
    /// deleted again (updates and deletes are not undone).
    pub fn abort(&self, txn_id: u64) -> SiltResult<()> {
        let state = self.take_active(txn_id)?;
        for key in state.inserted_keys.iter().rev() {
            self.tree.delete(key)?;
        }
        self.wal.log_abort(txn_id)?;
        self.wal.flush()?;
        self.buffer_pool.flush_dirty()?;
        Ok(())
    }

    /// Insert under an implicit transaction.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> SiltResult<()> {
        let txn_id = self.begin()?;
        if let Err(e) = self.insert_txn(txn_id, key, value) {
            // The abort record must hit the log before the error surfaces.
            self.abort(txn_id)?;
            return Err(e);
        }
        self.commit(txn_id)
    }

    pub fn insert_txn(&self, txn_id: u64, key: &[u8], value: &[u8]) -> SiltResult<()> {
        self.check_active(txn_id)?;
        self.wal
            .log_insert(txn_id, self.tree.root_page_id(), key, value)?;
        self.wal.flush()?;
        self.tree.insert(key, value)?;
        if let Some(state) = self.active.lock().get_mut(&txn_id) {
            state.inserted_keys.push(key.to_vec());
        }
        Ok(())
    }

    /// Overwrite under an implicit transaction. Same tree upsert as
    /// insert, but logged as an update and never tracked for rollback.
    pub fn update(&self, key: &[u8], value: &[u8]) -> SiltResult<()> {
        let txn_id = self.begin()?;
        if let Err(e) = self.update_txn(txn_id, key, value) {
            self.abort(txn_id)?;
            return Err(e);
        }
        self.commit(txn_id)
    }

    pub fn update_txn(&self, txn_id: u64, key: &[u8], value: &[u8]) -> SiltResult<()> {
        self.check_active(txn_id)?;
        self.wal
            .log_update(txn_id, self.tree.root_page_id(), key, value)?;
        self.wal.flush()?;
        self.tree.insert(key, value)
    }

    /// Delete under an implicit transaction.
    pub fn delete(&self, key: &[u8]) -> SiltResult<()> {
        let txn_id = self.begin()?;
        if let Err(e) = self.delete_txn(txn_id, key) {
            self.abort(txn_id)?;
            return Err(e);
        }
        self.commit(txn_id)
    }

    pub fn delete_txn(&self, txn_id: u64, key: &[u8]) -> SiltResult<()> {
        self.check_active(txn_id)?;
        self.wal
            .log_delete(txn_id, self.tree.root_page_id(), key)?;
        self.wal.flush()?;
        if !self.tree.delete(key)? {
            return Err(SiltError::NotFound(
                String::from_utf8_lossy(key).into_owned(),
            ));
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> SiltResult<Vec<u8>> {
        self.tree.search(key)?.ok_or_else(|| {
            SiltError::NotFound(String::from_utf8_lossy(key).into_owned())
        })
    }

    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> SiltResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.range_scan(start, end)
    }

    /// Write a checkpoint: after it, the log carries no information the
    /// page store does not, so the log is truncated.
    pub fn checkpoint(&self) -> SiltResult<()> {
        self.wal.log_checkpoint()?;
        self.buffer_pool.flush_dirty()?;
        self.wal.flush()?;
        self.wal.truncate()?;
        debug!("checkpoint complete, WAL truncated");
        Ok(())
    }

    pub fn flush(&self) -> SiltResult<()> {
        self.buffer_pool.flush_dirty()?;
        self.wal.flush()
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.buffer_pool.hit_rate()
    }

    pub fn last_lsn(&self) -> Lsn {
        self.wal.last_lsn()
    }

    fn check_active(&self, txn_id: u64) -> SiltResult<()> {
        if self.active.lock().contains_key(&txn_id) {
            Ok(())
        } else {
            Err(SiltError::State(format!(
                "transaction {txn_id} is not active"
            )))
        }
    }

    fn take_active(&self, txn_id: u64) -> SiltResult<TxnState> {
        self.active.lock().remove(&txn_id).ok_or_else(|| {
            SiltError::State(format!("transaction {txn_id} is not active"))
        })
    }
}
