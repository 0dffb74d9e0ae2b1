pub mod wal;
pub mod wal_record;

pub use wal::WalManager;
pub use wal_record::{Lsn, WalRecord, WalRecordType};

use std::collections::HashSet;

use log::{debug, warn};

use crate::error::SiltResult;
use crate::storage::btree::BPlusTree;

/// Outcome of replaying the log at open.
#[derive(Debug, Default)]
pub struct RecoverySummary {
    pub replayed: usize,
    pub skipped: usize,
    pub next_txn_id: u64,
}

/// Replays a recovered log against the tree.
///
/// Protocol: partition transactions into committed and aborted by their
/// terminal records (a transaction carrying both counts as aborted), locate
/// the latest checkpoint, then re-apply every later insert/update/delete
/// whose transaction committed. Transaction id 0 marks auto-committed
/// records and always replays.
pub struct RecoveryManager<'a> {
    tree: &'a BPlusTree,
}

impl<'a> RecoveryManager<'a> {
    pub fn new(tree: &'a BPlusTree) -> Self {
        RecoveryManager { tree }
    }

    pub fn replay(&self, records: &[WalRecord]) -> SiltResult<RecoverySummary> {
        let mut committed: HashSet<u64> = HashSet::new();
        let mut aborted: HashSet<u64> = HashSet::new();
        for record in records {
            match record.record_type {
                WalRecordType::Commit => {
                    committed.insert(record.txn_id);
                }
                WalRecordType::Abort => {
                    aborted.insert(record.txn_id);
                }
                _ => {}
            }
        }

        // Everything up to the latest checkpoint is already reflected in
        // the page store.
        let replay_from = records
            .iter()
            .rposition(|r| r.record_type == WalRecordType::Checkpoint)
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let mut summary = RecoverySummary::default();
        for record in &records[replay_from..] {
            let replayable = record.txn_id == 0
                || (committed.contains(&record.txn_id) && !aborted.contains(&record.txn_id));
            match record.record_type {
                WalRecordType::Insert | WalRecordType::Update if replayable => {
                    self.tree.insert(&record.key, &record.value)?;
                    summary.replayed += 1;
                }
                WalRecordType::Delete if replayable => {
                    if !self.tree.delete(&record.key)? {
                        warn!(
                            "recovery: delete of absent key {:?}",
                            String::from_utf8_lossy(&record.key)
                        );
                    }
                    summary.replayed += 1;
                }
                WalRecordType::Insert | WalRecordType::Update | WalRecordType::Delete => {
                    summary.skipped += 1;
                }
                _ => {}
            }
        }

        summary.next_txn_id = records.iter().map(|r| r.txn_id).max().unwrap_or(0) + 1;
        debug!(
            "recovery replayed {} record(s), skipped {} from uncommitted transactions",
            summary.replayed, summary.skipped
        );
        Ok(summary)
    }
}
