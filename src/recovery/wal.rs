use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use parking_lot::Mutex;

use crate::config::WalConfig;
use crate::error::SiltResult;
use crate::recovery::wal_record::{Lsn, WalRecord, WalRecordType};
use crate::storage::page::PageId;

/// Append-only write-ahead log.
///
/// Every mutation is logged and flushed before it touches the tree; commit
/// records are flushed before commit returns. The log lives next to the
/// database file with a `.wal` extension.
#[derive(Debug)]
pub struct WalManager {
    path: PathBuf,
    file: Mutex<File>,
    next_lsn: AtomicU64,
    config: WalConfig,
}

impl WalManager {
    pub fn open(path: impl AsRef<Path>, config: WalConfig) -> SiltResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let wal = WalManager {
            path,
            file: Mutex::new(file),
            next_lsn: AtomicU64::new(0),
            config,
        };
        // Seed the LSN counter from whatever survived on disk.
        let last_lsn = wal.read_all()?.last().map(|r| r.lsn).unwrap_or(0);
        wal.next_lsn.store(last_lsn, Ordering::SeqCst);
        Ok(wal)
    }

    pub fn log_insert(
        &self,
        txn_id: u64,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> SiltResult<Lsn> {
        self.append(WalRecordType::Insert, txn_id, page_id, key, value)
    }

    pub fn log_update(
        &self,
        txn_id: u64,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> SiltResult<Lsn> {
        self.append(WalRecordType::Update, txn_id, page_id, key, value)
    }

    pub fn log_delete(&self, txn_id: u64, page_id: PageId, key: &[u8]) -> SiltResult<Lsn> {
        self.append(WalRecordType::Delete, txn_id, page_id, key, &[])
    }

    pub fn log_begin(&self, txn_id: u64) -> SiltResult<Lsn> {
        self.append(WalRecordType::Begin, txn_id, 0, &[], &[])
    }

    pub fn log_commit(&self, txn_id: u64) -> SiltResult<Lsn> {
        self.append(WalRecordType::Commit, txn_id, 0, &[], &[])
    }

    pub fn log_abort(&self, txn_id: u64) -> SiltResult<Lsn> {
        self.append(WalRecordType::Abort, txn_id, 0, &[], &[])
    }

    pub fn log_checkpoint(&self) -> SiltResult<Lsn> {
        self.append(WalRecordType::Checkpoint, 0, 0, &[], &[])
    }

    /// Force the log to durable media.
    pub fn flush(&self) -> SiltResult<()> {
        let file = self.file.lock();
        if self.config.sync_on_flush {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Read every well-formed record from the start of the log. The scan
    /// stops at the first corrupt or truncated record: everything before it
    /// is the durable frontier.
    pub fn read_all(&self) -> SiltResult<Vec<WalRecord>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let mut records = vec![];
        let mut offset = 0;
        while offset < raw.len() {
            match WalRecord::decode(&raw[offset..]) {
                Ok((record, consumed)) => {
                    records.push(record);
                    offset += consumed;
                }
                Err(_) => {
                    warn!(
                        "WAL scan stopped at byte {} of {}: truncated or corrupt tail",
                        offset,
                        raw.len()
                    );
                    break;
                }
            }
        }
        Ok(records)
    }

    /// Drop all log content, e.g. after a checkpoint. Resets the LSN
    /// counter.
    pub fn truncate(&self) -> SiltResult<()> {
        let mut file = self.file.lock();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        if self.config.sync_on_flush {
            file.sync_data()?;
        }
        self.next_lsn.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub fn last_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(
        &self,
        record_type: WalRecordType,
        txn_id: u64,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> SiltResult<Lsn> {
        let mut file = self.file.lock();
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst) + 1;
        let record = WalRecord {
            record_type,
            lsn,
            txn_id,
            page_id,
            key: key.to_vec(),
            value: value.to_vec(),
        };
        file.seek(SeekFrom::End(0))?;
        file.write_all(&record.encode())?;
        Ok(lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn setup() -> (TempDir, WalManager) {
        let dir = TempDir::new().unwrap();
        let wal = WalManager::open(dir.path().join("test.wal"), WalConfig::default()).unwrap();
        (dir, wal)
    }

    #[test]
    fn lsns_are_strictly_increasing() {
        let (_dir, wal) = setup();
        let a = wal.log_begin(1).unwrap();
        let b = wal.log_insert(1, 1, b"k", b"v").unwrap();
        let c = wal.log_commit(1).unwrap();
        assert!(a < b && b < c);
        assert_eq!(wal.last_lsn(), c);
    }

    #[test]
    fn read_all_returns_records_in_order() {
        let (_dir, wal) = setup();
        wal.log_begin(1).unwrap();
        wal.log_insert(1, 1, b"k1", b"v1").unwrap();
        wal.log_delete(1, 1, b"k1").unwrap();
        wal.log_commit(1).unwrap();
        wal.flush().unwrap();

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].record_type, WalRecordType::Begin);
        assert_eq!(records[1].key, b"k1");
        assert_eq!(records[2].record_type, WalRecordType::Delete);
        assert_eq!(records[3].record_type, WalRecordType::Commit);
    }

    #[test]
    fn lsn_counter_restored_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        {
            let wal = WalManager::open(&path, WalConfig::default()).unwrap();
            wal.log_begin(1).unwrap();
            wal.log_commit(1).unwrap();
            wal.flush().unwrap();
        }
        let wal = WalManager::open(&path, WalConfig::default()).unwrap();
        assert_eq!(wal.last_lsn(), 2);
        assert_eq!(wal.log_begin(2).unwrap(), 3);
    }

    #[test]
    fn truncated_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        {
            let wal = WalManager::open(&path, WalConfig::default()).unwrap();
            wal.log_insert(0, 1, b"good", b"1").unwrap();
            wal.log_insert(0, 1, b"partial", b"2").unwrap();
            wal.flush().unwrap();
        }
        // Chop a few bytes off the end to simulate a torn write.
        let raw = std::fs::read(&path).unwrap();
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&raw[..raw.len() - 4]).unwrap();

        let wal = WalManager::open(&path, WalConfig::default()).unwrap();
        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, b"good");
    }

    #[test]
    fn truncate_resets_log_and_lsn() {
        let (_dir, wal) = setup();
        wal.log_checkpoint().unwrap();
        wal.truncate().unwrap();
        assert_eq!(wal.last_lsn(), 0);
        assert!(wal.read_all().unwrap().is_empty());
    }
}
