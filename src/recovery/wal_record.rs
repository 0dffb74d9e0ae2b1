use bytes::{Buf, BufMut, BytesMut};

use crate::error::{SiltError, SiltResult};
use crate::storage::page::PageId;

pub type Lsn = u64;

/// On-disk record layout (little-endian):
///
/// ```text
/// [type: u8] [lsn: u64] [txn_id: u64] [page_id: u32]
/// [key_len: u16] [key] [value_len: u16] [value] [checksum: u32]
/// ```
///
/// The checksum is a bytewise XOR of type, lsn, txn_id and page_id (each
/// truncated to u32) and every byte of key and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    Insert = 1,
    Update = 2,
    Delete = 3,
    Checkpoint = 4,
    Begin = 5,
    Commit = 6,
    Abort = 7,
}

impl TryFrom<u8> for WalRecordType {
    type Error = SiltError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(WalRecordType::Insert),
            2 => Ok(WalRecordType::Update),
            3 => Ok(WalRecordType::Delete),
            4 => Ok(WalRecordType::Checkpoint),
            5 => Ok(WalRecordType::Begin),
            6 => Ok(WalRecordType::Commit),
            7 => Ok(WalRecordType::Abort),
            other => Err(SiltError::Corruption(format!(
                "unknown WAL record type {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub record_type: WalRecordType,
    pub lsn: Lsn,
    pub txn_id: u64,
    pub page_id: PageId,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl WalRecord {
    pub fn checksum(&self) -> u32 {
        let mut checksum = self.record_type as u32;
        checksum ^= self.lsn as u32;
        checksum ^= self.txn_id as u32;
        checksum ^= self.page_id;
        for b in &self.key {
            checksum ^= *b as u32;
        }
        for b in &self.value {
            checksum ^= *b as u32;
        }
        checksum
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(27 + self.key.len() + self.value.len());
        buf.put_u8(self.record_type as u8);
        buf.put_u64_le(self.lsn);
        buf.put_u64_le(self.txn_id);
        buf.put_u32_le(self.page_id);
        buf.put_u16_le(self.key.len() as u16);
        buf.put_slice(&self.key);
        buf.put_u16_le(self.value.len() as u16);
        buf.put_slice(&self.value);
        buf.put_u32_le(self.checksum());
        buf.to_vec()
    }

    /// Decode one record from the front of `buf`, returning it together
    /// with the number of bytes consumed. A truncated buffer or a checksum
    /// mismatch yields a `Corruption` error; the caller treats either as
    /// the end of the durable log.
    pub fn decode(buf: &[u8]) -> SiltResult<(WalRecord, usize)> {
        let mut cursor = buf;
        if cursor.remaining() < 23 {
            return Err(SiltError::Corruption("truncated WAL record".to_string()));
        }
        let record_type = WalRecordType::try_from(cursor.get_u8())?;
        let lsn = cursor.get_u64_le();
        let txn_id = cursor.get_u64_le();
        let page_id = cursor.get_u32_le();

        let key = Self::take_blob(&mut cursor)?;
        let value = Self::take_blob(&mut cursor)?;

        if cursor.remaining() < 4 {
            return Err(SiltError::Corruption("truncated WAL record".to_string()));
        }
        let stored_checksum = cursor.get_u32_le();

        let record = WalRecord {
            record_type,
            lsn,
            txn_id,
            page_id,
            key,
            value,
        };
        if record.checksum() != stored_checksum {
            return Err(SiltError::Corruption(format!(
                "WAL checksum mismatch at lsn {lsn}"
            )));
        }
        let consumed = buf.len() - cursor.remaining();
        Ok((record, consumed))
    }

    fn take_blob(cursor: &mut &[u8]) -> SiltResult<Vec<u8>> {
        if cursor.remaining() < 2 {
            return Err(SiltError::Corruption("truncated WAL record".to_string()));
        }
        let len = cursor.get_u16_le() as usize;
        if cursor.remaining() < len {
            return Err(SiltError::Corruption("truncated WAL record".to_string()));
        }
        let blob = cursor[..len].to_vec();
        cursor.advance(len);
        Ok(blob)
    }
}
