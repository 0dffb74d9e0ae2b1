use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::warn;

use crate::error::{SiltError, SiltResult};
use crate::storage::page::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE, PAGE_TYPE_DATA};

/// Translates page ids to 4 KiB regions of the database file.
///
/// Page ids are 1-based; id 0 is reserved as invalid. Allocation is
/// monotonic and purely in-memory: the file region comes into existence on
/// first write.
#[derive(Debug)]
pub struct DiskManager {
    file: File,
    next_page_id: PageId,
}

impl DiskManager {
    pub fn try_new(path: impl AsRef<Path>) -> SiltResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            warn!(
                "database file size {} is not a multiple of the page size",
                file_size
            );
        }
        let next_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;
        Ok(DiskManager { file, next_page_id })
    }

    /// Hand out the next page id. No I/O happens here.
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        page_id
    }

    /// Number of pages the file is known to hold (allocated or on disk).
    pub fn num_pages(&self) -> u32 {
        self.next_page_id - 1
    }

    pub fn read_page(&mut self, page_id: PageId) -> SiltResult<Page> {
        if page_id == INVALID_PAGE_ID || page_id >= self.next_page_id {
            return Err(SiltError::Storage(format!(
                "read of invalid page id {page_id}"
            )));
        }

        let offset = (page_id as u64 - 1) * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut buf = [0u8; PAGE_SIZE];
        let mut filled = 0;
        while filled < PAGE_SIZE {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(SiltError::Storage(format!(
                        "failed to read page {page_id}: {e}"
                    )))
                }
            }
        }

        if filled < PAGE_SIZE {
            // Allocated but never written: hand back a fresh page.
            let mut page = Page::new(page_id);
            page.set_page_type(PAGE_TYPE_DATA);
            return Ok(page);
        }
        Ok(Page::from_bytes(buf))
    }

    pub fn write_page(&mut self, page: &Page) -> SiltResult<()> {
        let page_id = page.page_id();
        if page_id == INVALID_PAGE_ID {
            return Err(SiltError::Storage(
                "write of page with invalid id".to_string(),
            ));
        }
        let offset = (page_id as u64 - 1) * PAGE_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(page.data()))
            .and_then(|_| self.file.flush())
            .map_err(|e| SiltError::Storage(format!("failed to write page {page_id}: {e}")))?;
        self.next_page_id = self.next_page_id.max(page_id + 1);
        Ok(())
    }

    pub fn sync(&mut self) -> SiltResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
