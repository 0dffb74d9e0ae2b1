use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::error::SiltResult;
use crate::storage::disk_manager::DiskManager;
use crate::storage::page::{Page, PageId};
use crate::utils::cache::LruList;

/// Bounded page cache in front of the disk manager.
///
/// Pages are promoted on every fetch; when the pool is full the
/// least-recently-used page is evicted, written back first if dirty.
/// Eviction writes are synchronous.
#[derive(Debug)]
pub struct BufferPoolManager {
    pool_size: usize,
    disk_manager: Mutex<DiskManager>,
    inner: Mutex<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    pages: HashMap<PageId, Arc<RwLock<Page>>>,
    lru: LruList,
    dirty: HashSet<PageId>,
    hits: u64,
    misses: u64,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: DiskManager) -> Self {
        BufferPoolManager {
            pool_size,
            disk_manager: Mutex::new(disk_manager),
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Allocate a fresh page id and install an empty page for it in the
    /// cache. The page starts dirty so it reaches disk even if untouched.
    pub fn new_page(&self) -> SiltResult<(PageId, Arc<RwLock<Page>>)> {
        let page_id = self.disk_manager.lock().allocate_page();
        let mut inner = self.inner.lock();
        self.make_room(&mut inner)?;
        let page = Arc::new(RwLock::new(Page::new(page_id)));
        inner.pages.insert(page_id, page.clone());
        inner.lru.touch(page_id);
        inner.dirty.insert(page_id);
        Ok((page_id, page))
    }

    pub fn fetch_page(&self, page_id: PageId) -> SiltResult<Arc<RwLock<Page>>> {
        let mut inner = self.inner.lock();
        if let Some(page) = inner.pages.get(&page_id).cloned() {
            inner.hits += 1;
            inner.lru.touch(page_id);
            return Ok(page);
        }

        inner.misses += 1;
        self.make_room(&mut inner)?;
        let page = Arc::new(RwLock::new(self.disk_manager.lock().read_page(page_id)?));
        inner.pages.insert(page_id, page.clone());
        inner.lru.touch(page_id);
        Ok(page)
    }

    pub fn mark_dirty(&self, page_id: PageId) {
        self.inner.lock().dirty.insert(page_id);
    }

    /// Write every dirty page back through the disk manager and clear the
    /// dirty set.
    pub fn flush_dirty(&self) -> SiltResult<()> {
        let mut inner = self.inner.lock();
        let dirty: Vec<PageId> = inner.dirty.iter().copied().collect();
        for page_id in dirty {
            if let Some(page) = inner.pages.get(&page_id) {
                self.disk_manager.lock().write_page(&page.read())?;
            }
        }
        inner.dirty.clear();
        self.disk_manager.lock().sync()?;
        Ok(())
    }

    pub fn num_disk_pages(&self) -> u32 {
        self.disk_manager.lock().num_pages()
    }

    pub fn hit_rate(&self) -> f64 {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64
        }
    }

    /// Evict the LRU page if the pool is at capacity.
    fn make_room(&self, inner: &mut PoolInner) -> SiltResult<()> {
        while inner.pages.len() >= self.pool_size {
            let Some(victim) = inner.lru.pop_lru() else {
                break;
            };
            debug!("buffer pool evicting page {victim}");
            if inner.dirty.remove(&victim) {
                if let Some(page) = inner.pages.get(&victim) {
                    self.disk_manager.lock().write_page(&page.read())?;
                }
            }
            inner.pages.remove(&victim);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(pool_size: usize) -> (TempDir, BufferPoolManager) {
        let dir = TempDir::new().unwrap();
        let disk = DiskManager::try_new(dir.path().join("test.db")).unwrap();
        (dir, BufferPoolManager::new(pool_size, disk))
    }

    #[test]
    fn fetch_hits_after_first_load() {
        let (_dir, pool) = setup(4);
        let (id, page) = pool.new_page().unwrap();
        page.write().payload_mut()[0] = 42;
        pool.flush_dirty().unwrap();

        for _ in 0..10 {
            let page = pool.fetch_page(id).unwrap();
            assert_eq!(page.read().payload()[0], 42);
        }
        // Warm working set within capacity: hit rate approaches 1.
        assert!(pool.hit_rate() > 0.9);
    }

    #[test]
    fn eviction_writes_back_dirty_pages() {
        let (_dir, pool) = setup(2);
        let (id1, page1) = pool.new_page().unwrap();
        page1.write().payload_mut()[0] = 11;
        drop(page1);

        // Fill the pool past capacity so page 1 is evicted.
        let (_id2, _p2) = pool.new_page().unwrap();
        let (_id3, _p3) = pool.new_page().unwrap();

        // The evicted dirty page must have reached disk.
        let reread = pool.fetch_page(id1).unwrap();
        assert_eq!(reread.read().payload()[0], 11);
    }

    #[test]
    fn flush_dirty_clears_set() {
        let (_dir, pool) = setup(4);
        let (id, page) = pool.new_page().unwrap();
        page.write().payload_mut()[0] = 9;
        pool.mark_dirty(id);
        pool.flush_dirty().unwrap();
        assert!(pool.inner.lock().dirty.is_empty());
    }
}
