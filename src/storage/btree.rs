use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::error::{SiltError, SiltResult};
use crate::storage::codec::BTreeNodeCodec;
use crate::storage::page::{PageId, INVALID_PAGE_ID, PAGE_TYPE_DATA};

/// Maximum number of keys a node may hold before it must split.
pub const BTREE_ORDER: usize = 16;
const MAX_KEYS: usize = BTREE_ORDER - 1;

#[derive(Debug, Clone)]
pub enum BTreeNode {
    Internal(InternalNode),
    Leaf(LeafNode),
}

#[derive(Debug, Clone)]
pub struct InternalNode {
    pub keys: Vec<Vec<u8>>,
    /// Always `keys.len() + 1` entries: child `i` holds keys < `keys[i]`,
    /// child `i + 1` holds keys >= `keys[i]`.
    pub children: Vec<PageId>,
}

#[derive(Debug, Clone)]
pub struct LeafNode {
    pub keys: Vec<Vec<u8>>,
    pub values: Vec<Vec<u8>>,
    pub next_leaf: PageId,
}

impl BTreeNode {
    fn key_count(&self) -> usize {
        match self {
            BTreeNode::Internal(n) => n.keys.len(),
            BTreeNode::Leaf(n) => n.keys.len(),
        }
    }

    fn is_full(&self) -> bool {
        self.key_count() >= MAX_KEYS
    }
}

/// Ordered map from byte-string keys to byte-string values, persisted one
/// node per page through the buffer pool. Keys are compared
/// byte-lexicographically. Leaves are singly linked in key order.
#[derive(Debug)]
pub struct BPlusTree {
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: AtomicU32,
}

impl BPlusTree {
    /// Create a fresh tree whose root is a new empty leaf.
    pub fn create(buffer_pool: Arc<BufferPoolManager>) -> SiltResult<Self> {
        let tree = BPlusTree {
            buffer_pool,
            root_page_id: AtomicU32::new(INVALID_PAGE_ID),
        };
        let root = tree.allocate_node(&BTreeNode::Leaf(LeafNode {
            keys: vec![],
            values: vec![],
            next_leaf: INVALID_PAGE_ID,
        }))?;
        tree.root_page_id.store(root, Ordering::SeqCst);
        Ok(tree)
    }

    /// Adopt an existing root page.
    pub fn open(buffer_pool: Arc<BufferPoolManager>, root_page_id: PageId) -> Self {
        BPlusTree {
            buffer_pool,
            root_page_id: AtomicU32::new(root_page_id),
        }
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(Ordering::SeqCst)
    }

    /// Upsert: overwrite the value when the key already exists.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> SiltResult<()> {
        let root_id = self.root_page_id();
        let root = self.load_node(root_id)?;
        if root.is_full() {
            // Grow the tree by one level without moving the root page:
            // the root page id is adopted on reopen, so it must stay put.
            // The old root's content migrates to a fresh page that becomes
            // the sole child, then splits. Nothing else references the
            // root's page, so the relocation is safe.
            let migrated_id = self.allocate_node(&root)?;
            self.save_node(
                root_id,
                &BTreeNode::Internal(InternalNode {
                    keys: vec![],
                    children: vec![migrated_id],
                }),
            )?;
            self.split_child(root_id, 0)?;
        }
        self.insert_non_full(root_id, key, value)
    }

    pub fn search(&self, key: &[u8]) -> SiltResult<Option<Vec<u8>>> {
        let leaf = self.load_leaf_for(key)?;
        let pos = leaf.keys.partition_point(|k| k.as_slice() < key);
        if pos < leaf.keys.len() && leaf.keys[pos] == key {
            Ok(Some(leaf.values[pos].clone()))
        } else {
            Ok(None)
        }
    }

    /// Inclusive range scan, keys emitted in non-decreasing order.
    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> SiltResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut results = vec![];
        let mut leaf = self.load_leaf_for(start)?;
        loop {
            for (key, value) in leaf.keys.iter().zip(leaf.values.iter()) {
                if key.as_slice() > end {
                    return Ok(results);
                }
                if key.as_slice() >= start {
                    results.push((key.clone(), value.clone()));
                }
            }
            if leaf.next_leaf == INVALID_PAGE_ID {
                return Ok(results);
            }
            leaf = match self.load_node(leaf.next_leaf)? {
                BTreeNode::Leaf(next) => next,
                BTreeNode::Internal(_) => {
                    return Err(SiltError::Corruption(
                        "leaf chain points at an internal node".to_string(),
                    ))
                }
            };
        }
    }

    /// Best-effort delete: removes the entry from its leaf without
    /// rebalancing. Returns whether the key was present.
    pub fn delete(&self, key: &[u8]) -> SiltResult<bool> {
        let (leaf_id, mut leaf) = self.find_leaf(key)?;
        let pos = leaf.keys.partition_point(|k| k.as_slice() < key);
        if pos < leaf.keys.len() && leaf.keys[pos] == key {
            leaf.keys.remove(pos);
            leaf.values.remove(pos);
            self.save_node(leaf_id, &BTreeNode::Leaf(leaf))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn insert_non_full(&self, page_id: PageId, key: &[u8], value: &[u8]) -> SiltResult<()> {
        match self.load_node(page_id)? {
            BTreeNode::Leaf(mut leaf) => {
                let pos = leaf.keys.partition_point(|k| k.as_slice() < key);
                if pos < leaf.keys.len() && leaf.keys[pos] == key {
                    leaf.values[pos] = value.to_vec();
                } else {
                    leaf.keys.insert(pos, key.to_vec());
                    leaf.values.insert(pos, value.to_vec());
                }
                self.save_node(page_id, &BTreeNode::Leaf(leaf))
            }
            BTreeNode::Internal(node) => {
                let mut pos = node.keys.partition_point(|k| k.as_slice() <= key);
                let child_id = node.children[pos];
                if self.load_node(child_id)?.is_full() {
                    self.split_child(page_id, pos)?;
                    // The split may have shifted our descent target right.
                    let node = match self.load_node(page_id)? {
                        BTreeNode::Internal(n) => n,
                        BTreeNode::Leaf(_) => {
                            return Err(SiltError::Corruption(
                                "internal node changed kind during split".to_string(),
                            ))
                        }
                    };
                    if key >= node.keys[pos].as_slice() {
                        pos += 1;
                    }
                    return self.insert_non_full(node.children[pos], key, value);
                }
                self.insert_non_full(child_id, key, value)
            }
        }
    }

    /// Split the full child at `child_index` of the internal node
    /// `parent_id`. Leaves promote a copy of the right sibling's first key;
    /// internals promote the midpoint key and drop it from the left node.
    fn split_child(&self, parent_id: PageId, child_index: usize) -> SiltResult<()> {
        let mut parent = match self.load_node(parent_id)? {
            BTreeNode::Internal(n) => n,
            BTreeNode::Leaf(_) => {
                return Err(SiltError::Corruption(
                    "split parent is not an internal node".to_string(),
                ))
            }
        };
        let child_id = parent.children[child_index];
        let mid = BTREE_ORDER / 2;

        let (promoted, sibling_id) = match self.load_node(child_id)? {
            BTreeNode::Leaf(mut leaf) => {
                let right_keys = leaf.keys.split_off(mid);
                let right_values = leaf.values.split_off(mid);
                let promoted = right_keys[0].clone();
                let sibling_id = self.allocate_node(&BTreeNode::Leaf(LeafNode {
                    keys: right_keys,
                    values: right_values,
                    next_leaf: leaf.next_leaf,
                }))?;
                leaf.next_leaf = sibling_id;
                self.save_node(child_id, &BTreeNode::Leaf(leaf))?;
                (promoted, sibling_id)
            }
            BTreeNode::Internal(mut internal) => {
                let right_keys = internal.keys.split_off(mid);
                let right_children = internal.children.split_off(mid);
                let promoted = internal
                    .keys
                    .pop()
                    .ok_or_else(|| SiltError::Corruption("split of empty internal".to_string()))?;
                let sibling_id = self.allocate_node(&BTreeNode::Internal(InternalNode {
                    keys: right_keys,
                    children: right_children,
                }))?;
                self.save_node(child_id, &BTreeNode::Internal(internal))?;
                (promoted, sibling_id)
            }
        };

        parent.keys.insert(child_index, promoted);
        parent.children.insert(child_index + 1, sibling_id);
        self.save_node(parent_id, &BTreeNode::Internal(parent))
    }

    fn find_leaf(&self, key: &[u8]) -> SiltResult<(PageId, LeafNode)> {
        let mut current = self.root_page_id();
        loop {
            match self.load_node(current)? {
                BTreeNode::Leaf(leaf) => return Ok((current, leaf)),
                BTreeNode::Internal(node) => {
                    let pos = node.keys.partition_point(|k| k.as_slice() <= key);
                    current = node.children[pos];
                }
            }
        }
    }

    fn load_leaf_for(&self, key: &[u8]) -> SiltResult<LeafNode> {
        Ok(self.find_leaf(key)?.1)
    }

    fn load_node(&self, page_id: PageId) -> SiltResult<BTreeNode> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = BTreeNodeCodec::decode(page.read().payload())?;
        Ok(node)
    }

    fn save_node(&self, page_id: PageId, node: &BTreeNode) -> SiltResult<()> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        {
            let mut guard = page.write();
            guard.set_num_slots(node.key_count() as u16);
            BTreeNodeCodec::encode(node, guard.payload_mut())?;
        }
        self.buffer_pool.mark_dirty(page_id);
        Ok(())
    }

    fn allocate_node(&self, node: &BTreeNode) -> SiltResult<PageId> {
        let (page_id, page) = self.buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            guard.set_page_type(PAGE_TYPE_DATA);
            guard.set_num_slots(node.key_count() as u16);
            BTreeNodeCodec::encode(node, guard.payload_mut())?;
        }
        Ok(page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_manager::DiskManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BPlusTree) {
        let dir = TempDir::new().unwrap();
        let disk = DiskManager::try_new(dir.path().join("test.db")).unwrap();
        let pool = Arc::new(BufferPoolManager::new(128, disk));
        let tree = BPlusTree::create(pool).unwrap();
        (dir, tree)
    }

    #[test]
    fn insert_then_search() {
        let (_dir, tree) = setup();
        tree.insert(b"k1", b"v1").unwrap();
        tree.insert(b"k2", b"v2").unwrap();
        assert_eq!(tree.search(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(tree.search(b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(tree.search(b"k3").unwrap(), None);
    }

    #[test]
    fn insert_overwrites_existing_key() {
        let (_dir, tree) = setup();
        tree.insert(b"k", b"old").unwrap();
        tree.insert(b"k", b"new").unwrap();
        assert_eq!(tree.search(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn splits_preserve_every_key() {
        let (_dir, tree) = setup();
        // Enough keys for multiple levels of splits, inserted out of order.
        let mut keys: Vec<u32> = (0..500).collect();
        keys.reverse();
        for k in &keys {
            let key = format!("key{:05}", k);
            let value = format!("value{}", k);
            tree.insert(key.as_bytes(), value.as_bytes()).unwrap();
        }
        for k in 0..500 {
            let key = format!("key{:05}", k);
            assert_eq!(
                tree.search(key.as_bytes()).unwrap(),
                Some(format!("value{}", k).into_bytes()),
                "missing {key}"
            );
        }
    }

    #[test]
    fn range_scan_is_ordered_and_inclusive() {
        let (_dir, tree) = setup();
        for k in [5u32, 1, 9, 3, 7, 2, 8, 4, 6] {
            let key = format!("k{:03}", k);
            tree.insert(key.as_bytes(), b"x").unwrap();
        }
        let results = tree.range_scan(b"k002", b"k007").unwrap();
        let keys: Vec<String> = results
            .iter()
            .map(|(k, _)| String::from_utf8(k.clone()).unwrap())
            .collect();
        assert_eq!(keys, vec!["k002", "k003", "k004", "k005", "k006", "k007"]);
    }

    #[test]
    fn range_scan_crosses_leaf_boundaries() {
        let (_dir, tree) = setup();
        for k in 0..200u32 {
            let key = format!("k{:05}", k);
            tree.insert(key.as_bytes(), key.as_bytes()).unwrap();
        }
        let results = tree.range_scan(b"k00010", b"k00150").unwrap();
        assert_eq!(results.len(), 141);
        let mut prev: Option<Vec<u8>> = None;
        for (key, _) in results {
            if let Some(p) = &prev {
                assert!(p < &key);
            }
            prev = Some(key);
        }
    }

    #[test]
    fn delete_removes_key_without_rebalance() {
        let (_dir, tree) = setup();
        for k in 0..100u32 {
            let key = format!("k{:04}", k);
            tree.insert(key.as_bytes(), b"v").unwrap();
        }
        assert!(tree.delete(b"k0042").unwrap());
        assert_eq!(tree.search(b"k0042").unwrap(), None);
        assert!(!tree.delete(b"k0042").unwrap());
        // Neighbors survive.
        assert!(tree.search(b"k0041").unwrap().is_some());
        assert!(tree.search(b"k0043").unwrap().is_some());
        let scanned = tree.range_scan(b"k0000", b"k0099").unwrap();
        assert_eq!(scanned.len(), 99);
    }

    #[test]
    fn search_finds_keys_promoted_to_separators() {
        let (_dir, tree) = setup();
        // Sequential inserts make every split promote a live key; all of
        // them must remain reachable by point lookup.
        for k in 0..64u32 {
            let key = format!("{:04}", k);
            tree.insert(key.as_bytes(), key.as_bytes()).unwrap();
        }
        for k in 0..64u32 {
            let key = format!("{:04}", k);
            assert_eq!(
                tree.search(key.as_bytes()).unwrap(),
                Some(key.clone().into_bytes()),
                "separator key {key} unreachable"
            );
        }
    }

    #[test]
    fn root_page_stays_put_across_splits() {
        let (_dir, tree) = setup();
        let root = tree.root_page_id();
        for k in 0..100u32 {
            let key = format!("k{:04}", k);
            tree.insert(key.as_bytes(), b"v").unwrap();
        }
        // Splits grew the tree, but the root page id never moved.
        assert_eq!(tree.root_page_id(), root);
    }

    #[test]
    fn reopen_from_root_page() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let root;
        {
            let disk = DiskManager::try_new(&path).unwrap();
            let pool = Arc::new(BufferPoolManager::new(128, disk));
            let tree = BPlusTree::create(pool.clone()).unwrap();
            root = tree.root_page_id();
            // Enough keys to split the root at least twice.
            for k in 0..200u32 {
                let key = format!("k{:05}", k);
                tree.insert(key.as_bytes(), key.as_bytes()).unwrap();
            }
            pool.flush_dirty().unwrap();
        }
        let disk = DiskManager::try_new(&path).unwrap();
        let pool = Arc::new(BufferPoolManager::new(128, disk));
        let tree = BPlusTree::open(pool, root);
        for k in 0..200u32 {
            let key = format!("k{:05}", k);
            assert_eq!(
                tree.search(key.as_bytes()).unwrap(),
                Some(key.clone().into_bytes())
            );
        }
    }
}
