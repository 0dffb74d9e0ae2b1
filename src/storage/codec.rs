use bytes::{Buf, BufMut};

use crate::error::{SiltError, SiltResult};
use crate::storage::btree::{BTreeNode, InternalNode, LeafNode};
use crate::storage::page::{PageId, PAGE_HEADER_SIZE, PAGE_SIZE};

const NODE_TYPE_INTERNAL: u8 = 0;
const NODE_TYPE_LEAF: u8 = 1;

/// Serialized node layout inside a page payload:
///
/// ```text
/// [node_type: u8] [key_count: u16] [next_leaf: u32]
/// [key_len: u16] [key bytes] ...                      (key_count entries)
/// leaf:     [val_len: u16] [val bytes] ...            (key_count entries)
/// internal: [child: u32] ...                          (key_count + 1 entries)
/// ```
///
/// All integers little-endian. `next_leaf` is 0 for internal nodes and the
/// last leaf in the chain.
pub struct BTreeNodeCodec;

impl BTreeNodeCodec {
    pub fn encode(node: &BTreeNode, payload: &mut [u8]) -> SiltResult<()> {
        let encoded_len = Self::encoded_len(node);
        if encoded_len > payload.len() {
            return Err(SiltError::Internal(format!(
                "b+tree node of {} bytes overflows page payload of {} bytes",
                encoded_len,
                payload.len()
            )));
        }

        let mut buf = &mut payload[..];
        match node {
            BTreeNode::Leaf(leaf) => {
                buf.put_u8(NODE_TYPE_LEAF);
                buf.put_u16_le(leaf.keys.len() as u16);
                buf.put_u32_le(leaf.next_leaf);
                for key in &leaf.keys {
                    buf.put_u16_le(key.len() as u16);
                    buf.put_slice(key);
                }
                for value in &leaf.values {
                    buf.put_u16_le(value.len() as u16);
                    buf.put_slice(value);
                }
            }
            BTreeNode::Internal(internal) => {
                buf.put_u8(NODE_TYPE_INTERNAL);
                buf.put_u16_le(internal.keys.len() as u16);
                buf.put_u32_le(0);
                for key in &internal.keys {
                    buf.put_u16_le(key.len() as u16);
                    buf.put_slice(key);
                }
                for child in &internal.children {
                    buf.put_u32_le(*child);
                }
            }
        }
        Ok(())
    }

    pub fn decode(mut payload: &[u8]) -> SiltResult<BTreeNode> {
        if payload.len() < 7 {
            return Err(SiltError::Corruption(
                "b+tree node payload too short".to_string(),
            ));
        }
        let node_type = payload.get_u8();
        let key_count = payload.get_u16_le() as usize;
        let next_leaf: PageId = payload.get_u32_le();

        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(Self::get_blob(&mut payload)?);
        }

        match node_type {
            NODE_TYPE_LEAF => {
                let mut values = Vec::with_capacity(key_count);
                for _ in 0..key_count {
                    values.push(Self::get_blob(&mut payload)?);
                }
                Ok(BTreeNode::Leaf(LeafNode {
                    keys,
                    values,
                    next_leaf,
                }))
            }
            NODE_TYPE_INTERNAL => {
                let mut children = Vec::with_capacity(key_count + 1);
                for _ in 0..key_count + 1 {
                    if payload.remaining() < 4 {
                        return Err(SiltError::Corruption(
                            "b+tree internal node truncated".to_string(),
                        ));
                    }
                    children.push(payload.get_u32_le());
                }
                Ok(BTreeNode::Internal(InternalNode { keys, children }))
            }
            other => Err(SiltError::Corruption(format!(
                "unknown b+tree node type {other}"
            ))),
        }
    }

    pub fn encoded_len(node: &BTreeNode) -> usize {
        let header = 1 + 2 + 4;
        match node {
            BTreeNode::Leaf(leaf) => {
                header
                    + leaf.keys.iter().map(|k| 2 + k.len()).sum::<usize>()
                    + leaf.values.iter().map(|v| 2 + v.len()).sum::<usize>()
            }
            BTreeNode::Internal(internal) => {
                header
                    + internal.keys.iter().map(|k| 2 + k.len()).sum::<usize>()
                    + internal.children.len() * 4
            }
        }
    }

    fn get_blob(payload: &mut &[u8]) -> SiltResult<Vec<u8>> {
        if payload.remaining() < 2 {
            return Err(SiltError::Corruption(
                "b+tree node entry truncated".to_string(),
            ));
        }
        let len = payload.get_u16_le() as usize;
        if payload.remaining() < len {
            return Err(SiltError::Corruption(
                "b+tree node entry truncated".to_string(),
            ));
        }
        let blob = payload[..len].to_vec();
        payload.advance(len);
        Ok(blob)
    }
}

/// Maximum payload available to a node within one page.
pub const NODE_PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::INVALID_PAGE_ID;

    #[test]
    fn leaf_round_trip() {
        let node = BTreeNode::Leaf(LeafNode {
            keys: vec![b"apple".to_vec(), b"banana".to_vec()],
            values: vec![b"1".to_vec(), b"2".to_vec()],
            next_leaf: 9,
        });
        let mut payload = vec![0u8; NODE_PAYLOAD_SIZE];
        BTreeNodeCodec::encode(&node, &mut payload).unwrap();
        let decoded = BTreeNodeCodec::decode(&payload).unwrap();
        match decoded {
            BTreeNode::Leaf(leaf) => {
                assert_eq!(leaf.keys, vec![b"apple".to_vec(), b"banana".to_vec()]);
                assert_eq!(leaf.values, vec![b"1".to_vec(), b"2".to_vec()]);
                assert_eq!(leaf.next_leaf, 9);
            }
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn internal_round_trip() {
        let node = BTreeNode::Internal(InternalNode {
            keys: vec![b"m".to_vec()],
            children: vec![2, 3],
        });
        let mut payload = vec![0u8; NODE_PAYLOAD_SIZE];
        BTreeNodeCodec::encode(&node, &mut payload).unwrap();
        match BTreeNodeCodec::decode(&payload).unwrap() {
            BTreeNode::Internal(internal) => {
                assert_eq!(internal.keys, vec![b"m".to_vec()]);
                assert_eq!(internal.children, vec![2, 3]);
            }
            _ => panic!("expected internal"),
        }
    }

    #[test]
    fn empty_leaf_round_trip() {
        let node = BTreeNode::Leaf(LeafNode {
            keys: vec![],
            values: vec![],
            next_leaf: INVALID_PAGE_ID,
        });
        let mut payload = vec![0u8; NODE_PAYLOAD_SIZE];
        BTreeNodeCodec::encode(&node, &mut payload).unwrap();
        match BTreeNodeCodec::decode(&payload).unwrap() {
            BTreeNode::Leaf(leaf) => assert!(leaf.keys.is_empty()),
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn oversized_node_is_rejected() {
        let node = BTreeNode::Leaf(LeafNode {
            keys: vec![vec![b'k'; 3000]],
            values: vec![vec![b'v'; 3000]],
            next_leaf: INVALID_PAGE_ID,
        });
        let mut payload = vec![0u8; NODE_PAYLOAD_SIZE];
        assert!(BTreeNodeCodec::encode(&node, &mut payload).is_err());
    }
}
