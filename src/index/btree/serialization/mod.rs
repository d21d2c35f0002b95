//! Fixed-width page codec for B+-tree nodes.
//!
//! Every tree page starts with a 24-byte common header:
//!
//! ```text
//! page-type (u32) | lsn (u32) | current-size (u32) | max-size (u32)
//! | parent-page-id (u32) | self-page-id (u32)
//! ```
//!
//! Leaf pages extend the header with a u32 next-leaf pointer, then store
//! (key, rid) slots; internal pages store (key, child-page-id) slots
//! directly after the common header, with the slot-0 key present but unused.
//! All integers are little-endian.

pub mod decoding;
pub mod encoding;

pub use decoding::decode_node;
pub use encoding::{encode_node, write_parent};

use crate::common::types::PAGE_SIZE;
use crate::index::btree::key::IndexKey;

pub(crate) const PAGE_TYPE_LEAF: u32 = 1;
pub(crate) const PAGE_TYPE_INTERNAL: u32 = 2;

pub(crate) const OFFSET_PAGE_TYPE: usize = 0;
pub(crate) const OFFSET_LSN: usize = 4;
pub(crate) const OFFSET_SIZE: usize = 8;
pub(crate) const OFFSET_MAX_SIZE: usize = 12;
pub(crate) const OFFSET_PARENT: usize = 16;
pub(crate) const OFFSET_SELF: usize = 20;
pub(crate) const HEADER_SIZE: usize = 24;
pub(crate) const OFFSET_NEXT_LEAF: usize = 24;
pub(crate) const LEAF_HEADER_SIZE: usize = 28;

/// Byte width of one leaf slot: key plus (page_id, slot_num)
pub(crate) fn leaf_slot_size<K: IndexKey>() -> usize {
    K::ENCODED_SIZE + 8
}

/// Byte width of one internal slot: key plus child page id
pub(crate) fn internal_slot_size<K: IndexKey>() -> usize {
    K::ENCODED_SIZE + 4
}

/// Largest leaf fan-out a page can hold for key type `K`
pub fn leaf_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / leaf_slot_size::<K>()
}

/// Largest internal fan-out a page can hold for key type `K`
pub fn internal_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - HEADER_SIZE) / internal_slot_size::<K>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Rid, INVALID_PAGE_ID, PAGE_SIZE};
    use crate::index::btree::node::BTreeNode;

    #[test]
    fn test_leaf_round_trip() {
        let mut leaf: BTreeNode<u32> = BTreeNode::new_leaf(7, 3, 8);
        leaf.next_leaf = 9;
        for i in 0..5u32 {
            leaf.keys.push(i * 2);
            leaf.values.push(Rid::new(100 + i, i));
        }

        let mut data = [0u8; PAGE_SIZE];
        encode_node(&leaf, &mut data).unwrap();
        let decoded: BTreeNode<u32> = decode_node(&data).unwrap();

        assert!(decoded.is_leaf);
        assert_eq!(decoded.page_id, 7);
        assert_eq!(decoded.parent, 3);
        assert_eq!(decoded.max_size, 8);
        assert_eq!(decoded.next_leaf, 9);
        assert_eq!(decoded.keys, leaf.keys);
        assert_eq!(decoded.values, leaf.values);
    }

    #[test]
    fn test_internal_round_trip() {
        let mut node: BTreeNode<u64> = BTreeNode::new_internal(4, INVALID_PAGE_ID, 6);
        node.keys.extend([0u64, 10, 20]);
        node.children.extend([11, 12, 13]);

        let mut data = [0u8; PAGE_SIZE];
        encode_node(&node, &mut data).unwrap();
        let decoded: BTreeNode<u64> = decode_node(&data).unwrap();

        assert!(!decoded.is_leaf);
        assert_eq!(decoded.keys[1..], [10, 20]);
        assert_eq!(decoded.children, vec![11, 12, 13]);
    }

    #[test]
    fn test_zeroed_page_is_rejected() {
        let data = [0u8; PAGE_SIZE];
        assert!(decode_node::<u32>(&data).is_err());
    }

    #[test]
    fn test_write_parent_patches_in_place() {
        let mut leaf: BTreeNode<u32> = BTreeNode::new_leaf(7, 3, 8);
        leaf.keys.push(1);
        leaf.values.push(Rid::new(1, 0));

        let mut data = [0u8; PAGE_SIZE];
        encode_node(&leaf, &mut data).unwrap();
        write_parent(&mut data, 42);

        let decoded: BTreeNode<u32> = decode_node(&data).unwrap();
        assert_eq!(decoded.parent, 42);
        assert_eq!(decoded.keys, vec![1]);
    }
}
