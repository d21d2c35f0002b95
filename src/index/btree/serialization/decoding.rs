use byteorder::{ByteOrder, LittleEndian};

use super::{
    internal_slot_size, leaf_slot_size, HEADER_SIZE, LEAF_HEADER_SIZE, OFFSET_MAX_SIZE,
    OFFSET_NEXT_LEAF, OFFSET_PAGE_TYPE, OFFSET_PARENT, OFFSET_SELF, OFFSET_SIZE,
    PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF,
};
use crate::common::types::Rid;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;

/// Deserialize a node from a page buffer
pub fn decode_node<K: IndexKey>(data: &[u8]) -> Result<BTreeNode<K>, BTreeError> {
    let page_type = LittleEndian::read_u32(&data[OFFSET_PAGE_TYPE..]);
    let size = LittleEndian::read_u32(&data[OFFSET_SIZE..]) as usize;
    let max_size = LittleEndian::read_u32(&data[OFFSET_MAX_SIZE..]);
    let parent = LittleEndian::read_u32(&data[OFFSET_PARENT..]);
    let page_id = LittleEndian::read_u32(&data[OFFSET_SELF..]);

    match page_type {
        PAGE_TYPE_LEAF => {
            let slot_size = leaf_slot_size::<K>();
            if LEAF_HEADER_SIZE + size * slot_size > data.len() {
                return Err(BTreeError::InvalidPageFormat(page_id));
            }
            let mut node = BTreeNode::new_leaf(page_id, parent, max_size);
            node.next_leaf = LittleEndian::read_u32(&data[OFFSET_NEXT_LEAF..]);
            let mut offset = LEAF_HEADER_SIZE;
            for _ in 0..size {
                node.keys
                    .push(K::decode(&data[offset..offset + K::ENCODED_SIZE]));
                node.values.push(Rid::new(
                    LittleEndian::read_u32(&data[offset + K::ENCODED_SIZE..]),
                    LittleEndian::read_u32(&data[offset + K::ENCODED_SIZE + 4..]),
                ));
                offset += slot_size;
            }
            Ok(node)
        }
        PAGE_TYPE_INTERNAL => {
            let slot_size = internal_slot_size::<K>();
            if HEADER_SIZE + size * slot_size > data.len() {
                return Err(BTreeError::InvalidPageFormat(page_id));
            }
            let mut node = BTreeNode::new_internal(page_id, parent, max_size);
            let mut offset = HEADER_SIZE;
            for _ in 0..size {
                node.keys
                    .push(K::decode(&data[offset..offset + K::ENCODED_SIZE]));
                node.children
                    .push(LittleEndian::read_u32(&data[offset + K::ENCODED_SIZE..]));
                offset += slot_size;
            }
            Ok(node)
        }
        _ => Err(BTreeError::InvalidPageFormat(page_id)),
    }
}
