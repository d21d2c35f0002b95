use byteorder::{ByteOrder, LittleEndian};

use super::{
    internal_slot_size, leaf_slot_size, HEADER_SIZE, LEAF_HEADER_SIZE, OFFSET_LSN,
    OFFSET_MAX_SIZE, OFFSET_NEXT_LEAF, OFFSET_PAGE_TYPE, OFFSET_PARENT, OFFSET_SELF, OFFSET_SIZE,
    PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;

/// Serialize a node into a page buffer
pub fn encode_node<K: IndexKey>(node: &BTreeNode<K>, data: &mut [u8]) -> Result<(), BTreeError> {
    let (page_type, payload_start, slot_size, slots) = if node.is_leaf {
        (PAGE_TYPE_LEAF, LEAF_HEADER_SIZE, leaf_slot_size::<K>(), node.keys.len())
    } else {
        (
            PAGE_TYPE_INTERNAL,
            HEADER_SIZE,
            internal_slot_size::<K>(),
            node.children.len(),
        )
    };

    if payload_start + slots * slot_size > data.len() {
        return Err(BTreeError::NodeTooLarge);
    }

    data.fill(0);
    LittleEndian::write_u32(&mut data[OFFSET_PAGE_TYPE..], page_type);
    LittleEndian::write_u32(&mut data[OFFSET_LSN..], 0);
    LittleEndian::write_u32(&mut data[OFFSET_SIZE..], slots as u32);
    LittleEndian::write_u32(&mut data[OFFSET_MAX_SIZE..], node.max_size);
    LittleEndian::write_u32(&mut data[OFFSET_PARENT..], node.parent);
    LittleEndian::write_u32(&mut data[OFFSET_SELF..], node.page_id);

    if node.is_leaf {
        debug_assert_eq!(node.keys.len(), node.values.len());
        LittleEndian::write_u32(&mut data[OFFSET_NEXT_LEAF..], node.next_leaf);
        let mut offset = payload_start;
        for (key, rid) in node.keys.iter().zip(&node.values) {
            key.encode(&mut data[offset..offset + K::ENCODED_SIZE]);
            LittleEndian::write_u32(&mut data[offset + K::ENCODED_SIZE..], rid.page_id);
            LittleEndian::write_u32(&mut data[offset + K::ENCODED_SIZE + 4..], rid.slot_num);
            offset += slot_size;
        }
    } else {
        debug_assert_eq!(node.keys.len(), node.children.len());
        let mut offset = payload_start;
        for (i, (key, child)) in node.keys.iter().zip(&node.children).enumerate() {
            // Slot 0's key is unused; the zeroed buffer already encodes it
            if i > 0 {
                key.encode(&mut data[offset..offset + K::ENCODED_SIZE]);
            }
            LittleEndian::write_u32(&mut data[offset + K::ENCODED_SIZE..], *child);
            offset += slot_size;
        }
    }

    Ok(())
}

/// Patch the parent pointer of an already-encoded node in place
pub fn write_parent(data: &mut [u8], parent: u32) {
    LittleEndian::write_u32(&mut data[OFFSET_PARENT..], parent);
}
