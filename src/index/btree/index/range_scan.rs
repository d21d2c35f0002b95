use std::sync::Arc;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::decode_node;
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard};

use super::base::{read_root_pointer, BTreeIndex};

/// Forward iterator over the leaf chain, yielding keys in ascending order.
///
/// The iterator pins the leaf it currently points into and releases it when
/// stepping to the next leaf. It is not valid across concurrent mutations of
/// the tree.
pub struct BTreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    node: Option<BTreeNode<K>>,
    index: usize,
}

impl<K: IndexKey> BTreeIterator<K> {
    fn exhausted(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            guard: None,
            node: None,
            index: 0,
        }
    }
}

impl<K: IndexKey> Iterator for BTreeIterator<K> {
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node.as_ref()?;
            if self.index < node.keys.len() {
                let item = (node.keys[self.index].clone(), node.values[self.index]);
                self.index += 1;
                return Some(Ok(item));
            }

            // Step to the next leaf, releasing the current one first
            let next_leaf = node.next_leaf;
            self.node = None;
            drop(self.guard.take());
            if next_leaf == INVALID_PAGE_ID {
                return None;
            }
            match self.buffer_pool.fetch_page_read(next_leaf) {
                Ok(guard) => match decode_node::<K>(guard.data()) {
                    Ok(node) => {
                        self.node = Some(node);
                        self.guard = Some(guard);
                        self.index = 0;
                    }
                    Err(e) => return Some(Err(e)),
                },
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Iterate over every key in ascending order
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        self.make_iterator(None)
    }

    /// Iterate in ascending order starting at the first key >= `start`
    pub fn iter_from(&self, start: &K) -> Result<BTreeIterator<K>, BTreeError> {
        self.make_iterator(Some(start))
    }

    fn make_iterator(&self, start: Option<&K>) -> Result<BTreeIterator<K>, BTreeError> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = read_root_pointer(header.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::exhausted(Arc::clone(&self.buffer_pool)));
        }

        // Read-latch-coupled descent to the target leaf
        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header);
        loop {
            let node: BTreeNode<K> = decode_node(guard.data())?;
            if node.is_leaf {
                let index = match start {
                    Some(key) => node.keys.partition_point(|k| k < key),
                    None => 0,
                };
                return Ok(BTreeIterator {
                    buffer_pool: Arc::clone(&self.buffer_pool),
                    node: Some(node),
                    guard: Some(guard),
                    index,
                });
            }
            let child = match start {
                Some(key) => node.child_for(key),
                None => node.children[0],
            };
            let child_guard = self.buffer_pool.fetch_page_read(child)?;
            guard = child_guard;
        }
    }
}
