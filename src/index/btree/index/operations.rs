use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{decode_node, encode_node};
use crate::storage::buffer::WritePageGuard;

use super::base::{read_root_pointer, write_root_pointer, BTreeIndex};

impl<K: IndexKey> BTreeIndex<K> {
    /// Insert a key/rid pair. Returns `Ok(false)` when the key is already
    /// present (unique-key constraint); the tree is left unchanged.
    ///
    /// The descent uses write-latch crabbing: each child's guard is taken
    /// before the parent's is released, and all ancestor guards (including
    /// the header) are dropped as soon as a node that cannot split is
    /// reached.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut header = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_id = read_root_pointer(header.data());

        // Empty tree: the first key becomes a single leaf root
        if root_id == INVALID_PAGE_ID {
            let (page_id, mut guard) = self.allocate_node_page()?;
            let mut root =
                BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size as u32);
            root.keys.push(key);
            root.values.push(rid);
            encode_node(&root, guard.data_mut())?;
            write_root_pointer(header.data_mut(), page_id);
            return Ok(true);
        }

        let mut header_opt = Some(header);
        let mut stack: Vec<(WritePageGuard, BTreeNode<K>)> = Vec::new();
        let mut page_id = root_id;
        loop {
            let guard = self.buffer_pool.fetch_page_write(page_id)?;
            let node: BTreeNode<K> = decode_node(guard.data())?;
            if node.insert_safe() {
                header_opt = None;
                stack.clear();
            }
            if node.is_leaf {
                stack.push((guard, node));
                break;
            }
            let child = node.child_for(&key);
            stack.push((guard, node));
            page_id = child;
        }

        // Insert into the leaf; a split is only needed on overflow
        {
            let (guard, node) = stack.last_mut().expect("descent reaches a leaf");
            match node.keys.binary_search(&key) {
                Ok(_) => return Ok(false),
                Err(pos) => {
                    node.keys.insert(pos, key.clone());
                    node.values.insert(pos, rid);
                }
            }
            if node.keys.len() <= self.leaf_max_size {
                encode_node(node, guard.data_mut())?;
                return Ok(true);
            }
        }

        let (leaf_guard, leaf) = stack.pop().expect("leaf is on the stack");
        let (mut sep, mut new_child, mut split_left) = self.split_leaf(leaf_guard, leaf)?;

        // Walk the retained ancestors, inserting the separator at each level
        loop {
            match stack.pop() {
                Some((mut guard, mut node)) => {
                    node.insert_child(sep, new_child);
                    if node.children.len() <= self.internal_max_size {
                        encode_node(&node, guard.data_mut())?;
                        return Ok(true);
                    }
                    let (s, c, l) = self.split_internal(guard, node)?;
                    sep = s;
                    new_child = c;
                    split_left = l;
                }
                None => {
                    // The root itself split: grow the tree by one level
                    let mut header = header_opt
                        .take()
                        .expect("a root split keeps the header guard");
                    let (root_page_id, mut root_guard) = self.allocate_node_page()?;
                    let mut root = BTreeNode::new_internal(
                        root_page_id,
                        INVALID_PAGE_ID,
                        self.internal_max_size as u32,
                    );
                    root.keys.push(K::default());
                    root.keys.push(sep);
                    root.children.push(split_left);
                    root.children.push(new_child);
                    encode_node(&root, root_guard.data_mut())?;
                    drop(root_guard);

                    self.set_parent(split_left, root_page_id)?;
                    self.set_parent(new_child, root_page_id)?;
                    write_root_pointer(header.data_mut(), root_page_id);
                    log::debug!("tree root split; new root is page {}", root_page_id);
                    return Ok(true);
                }
            }
        }
    }

    /// Split an over-full leaf. The left node keeps ⌈(m+1)/2⌉ pairs; the new
    /// right sibling takes the rest and is linked into the leaf chain.
    /// Returns (separator, right page id, left page id).
    fn split_leaf(
        &self,
        mut left_guard: WritePageGuard,
        mut left: BTreeNode<K>,
    ) -> Result<(K, PageId, PageId), BTreeError> {
        let split_at = (self.leaf_max_size + 2) / 2;
        let (right_id, mut right_guard) = self.allocate_node_page()?;

        let mut right = BTreeNode::new_leaf(right_id, left.parent, left.max_size);
        right.keys = left.keys.split_off(split_at);
        right.values = left.values.split_off(split_at);
        right.next_leaf = left.next_leaf;
        left.next_leaf = right_id;

        let sep = right.keys[0].clone();
        encode_node(&right, right_guard.data_mut())?;
        encode_node(&left, left_guard.data_mut())?;
        Ok((sep, right_id, left.page_id))
    }

    /// Split an over-full internal node. The left node keeps ⌈(m+1)/2⌉
    /// children; the key between the halves moves up to the parent. Children
    /// that moved right are reparented.
    fn split_internal(
        &self,
        mut left_guard: WritePageGuard,
        mut left: BTreeNode<K>,
    ) -> Result<(K, PageId, PageId), BTreeError> {
        let keep = (self.internal_max_size + 2) / 2;
        let (right_id, mut right_guard) = self.allocate_node_page()?;

        let mut right = BTreeNode::new_internal(right_id, left.parent, left.max_size);
        let sep = left.keys[keep].clone();
        right.children = left.children.split_off(keep);
        let mut moved_keys = left.keys.split_off(keep);
        // The separator moves up rather than into the right node; its slot
        // becomes the right node's unused slot-0 key
        moved_keys[0] = K::default();
        right.keys = moved_keys;

        encode_node(&right, right_guard.data_mut())?;
        encode_node(&left, left_guard.data_mut())?;
        drop(right_guard);
        drop(left_guard);

        for &child in &right.children {
            self.set_parent(child, right_id)?;
        }
        Ok((sep, right_id, left.page_id))
    }
}
