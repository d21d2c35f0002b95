use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{decode_node, encode_node};
use crate::storage::buffer::WritePageGuard;

use super::base::{read_root_pointer, write_root_pointer, BTreeIndex};

impl<K: IndexKey> BTreeIndex<K> {
    /// Remove a key. Returns `Ok(false)` when the key is absent.
    ///
    /// Underflowing nodes first try to borrow from the left sibling, then
    /// the right; when neither can spare an entry, siblings merge
    /// right-into-left and the underflow may propagate to the parent. The
    /// root collapses when a leaf root empties or an internal root is left
    /// with a single child.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let header = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_id = read_root_pointer(header.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        // Crabbing descent; ancestors are released at delete-safe nodes
        let mut header_opt = Some(header);
        let mut stack: Vec<(WritePageGuard, BTreeNode<K>)> = Vec::new();
        let mut page_id = root_id;
        loop {
            let guard = self.buffer_pool.fetch_page_write(page_id)?;
            let node: BTreeNode<K> = decode_node(guard.data())?;
            let is_root = header_opt.is_some() && stack.is_empty();
            if node.delete_safe(is_root) {
                header_opt = None;
                stack.clear();
            }
            if node.is_leaf {
                stack.push((guard, node));
                break;
            }
            let child = node.child_for(key);
            stack.push((guard, node));
            page_id = child;
        }

        let (mut cur_guard, mut cur) = stack.pop().expect("descent reaches a leaf");
        match cur.keys.binary_search(key) {
            Err(_) => return Ok(false),
            Ok(pos) => {
                cur.keys.remove(pos);
                cur.values.remove(pos);
            }
        }

        // Rebalance upward until a node absorbs the change
        loop {
            let is_root = header_opt.is_some() && stack.is_empty();

            let underfull = if is_root {
                if cur.is_leaf {
                    cur.keys.is_empty()
                } else {
                    cur.children.len() < 2
                }
            } else if stack.is_empty() {
                // The release point of the descent; it was delete-safe
                false
            } else {
                cur.size() < cur.min_size()
            };

            if !underfull {
                encode_node(&cur, cur_guard.data_mut())?;
                return Ok(true);
            }

            if is_root {
                let mut header = header_opt.take().expect("root collapse keeps the header");
                if cur.is_leaf {
                    // Deleting the last key empties the tree
                    write_root_pointer(header.data_mut(), INVALID_PAGE_ID);
                    log::debug!("tree emptied; root page {} freed", cur.page_id);
                } else {
                    // The last remaining child becomes the root
                    let child = cur.children[0];
                    write_root_pointer(header.data_mut(), child);
                    self.set_parent(child, INVALID_PAGE_ID)?;
                    log::debug!("root collapsed onto page {}", child);
                }
                let freed = cur.page_id;
                drop(cur_guard);
                self.free_page(freed);
                return Ok(true);
            }

            let (mut parent_guard, mut parent) =
                stack.pop().expect("non-root nodes have a parent on the stack");
            let idx = parent.position_of_child(cur.page_id).ok_or_else(|| {
                BTreeError::Corrupted(format!(
                    "page {} missing from its parent {}",
                    cur.page_id, parent.page_id
                ))
            })?;

            // Try the left sibling first, then the right
            if idx > 0 {
                let left_id = parent.children[idx - 1];
                let mut left_guard = self.buffer_pool.fetch_page_write(left_id)?;
                let mut left: BTreeNode<K> = decode_node(left_guard.data())?;
                if left.size() > left.min_size() {
                    self.borrow_from_left(&mut left, &mut cur, &mut parent, idx)?;
                    encode_node(&left, left_guard.data_mut())?;
                    encode_node(&cur, cur_guard.data_mut())?;
                    encode_node(&parent, parent_guard.data_mut())?;
                    return Ok(true);
                }
            }
            if idx + 1 < parent.children.len() {
                let right_id = parent.children[idx + 1];
                let mut right_guard = self.buffer_pool.fetch_page_write(right_id)?;
                let mut right: BTreeNode<K> = decode_node(right_guard.data())?;
                if right.size() > right.min_size() {
                    self.borrow_from_right(&mut cur, &mut right, &mut parent, idx)?;
                    encode_node(&right, right_guard.data_mut())?;
                    encode_node(&cur, cur_guard.data_mut())?;
                    encode_node(&parent, parent_guard.data_mut())?;
                    return Ok(true);
                }
            }

            // No sibling can spare an entry: merge right-into-left. The
            // leftmost child instead absorbs its right sibling.
            if idx > 0 {
                let left_id = parent.children[idx - 1];
                let mut left_guard = self.buffer_pool.fetch_page_write(left_id)?;
                let mut left: BTreeNode<K> = decode_node(left_guard.data())?;

                self.merge_into_left(&mut left, &mut cur, &parent, idx)?;
                parent.keys.remove(idx);
                parent.children.remove(idx);

                encode_node(&left, left_guard.data_mut())?;
                let freed = cur.page_id;
                drop(cur_guard);
                self.free_page(freed);
            } else {
                let right_id = parent.children[idx + 1];
                let right_guard = self.buffer_pool.fetch_page_write(right_id)?;
                let mut right: BTreeNode<K> = decode_node(right_guard.data())?;

                self.merge_into_left(&mut cur, &mut right, &parent, idx + 1)?;
                parent.keys.remove(idx + 1);
                parent.children.remove(idx + 1);

                encode_node(&cur, cur_guard.data_mut())?;
                let freed = right.page_id;
                drop(right_guard);
                self.free_page(freed);
            }

            // The parent lost a child; continue rebalancing from it
            cur_guard = parent_guard;
            cur = parent;
        }
    }

    /// Move the left sibling's last entry into `cur`'s front. For leaves the
    /// parent separator becomes `cur`'s new first key; for internal nodes
    /// the separator rotates down and the borrowed key rotates up.
    fn borrow_from_left(
        &self,
        left: &mut BTreeNode<K>,
        cur: &mut BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        idx: usize,
    ) -> Result<(), BTreeError> {
        if cur.is_leaf {
            let key = left.keys.pop().expect("left sibling is above minimum");
            let value = left.values.pop().expect("leaf keys and values match");
            cur.keys.insert(0, key);
            cur.values.insert(0, value);
            parent.keys[idx] = cur.keys[0].clone();
        } else {
            let child = left.children.pop().expect("left sibling is above minimum");
            let borrowed = left.keys.pop().expect("internal keys and children match");
            cur.children.insert(0, child);
            cur.keys.insert(1, parent.keys[idx].clone());
            parent.keys[idx] = borrowed;
            self.set_parent(child, cur.page_id)?;
        }
        Ok(())
    }

    /// Move the right sibling's first entry onto `cur`'s back; mirror image
    /// of `borrow_from_left`. `idx` is `cur`'s position in the parent.
    fn borrow_from_right(
        &self,
        cur: &mut BTreeNode<K>,
        right: &mut BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        idx: usize,
    ) -> Result<(), BTreeError> {
        if cur.is_leaf {
            let key = right.keys.remove(0);
            let value = right.values.remove(0);
            cur.keys.push(key);
            cur.values.push(value);
            parent.keys[idx + 1] = right.keys[0].clone();
        } else {
            let child = right.children.remove(0);
            cur.children.push(child);
            cur.keys.push(parent.keys[idx + 1].clone());
            parent.keys[idx + 1] = right.keys.remove(1);
            self.set_parent(child, cur.page_id)?;
        }
        Ok(())
    }

    /// Fold `right` into `left`. For internal nodes the parent separator at
    /// `sep_idx` (the key above `right`) descends between the two halves.
    fn merge_into_left(
        &self,
        left: &mut BTreeNode<K>,
        right: &mut BTreeNode<K>,
        parent: &BTreeNode<K>,
        sep_idx: usize,
    ) -> Result<(), BTreeError> {
        if left.is_leaf {
            left.keys.append(&mut right.keys);
            left.values.append(&mut right.values);
            left.next_leaf = right.next_leaf;
        } else {
            left.keys.push(parent.keys[sep_idx].clone());
            left.keys.extend(right.keys.drain(1..));
            for &child in &right.children {
                self.set_parent(child, left.page_id)?;
            }
            left.children.append(&mut right.children);
        }
        Ok(())
    }
}
