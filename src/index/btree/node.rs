use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::key::IndexKey;

/// In-memory form of a B+-tree page.
///
/// A single struct discriminated by `is_leaf`:
/// - Leaf nodes fill `keys` and `values` pairwise and chain through
///   `next_leaf`.
/// - Internal nodes fill `keys` and `children` pairwise with `keys[0]` an
///   unused placeholder, so `children[i]` covers keys in
///   `[keys[i], keys[i+1])` and the child count always equals the key count.
#[derive(Debug, Clone)]
pub struct BTreeNode<K> {
    pub is_leaf: bool,
    pub page_id: PageId,
    pub parent: PageId,
    pub max_size: u32,
    pub next_leaf: PageId,
    pub keys: Vec<K>,
    pub values: Vec<Rid>,
    pub children: Vec<PageId>,
}

impl<K: IndexKey> BTreeNode<K> {
    pub fn new_leaf(page_id: PageId, parent: PageId, max_size: u32) -> Self {
        Self {
            is_leaf: true,
            page_id,
            parent,
            max_size,
            next_leaf: INVALID_PAGE_ID,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_internal(page_id: PageId, parent: PageId, max_size: u32) -> Self {
        Self {
            is_leaf: false,
            page_id,
            parent,
            max_size,
            next_leaf: INVALID_PAGE_ID,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Current size: pair count for a leaf, child count for an internal node
    pub fn size(&self) -> usize {
        if self.is_leaf {
            self.keys.len()
        } else {
            self.children.len()
        }
    }

    /// Minimum size of a non-root node: ⌈(m−1)/2⌉ keys for a leaf,
    /// ⌈m/2⌉ children for an internal node.
    pub fn min_size(&self) -> usize {
        let max = self.max_size as usize;
        if self.is_leaf {
            max / 2
        } else {
            (max + 1) / 2
        }
    }

    /// A node is safe for insert when adding one entry cannot overflow it
    pub fn insert_safe(&self) -> bool {
        self.size() < self.max_size as usize
    }

    /// A node is safe for delete when removing one entry cannot underflow
    /// it. The root underflows only when it would collapse: a root leaf on
    /// its last key, a root internal node on its second-to-last child.
    pub fn delete_safe(&self, is_root: bool) -> bool {
        let floor = if is_root {
            if self.is_leaf {
                1
            } else {
                2
            }
        } else {
            self.min_size()
        };
        self.size() > floor
    }

    /// Leaf point lookup
    pub fn leaf_lookup(&self, key: &K) -> Option<Rid> {
        debug_assert!(self.is_leaf);
        self.keys
            .binary_search(key)
            .ok()
            .map(|pos| self.values[pos])
    }

    /// Index of the child subtree that covers `key`: the largest `j` with
    /// `keys[j] <= key`, or 0 when every real key exceeds it.
    pub fn child_index_for(&self, key: &K) -> usize {
        debug_assert!(!self.is_leaf);
        self.keys[1..].partition_point(|k| k <= key)
    }

    /// Child page covering `key`
    pub fn child_for(&self, key: &K) -> PageId {
        self.children[self.child_index_for(key)]
    }

    /// Insert a (separator, child) pair produced by a split of the child at
    /// the separator's left.
    pub fn insert_child(&mut self, key: K, child: PageId) {
        debug_assert!(!self.is_leaf);
        let pos = self.keys[1..].partition_point(|k| *k < key) + 1;
        self.keys.insert(pos, key);
        self.children.insert(pos, child);
    }

    /// Position of `child` in this internal node
    pub fn position_of_child(&self, child: PageId) -> Option<usize> {
        debug_assert!(!self.is_leaf);
        self.children.iter().position(|&c| c == child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal_with_keys(keys: &[u32], children: &[PageId]) -> BTreeNode<u32> {
        let mut node = BTreeNode::new_internal(1, INVALID_PAGE_ID, 8);
        node.keys.push(0); // placeholder
        node.keys.extend_from_slice(keys);
        node.children.extend_from_slice(children);
        node
    }

    #[test]
    fn test_child_routing() {
        // children[0] covers (-inf, 10), children[1] covers [10, 20), ...
        let node = internal_with_keys(&[10, 20, 30], &[100, 101, 102, 103]);

        assert_eq!(node.child_for(&5), 100);
        assert_eq!(node.child_for(&10), 101);
        assert_eq!(node.child_for(&19), 101);
        assert_eq!(node.child_for(&20), 102);
        assert_eq!(node.child_for(&35), 103);
    }

    #[test]
    fn test_insert_child_keeps_order() {
        let mut node = internal_with_keys(&[10, 30], &[100, 101, 102]);

        node.insert_child(20, 200);
        assert_eq!(node.keys[1..], [10, 20, 30]);
        assert_eq!(node.children, vec![100, 101, 200, 102]);

        node.insert_child(5, 201);
        assert_eq!(node.keys[1..], [5, 10, 20, 30]);
        assert_eq!(node.children, vec![100, 201, 101, 200, 102]);
    }

    #[test]
    fn test_leaf_lookup() {
        let mut leaf: BTreeNode<u32> = BTreeNode::new_leaf(1, INVALID_PAGE_ID, 8);
        for i in [2u32, 4, 6] {
            leaf.keys.push(i);
            leaf.values.push(Rid::new(i, 0));
        }

        assert_eq!(leaf.leaf_lookup(&4), Some(Rid::new(4, 0)));
        assert_eq!(leaf.leaf_lookup(&5), None);
    }

    #[test]
    fn test_safety_thresholds() {
        let mut leaf: BTreeNode<u32> = BTreeNode::new_leaf(1, INVALID_PAGE_ID, 3);
        leaf.keys.extend([1, 2]);
        leaf.values.extend([Rid::new(1, 0), Rid::new(2, 0)]);

        // Two keys, max 3: one more insert fits, so the leaf is insert-safe;
        // min is 1, so it is also delete-safe.
        assert!(leaf.insert_safe());
        assert!(leaf.delete_safe(false));

        leaf.keys.push(3);
        leaf.values.push(Rid::new(3, 0));
        assert!(!leaf.insert_safe());

        leaf.keys.truncate(1);
        leaf.values.truncate(1);
        assert!(!leaf.delete_safe(false));
        // A root leaf with one key is on its collapse edge
        assert!(!leaf.delete_safe(true));
    }

    #[test]
    fn test_min_sizes() {
        let leaf: BTreeNode<u32> = BTreeNode::new_leaf(1, INVALID_PAGE_ID, 3);
        assert_eq!(leaf.min_size(), 1);
        let internal: BTreeNode<u32> = BTreeNode::new_internal(1, INVALID_PAGE_ID, 3);
        assert_eq!(internal.min_size(), 2);

        let leaf4: BTreeNode<u32> = BTreeNode::new_leaf(1, INVALID_PAGE_ID, 4);
        assert_eq!(leaf4.min_size(), 2);
        let internal4: BTreeNode<u32> = BTreeNode::new_internal(1, INVALID_PAGE_ID, 4);
        assert_eq!(internal4.min_size(), 2);
    }
}
