use std::marker::PhantomData;
use std::sync::Arc;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::BTreeConfig;
use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{
    decode_node, internal_capacity, leaf_capacity, write_parent,
};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager, WritePageGuard};

/// B+-tree index over buffer pool pages, keyed by fixed-width unique keys.
///
/// The root pointer lives in a dedicated header page whose write guard
/// doubles as the root latch: every mutating descent starts by latching the
/// header, and releases it as soon as a safe node is reached.
pub struct BTreeIndex<K: IndexKey> {
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) header_page_id: PageId,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Create a fresh (empty) tree, allocating its header page
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        config: BTreeConfig,
    ) -> Result<Self, BTreeError> {
        Self::validate_config(&config)?;

        let mut header = buffer_pool.new_page_write()?;
        let header_page_id = header.page_id();
        write_root_pointer(header.data_mut(), INVALID_PAGE_ID);
        drop(header);

        Ok(Self {
            buffer_pool,
            header_page_id,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            _phantom: PhantomData,
        })
    }

    /// Reattach to a tree whose header page already exists on disk
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        config: BTreeConfig,
        header_page_id: PageId,
    ) -> Result<Self, BTreeError> {
        Self::validate_config(&config)?;
        Ok(Self {
            buffer_pool,
            header_page_id,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            _phantom: PhantomData,
        })
    }

    fn validate_config(config: &BTreeConfig) -> Result<(), BTreeError> {
        if config.leaf_max_size < 2 {
            return Err(BTreeError::InvalidConfig(
                "leaf_max_size must be at least 2".to_string(),
            ));
        }
        if config.internal_max_size < 3 {
            return Err(BTreeError::InvalidConfig(
                "internal_max_size must be at least 3".to_string(),
            ));
        }
        if config.leaf_max_size > leaf_capacity::<K>() {
            return Err(BTreeError::InvalidConfig(format!(
                "leaf_max_size {} exceeds page capacity {}",
                config.leaf_max_size,
                leaf_capacity::<K>()
            )));
        }
        if config.internal_max_size > internal_capacity::<K>() {
            return Err(BTreeError::InvalidConfig(format!(
                "internal_max_size {} exceeds page capacity {}",
                config.internal_max_size,
                internal_capacity::<K>()
            )));
        }
        Ok(())
    }

    /// Page id of the header page (stable for the tree's lifetime)
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Whether the tree holds no keys
    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        Ok(read_root_pointer(header.data()) == INVALID_PAGE_ID)
    }

    /// Point lookup. Descends with read-latch coupling: the child's latch is
    /// taken before the parent's is released.
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = read_root_pointer(header.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header);

        loop {
            let node: BTreeNode<K> = decode_node(guard.data())?;
            if node.is_leaf {
                return Ok(node.leaf_lookup(key));
            }
            let child = node.child_for(key);
            let child_guard = self.buffer_pool.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Allocate a fresh tree page under an exclusive latch
    pub(crate) fn allocate_node_page(&self) -> Result<(PageId, WritePageGuard), BTreeError> {
        let guard = self.buffer_pool.new_page_write()?;
        Ok((guard.page_id(), guard))
    }

    /// Rewrite the parent pointer stored on a page
    pub(crate) fn set_parent(&self, page_id: PageId, parent: PageId) -> Result<(), BTreeError> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        write_parent(guard.data_mut(), parent);
        Ok(())
    }

    /// Return a freed tree page to the buffer pool. A page an iterator still
    /// pins cannot be reclaimed here; iterators are undefined under
    /// concurrent mutation, so the page is simply left to the pool.
    pub(crate) fn free_page(&self, page_id: PageId) {
        match self.buffer_pool.delete_page(page_id) {
            Ok(()) => {}
            Err(BufferPoolError::PagePinned(_)) => {
                log::debug!("freed tree page {} still pinned; leaving it resident", page_id);
            }
            Err(e) => log::warn!("failed to free tree page {}: {}", page_id, e),
        }
    }

    /// Verify the structural invariants of the whole tree: uniform leaf
    /// depth, half-full bounds, sorted keys, separator ranges and parent
    /// pointers. Intended for tests and debugging; takes no long-lived
    /// latches beyond one page at a time.
    pub fn check_integrity(&self) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = read_root_pointer(header.data());
        drop(header);
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaf_depth = None;
        self.check_subtree(root_id, INVALID_PAGE_ID, None, None, 0, &mut leaf_depth, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<&K>,
        upper: Option<&K>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        is_root: bool,
    ) -> Result<(), BTreeError> {
        let node: BTreeNode<K> = {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            decode_node(guard.data())?
        };

        if node.page_id != page_id {
            return Err(BTreeError::Corrupted(format!(
                "page {} claims id {}",
                page_id, node.page_id
            )));
        }
        if node.parent != expected_parent {
            return Err(BTreeError::Corrupted(format!(
                "page {} has parent {}, expected {}",
                page_id, node.parent, expected_parent
            )));
        }

        let real_keys = if node.is_leaf {
            &node.keys[..]
        } else {
            &node.keys[1..]
        };
        if !real_keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(BTreeError::Corrupted(format!(
                "page {} keys are not strictly ascending",
                page_id
            )));
        }
        for key in real_keys {
            if let Some(lo) = lower {
                if key < lo {
                    return Err(BTreeError::Corrupted(format!(
                        "page {} holds a key below its subtree range",
                        page_id
                    )));
                }
            }
            if let Some(hi) = upper {
                if key >= hi {
                    return Err(BTreeError::Corrupted(format!(
                        "page {} holds a key above its subtree range",
                        page_id
                    )));
                }
            }
        }

        if node.is_leaf {
            if !is_root && node.keys.len() < node.min_size() {
                return Err(BTreeError::Corrupted(format!(
                    "leaf {} is under-full",
                    page_id
                )));
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(BTreeError::Corrupted(format!(
                        "leaf {} at depth {}, expected {}",
                        page_id, depth, expected
                    )));
                }
                _ => {}
            }
            return Ok(());
        }

        let floor = if is_root { 2 } else { node.min_size() };
        if node.children.len() < floor {
            return Err(BTreeError::Corrupted(format!(
                "internal {} is under-full",
                page_id
            )));
        }

        for (i, &child) in node.children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(&node.keys[i]) };
            let child_upper = if i + 1 < node.children.len() {
                Some(&node.keys[i + 1])
            } else {
                upper
            };
            self.check_subtree(
                child,
                page_id,
                child_lower,
                child_upper,
                depth + 1,
                leaf_depth,
                false,
            )?;
        }
        Ok(())
    }
}

/// Root pointer accessors for the header page
pub(crate) fn read_root_pointer(data: &[u8]) -> PageId {
    LittleEndian::read_u32(data)
}

pub(crate) fn write_root_pointer(data: &mut [u8], root: PageId) {
    LittleEndian::write_u32(data, root);
}
