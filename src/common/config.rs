use std::time::Duration;

/// Buffer pool sizing knobs
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool
    pub pool_size: usize,
    /// LRU-K history depth
    pub replacer_k: usize,
    /// Extendible hash bucket capacity for the page table
    pub bucket_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
            bucket_size: 4,
        }
    }
}

/// B+-tree fan-out knobs
#[derive(Debug, Clone)]
pub struct BTreeConfig {
    /// Maximum number of (key, rid) pairs in a leaf page
    pub leaf_max_size: usize,
    /// Maximum number of child pointers in an internal page
    pub internal_max_size: usize,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            leaf_max_size: 64,
            internal_max_size: 64,
        }
    }
}

/// Lock manager knobs
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Deadlock detection scan period
    pub cycle_detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}
