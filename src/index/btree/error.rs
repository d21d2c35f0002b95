use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Page {0} does not hold a valid tree node")]
    InvalidPageFormat(PageId),

    #[error("Node does not fit in a page")]
    NodeTooLarge,

    #[error("Invalid tree configuration: {0}")]
    InvalidConfig(String),

    #[error("Tree structure corrupted: {0}")]
    Corrupted(String),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
