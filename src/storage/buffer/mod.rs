pub mod error;
pub mod guard;
pub mod manager;
pub mod page_table;
pub mod replacer;

pub use error::BufferPoolError;
pub use guard::{PageGuard, ReadPageGuard, WritePageGuard};
pub use manager::BufferPoolManager;
pub use page_table::ExtendibleHashTable;
pub use replacer::LruKReplacer;
