pub mod error;
pub mod index;
pub mod key;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::base::BTreeIndex;
pub use index::range_scan::BTreeIterator;
pub use key::IndexKey;
