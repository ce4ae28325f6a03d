pub mod error;
pub mod iterator;
pub mod node;
pub mod tree;

pub use error::BTreeError;
pub use iterator::BPlusTreeIterator;
pub use node::BTreeNode;
pub use tree::BPlusTree;
