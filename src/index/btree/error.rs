use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Node does not fit on a page")]
    NodeTooLarge,

    #[error("Key serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid node format on page")]
    InvalidNodeFormat,

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
