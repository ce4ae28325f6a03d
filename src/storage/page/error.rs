use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Insufficient space on page")]
    InsufficientSpace,

    #[error("Invalid slot: {0}")]
    InvalidSlot(u32),

    #[error("Record already deleted")]
    RecordDeleted,

    #[error("Record name too long: {0}")]
    NameTooLong(String),
}
