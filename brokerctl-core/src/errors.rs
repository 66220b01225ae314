use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid address definition: {0}")]
    InvalidAddress(String),

    #[error("invalid byte size: {0}")]
    InvalidByteSize(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
