use thiserror::Error;

pub type SiltResult<T, E = SiltError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum SiltError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Invalid transaction state: {0}")]
    State(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
