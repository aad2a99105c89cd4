use engram_core::ValidationError;

/// Engine error taxonomy. Single-row lookups that can legitimately miss
/// return `Option` instead of [`StoreError::MemoryNotFound`]; the error
/// variants cover operations where absence is a caller mistake.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),
    #[error("memory not found: {0}")]
    MemoryNotFound(String),
    #[error("link not found: {from_id} -> {to_id}")]
    LinkNotFound { from_id: String, to_id: String },
    /// Unique-key or foreign-key violation surfaced by the store. Fatal to
    /// the enclosing batch transaction.
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("storage error: {0}")]
    Storage(rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Integrity(message.clone().unwrap_or_else(|| code.to_string()))
            }
            _ => Self::Storage(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
