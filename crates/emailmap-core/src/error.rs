use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    #[error("Document store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed document {name}: {reason}")]
    MalformedDocument { name: String, reason: String },

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether redelivering the same invocation can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Malformed trigger payload: {0}")]
    MalformedEvent(String),

    #[error("Index commit failed: {0}")]
    Store(#[from] StoreError),
}
