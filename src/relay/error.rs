// Error taxonomy for the relay core

use thiserror::Error;

/// Errors raised by the history store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("history encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by routing, registration and request validation
#[derive(Debug, Error)]
pub enum RelayError {
    /// Caller supplied missing or unknown attributes; nothing was mutated
    #[error("{0}")]
    Validation(String),

    /// An inbound frame could not be decoded
    #[error("Invalid message format")]
    Decode(#[source] serde_json::Error),

    /// A recipient's outbound queue is closed
    #[error("delivery to session {0} failed: connection closed")]
    Delivery(String),

    /// The history append failed; the route call as a whole failed
    #[error("failed to persist history: {0}")]
    Persistence(#[from] StoreError),

    #[error("message broker is not running")]
    BrokerUnavailable,
}

impl RelayError {
    /// Whether the error is the caller's fault (maps to a 4xx response)
    pub fn is_client_error(&self) -> bool {
        matches!(self, RelayError::Validation(_) | RelayError::Decode(_))
    }
}
