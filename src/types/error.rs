//! Error types for codeboard

use bson::oid::ObjectId;

/// Main error type for board operations
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// Identity already applied a counted vote under this code
    #[error("Already voted on code {0}")]
    AlreadyVoted(ObjectId),

    /// Identity already submitted its one entry
    #[error("Already posted an entry")]
    AlreadyPosted,

    /// Target entry vanished between the client's view and the action
    #[error("Entry {entry_id} not found in code {code_id}")]
    EntryNotFound { code_id: ObjectId, entry_id: ObjectId },

    #[error("Code not found: {0}")]
    CodeNotFound(ObjectId),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Store timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoardError {
    /// Policy rejections go back to the requester and are not faults
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::AlreadyVoted(_) | Self::AlreadyPosted)
    }

    /// Infrastructure faults (store down or slow)
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout(_))
    }

    /// Message safe to hand to a client.
    ///
    /// Infrastructure details stay in the server log.
    pub fn client_message(&self) -> String {
        if self.is_infrastructure() {
            "Request failed, please try again".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<std::io::Error> for BoardError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<bson::oid::Error> for BoardError {
    fn from(err: bson::oid::Error) -> Self {
        Self::BadRequest(format!("Invalid id: {}", err))
    }
}

impl From<hyper::Error> for BoardError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BoardError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<mongodb::error::Error> for BoardError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for board operations
pub type Result<T> = std::result::Result<T, BoardError>;
