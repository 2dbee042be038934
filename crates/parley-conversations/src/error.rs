use parley_core::PlatformError;
use parley_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("invalid conversation input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ConversationError> for PlatformError {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::NotFound(id) => PlatformError::NotFound(format!("conversation {id}")),
            ConversationError::InvalidTransition(msg) => PlatformError::InvalidStateTransition(msg),
            ConversationError::InvalidInput(msg) => PlatformError::InvalidInput(msg),
            ConversationError::Store(e) => e.into(),
            ConversationError::Serialization(e) => PlatformError::Parse(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConversationError>;
