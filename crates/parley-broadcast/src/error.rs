use parley_core::PlatformError;
use parley_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast not found: {0}")]
    NotFound(String),

    #[error("broadcast {id} cannot be sent from status {status}")]
    NotSendable { id: String, status: String },

    #[error("invalid broadcast input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<BroadcastError> for PlatformError {
    fn from(e: BroadcastError) -> Self {
        match e {
            BroadcastError::NotFound(id) => PlatformError::NotFound(format!("broadcast {id}")),
            BroadcastError::NotSendable { id, status } => PlatformError::InvalidStateTransition(
                format!("broadcast {id} is {status}"),
            ),
            BroadcastError::InvalidInput(msg) => PlatformError::InvalidInput(msg),
            BroadcastError::Store(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BroadcastError>;
