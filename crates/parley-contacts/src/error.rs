use parley_core::PlatformError;
use parley_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("contact not found: {0}")]
    NotFound(String),

    #[error("invalid contact input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ContactError> for PlatformError {
    fn from(e: ContactError) -> Self {
        match e {
            ContactError::NotFound(id) => PlatformError::NotFound(format!("contact {id}")),
            ContactError::InvalidInput(msg) => PlatformError::InvalidInput(msg),
            ContactError::Store(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ContactError>;
