use parley_core::PlatformError;
use parley_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("invalid template input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TemplateError> for PlatformError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::NotFound(id) => PlatformError::NotFound(format!("template {id}")),
            TemplateError::InvalidInput(msg) => PlatformError::InvalidInput(msg),
            TemplateError::Store(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;
