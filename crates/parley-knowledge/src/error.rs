use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// The corpus root directory is missing or unreadable.
    #[error("knowledge root not readable: {0}")]
    RootUnreadable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;
