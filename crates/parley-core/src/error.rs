use thiserror::Error;

/// Platform-level error vocabulary.
///
/// Component crates define their own error enums and convert into this one
/// at the choreography boundary; the gateway maps `code()` onto HTTP status.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("external failure ({source_name}): {reason}")]
    ExternalFailure { source_name: String, reason: String },

    #[error("timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Short stable error code string for API responses and log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            PlatformError::NotFound(_) => "NOT_FOUND",
            PlatformError::InvalidInput(_) => "INVALID_INPUT",
            PlatformError::InvalidStateTransition(_) => "INVALID_STATE",
            PlatformError::ExternalFailure { .. } => "EXTERNAL_FAILURE",
            PlatformError::Timeout { .. } => "TIMEOUT",
            PlatformError::Parse(_) => "PARSE_FAILURE",
            PlatformError::Cancelled => "CANCELLED",
            PlatformError::Config(_) => "CONFIG_ERROR",
            PlatformError::Storage(_) => "STORAGE_ERROR",
            PlatformError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn external(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        PlatformError::ExternalFailure {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(e: serde_json::Error) -> Self {
        PlatformError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
