use parley_core::PlatformError;
use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("unknown persona: {0}")]
    UnknownPersona(String),

    #[error("internal agent error: {0}")]
    Internal(String),
}

impl From<AgentError> for PlatformError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Llm(LlmError::Parse(msg)) => PlatformError::Parse(msg),
            AgentError::Llm(err) => PlatformError::external("llm", err.to_string()),
            AgentError::UnknownPersona(key) => PlatformError::NotFound(format!("persona {key}")),
            AgentError::Internal(msg) => PlatformError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
