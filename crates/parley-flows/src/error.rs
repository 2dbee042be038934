use parley_core::PlatformError;
use parley_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("flow is not active: {0}")]
    Inactive(String),

    #[error("invalid flow input: {0}")]
    InvalidInput(String),

    #[error("invalid cron schedule `{expression}`: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("webhook failed: {0}")]
    Webhook(String),

    #[error("action failed: {0}")]
    Action(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<FlowError> for PlatformError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::FlowNotFound(id) => PlatformError::NotFound(format!("flow {id}")),
            FlowError::ExecutionNotFound(id) => {
                PlatformError::NotFound(format!("execution {id}"))
            }
            FlowError::Inactive(id) => {
                PlatformError::InvalidStateTransition(format!("flow {id} is not active"))
            }
            FlowError::InvalidInput(msg) => PlatformError::InvalidInput(msg),
            FlowError::InvalidSchedule { expression, reason } => {
                PlatformError::InvalidInput(format!("bad cron `{expression}`: {reason}"))
            }
            FlowError::Webhook(msg) => PlatformError::external("webhook", msg),
            FlowError::Action(msg) => PlatformError::Internal(msg),
            FlowError::Store(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
