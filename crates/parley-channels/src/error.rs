use parley_core::types::Channel;
use parley_core::PlatformError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no adapter registered for channel: {0}")]
    NotRegistered(Channel),

    #[error("send failed on {channel}: {reason}")]
    Send { channel: Channel, reason: String },

    #[error("webhook payload unparseable: {0}")]
    Parse(String),
}

impl From<ChannelError> for PlatformError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::NotRegistered(ch) => {
                PlatformError::NotFound(format!("channel adapter {ch}"))
            }
            ChannelError::Send { channel, reason } => {
                PlatformError::external(channel.as_str(), reason)
            }
            ChannelError::Parse(msg) => PlatformError::Parse(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
