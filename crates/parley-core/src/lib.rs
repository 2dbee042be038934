pub mod config;
pub mod error;
pub mod types;

pub use config::ParleyConfig;
pub use error::{PlatformError, Result};
pub use types::{AgentType, Channel, InboundEvent, Metadata};
