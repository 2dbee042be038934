pub mod adapter;
pub mod error;
pub mod manager;
pub mod types;
pub mod web;
pub mod webhook;

pub use adapter::ChannelAdapter;
pub use error::{ChannelError, Result};
pub use manager::ChannelManager;
pub use types::{Button, OutboundContent, OutboundRecord};
pub use web::WebChannel;
