pub mod error;
pub mod registry;
pub mod types;
pub mod window;

pub use error::{ConversationError, Result};
pub use registry::ConversationRegistry;
pub use types::{
    Conversation, ConversationContext, ConversationFilters, ConversationStatus, Direction,
    Message, MessageType,
};
pub use window::{build_window, ContextWindow};
