pub mod engine;
pub mod events;
pub mod queue;

pub use engine::{ConversationEngine, EngineDeps, HandleOutcome};
pub use events::{EngineEvent, EventBus, EventKind, EventListener};
pub use queue::SerialQueue;
