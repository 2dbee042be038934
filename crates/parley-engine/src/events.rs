use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use parley_contacts::Contact;
use parley_conversations::{Conversation, Message};

/// Everything the engine announces to the rest of the system.
///
/// One enum, variant-specific payloads — subscribers match on what they
/// care about and ignore the rest.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ConversationStarted {
        conversation: Conversation,
        contact: Contact,
    },
    ConversationClosed {
        conversation: Conversation,
        contact: Contact,
    },
    ConversationHandoff {
        conversation: Conversation,
        contact: Contact,
        reason: String,
    },
    MessageIncoming {
        message: Message,
        conversation: Conversation,
        contact: Contact,
    },
    MessageOutgoing {
        message: Message,
        conversation: Conversation,
        contact: Contact,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConversationStarted,
    ConversationClosed,
    ConversationHandoff,
    MessageIncoming,
    MessageOutgoing,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::ConversationStarted { .. } => EventKind::ConversationStarted,
            EngineEvent::ConversationClosed { .. } => EventKind::ConversationClosed,
            EngineEvent::ConversationHandoff { .. } => EventKind::ConversationHandoff,
            EngineEvent::MessageIncoming { .. } => EventKind::MessageIncoming,
            EngineEvent::MessageOutgoing { .. } => EventKind::MessageOutgoing,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::ConversationStarted => "conversation:started",
            EventKind::ConversationClosed => "conversation:closed",
            EventKind::ConversationHandoff => "conversation:handoff",
            EventKind::MessageIncoming => "message:incoming",
            EventKind::MessageOutgoing => "message:outgoing",
        };
        f.write_str(s)
    }
}

/// A subscriber. Errors are logged by the bus and never reach the producer.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()>;
}

/// Synchronous pub/sub for [`EngineEvent`]s.
///
/// Publication walks subscribers in registration order on the caller's
/// task; a failing subscriber is logged and skipped.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(String, Arc<dyn EventListener>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, name: impl Into<String>, listener: Arc<dyn EventListener>) {
        let name = name.into();
        debug!(subscriber = %name, "event subscriber registered");
        self.listeners
            .write()
            .expect("event bus poisoned")
            .push((name, listener));
    }

    /// Remove a subscriber by name. No-op when absent.
    pub fn unsubscribe(&self, name: &str) {
        self.listeners
            .write()
            .expect("event bus poisoned")
            .retain(|(n, _)| n != name);
    }

    pub fn publish(&self, event: &EngineEvent) {
        let listeners = self.listeners.read().expect("event bus poisoned").clone();
        for (name, listener) in listeners {
            if let Err(e) = listener.on_event(event) {
                warn!(
                    subscriber = %name,
                    event = %event.kind(),
                    error = %e,
                    "event subscriber failed; continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::Channel;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    impl EventListener for Recorder {
        fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.kind());
            Ok(())
        }
    }

    struct Failing;

    impl EventListener for Failing {
        fn on_event(&self, _event: &EngineEvent) -> anyhow::Result<()> {
            anyhow::bail!("subscriber exploded")
        }
    }

    fn started_event() -> EngineEvent {
        let contact = Contact::new("+1", Channel::Web, None);
        let conversation = Conversation::new(&contact.id, Channel::Web);
        EngineEvent::ConversationStarted {
            conversation,
            contact,
        }
    }

    #[test]
    fn failing_subscriber_does_not_stop_the_rest() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe("failing", Arc::new(Failing));
        bus.subscribe("recorder", Arc::clone(&recorder) as Arc<dyn EventListener>);

        bus.publish(&started_event());

        assert_eq!(
            recorder.seen.lock().unwrap().as_slice(),
            &[EventKind::ConversationStarted]
        );
    }

    #[test]
    fn unsubscribe_removes_by_name() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe("recorder", Arc::clone(&recorder) as Arc<dyn EventListener>);
        bus.unsubscribe("recorder");

        bus.publish(&started_event());
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
