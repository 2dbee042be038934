use serde::{Deserialize, Serialize};
use std::fmt;

/// Transports a contact can reach the platform on.
///
/// The lowercase string form is the wire format used by webhooks, the
/// persistence layer, and flow trigger configs alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Instagram,
    Telegram,
    Web,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Instagram => "instagram",
            Channel::Telegram => "telegram",
            Channel::Web => "web",
        }
    }

    /// All supported channels, in a fixed order (used by stats and docs).
    pub fn all() -> [Channel; 4] {
        [
            Channel::Whatsapp,
            Channel::Instagram,
            Channel::Telegram,
            Channel::Web,
        ]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(Channel::Whatsapp),
            "instagram" => Ok(Channel::Instagram),
            "telegram" => Ok(Channel::Telegram),
            "web" => Ok(Channel::Web),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Free-form string-keyed metadata attached to messages and inbound events.
///
/// Two keys are reserved: [`META_AGENT`] names the persona that produced an
/// outbound message, [`META_HUMAN_AGENT`] names the human who sent one.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Reserved metadata key: persona key that produced the outbound message.
pub const META_AGENT: &str = "agent";

/// Reserved metadata key: human agent id when a human sent the message.
pub const META_HUMAN_AGENT: &str = "human-agent";

/// Who produced the reply for an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Ai,
    Human,
}

/// A raw inbound event as delivered by a transport adapter.
///
/// Adapters verify webhook signatures and call the engine exactly once per
/// delivered message; everything past this struct is the platform's problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    /// Plain text content of the message.
    pub content: String,

    /// Platform-native identifier for the sender (phone number, chat id, …).
    pub channel_user_id: String,

    /// Transport the event arrived on.
    pub channel: Channel,

    /// Display name for the sender, when the transport provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// Transport-specific extras (message ids, media refs, …).
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl InboundEvent {
    pub fn new(content: impl Into<String>, channel_user_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            content: content.into(),
            channel_user_id: channel_user_id.into(),
            channel,
            sender_name: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }
}

/// New time-sortable record id (UUIDv7 — sortable and traceable in logs).
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
