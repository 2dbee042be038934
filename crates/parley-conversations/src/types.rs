use chrono::{DateTime, Utc};
use parley_core::types::{new_id, Channel, Metadata};
use parley_store::Record;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a conversation.
///
/// `Closed` is the only terminal state; everything else counts as open,
/// and a contact holds at most one open conversation at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationStatus {
    Active,
    Waiting,
    Handoff,
    HumanActive,
    Paused,
    Closed,
}

impl ConversationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversationStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Waiting => "waiting",
            ConversationStatus::Handoff => "handoff",
            ConversationStatus::HumanActive => "human-active",
            ConversationStatus::Paused => "paused",
            ConversationStatus::Closed => "closed",
        }
    }

    pub fn all() -> [ConversationStatus; 6] {
        [
            ConversationStatus::Active,
            ConversationStatus::Waiting,
            ConversationStatus::Handoff,
            ConversationStatus::HumanActive,
            ConversationStatus::Paused,
            ConversationStatus::Closed,
        ]
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "waiting" => Ok(ConversationStatus::Waiting),
            "handoff" => Ok(ConversationStatus::Handoff),
            "human-active" => Ok(ConversationStatus::HumanActive),
            "paused" => Ok(ConversationStatus::Paused),
            "closed" => Ok(ConversationStatus::Closed),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Button,
    Template,
    System,
}

/// A single message inside a conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub contact_id: String,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub channel: Channel,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: impl Into<String>,
        contact_id: impl Into<String>,
        direction: Direction,
        content: impl Into<String>,
        channel: Channel,
    ) -> Self {
        Self {
            id: new_id(),
            conversation_id: conversation_id.into(),
            contact_id: contact_id.into(),
            direction,
            message_type: MessageType::Text,
            content: content.into(),
            channel,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }
}

/// Rolling analysis of a conversation, shallow-merged on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// 0–100; maintained by the sales persona's stage machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_score: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Metadata,
}

/// A durable conversation owned by exactly one contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub contact_id: String,
    pub channel: Channel,
    pub status: ConversationStatus,

    /// Persona key currently serving this conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_agent_id: Option<String>,
    /// Set whenever status is human-active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_agent_id: Option<String>,

    /// Append-only; timestamps strictly increase within a conversation.
    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub context: ConversationContext,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Reserved service-window metadata; no core behavior consumes these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_window_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_window_expires: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(contact_id: impl Into<String>, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            contact_id: contact_id.into(),
            channel,
            status: ConversationStatus::Active,
            current_agent_id: None,
            human_agent_id: None,
            messages: Vec::new(),
            context: ConversationContext::default(),
            started_at: now,
            updated_at: now,
            entry_point: None,
            service_window_start: None,
            service_window_expires: None,
        }
    }

    /// Count of inbound messages (one per customer turn).
    pub fn inbound_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_inbound()).count()
    }

    /// The trailing inbound messages, newest last, up to `n`.
    pub fn last_inbound(&self, n: usize) -> Vec<&Message> {
        let mut inbound: Vec<&Message> = self.messages.iter().filter(|m| m.is_inbound()).collect();
        let start = inbound.len().saturating_sub(n);
        inbound.split_off(start)
    }
}

impl Record for Conversation {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Filters for [`ConversationRegistry::find`](crate::ConversationRegistry::find).
#[derive(Debug, Clone, Default)]
pub struct ConversationFilters {
    pub status: Option<ConversationStatus>,
    pub channel: Option<Channel>,
    pub current_agent_id: Option<String>,
    pub contact_id: Option<String>,
    pub started_before: Option<DateTime<Utc>>,
    pub started_after: Option<DateTime<Utc>>,
}
