use chrono::{DateTime, Utc};
use parley_core::types::{new_id, Channel, Metadata};
use parley_store::Record;
use serde::{Deserialize, Serialize};

/// A person reachable on exactly one transport.
///
/// The `(channel, channel_user_id)` pair is the identity key: every lookup
/// and auto-create goes through it. Contacts are never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    pub channel: Channel,
    /// Stable foreign key on the transport (phone number, chat id, …).
    pub channel_user_id: String,

    /// No duplicates; insertion order carries no meaning.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub custom_fields: Metadata,

    /// Monotonically non-decreasing; bumped on every inbound.
    pub last_seen_at: DateTime<Utc>,
    pub conversation_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(channel_user_id: impl Into<String>, channel: Channel, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name,
            email: None,
            phone: None,
            channel,
            channel_user_id: channel_user_id.into(),
            tags: Vec::new(),
            custom_fields: Metadata::new(),
            last_seen_at: now,
            conversation_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl Record for Contact {
    fn id(&self) -> &str {
        &self.id
    }
}
