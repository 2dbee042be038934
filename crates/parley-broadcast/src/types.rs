use chrono::{DateTime, Utc};
use parley_core::types::{new_id, Channel};
use parley_store::Record;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Cancelled,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Draft => "draft",
            BroadcastStatus::Scheduled => "scheduled",
            BroadcastStatus::Sending => "sending",
            BroadcastStatus::Completed => "completed",
            BroadcastStatus::Cancelled => "cancelled",
        }
    }
}

/// Persistable part of the target filter. The optional caller-supplied
/// predicate applies at creation time only and is not stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    /// Every listed tag must be present on the contact.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A one-shot bulk outbound send to a filtered contact set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub id: String,
    pub name: String,
    pub content: String,
    /// "text" or "image" (content is the image URL for the latter).
    pub message_type: String,
    pub target: BroadcastTarget,

    /// Snapshot of matching contact ids, in registry order, taken at
    /// creation. The send loop walks exactly this list.
    pub recipient_ids: Vec<String>,

    pub total_recipients: u32,
    pub sent_count: u32,
    pub delivered_count: u32,
    pub failed_count: u32,

    pub status: BroadcastStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Broadcast {
    pub fn new(name: impl Into<String>, content: impl Into<String>, target: BroadcastTarget) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            content: content.into(),
            message_type: "text".to_string(),
            target,
            recipient_ids: Vec::new(),
            total_recipients: 0,
            sent_count: 0,
            delivered_count: 0,
            failed_count: 0,
            status: BroadcastStatus::Draft,
            scheduled_for: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

impl Record for Broadcast {
    fn id(&self) -> &str {
        &self.id
    }
}
