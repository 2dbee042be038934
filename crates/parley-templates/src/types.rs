use chrono::{DateTime, Utc};
use parley_core::types::{new_id, Channel};
use parley_store::Record;
use serde::{Deserialize, Serialize};

/// WhatsApp templates need provider approval before use; other channels
/// are approved from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A named message template with `{variable}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub content: String,
    /// Declared placeholder names, first-occurrence order.
    pub variables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    pub approval_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn new(
        name: impl Into<String>,
        content: impl Into<String>,
        variables: Vec<String>,
        channel: Option<Channel>,
    ) -> Self {
        let now = Utc::now();
        let approval_status = match channel {
            Some(Channel::Whatsapp) => ApprovalStatus::Pending,
            _ => ApprovalStatus::Approved,
        };
        Self {
            id: new_id(),
            name: name.into(),
            content: content.into(),
            variables,
            channel,
            approval_status,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for Template {
    fn id(&self) -> &str {
        &self.id
    }
}
