use chrono::{DateTime, Utc};
use parley_core::types::{new_id, Metadata};
use parley_store::Record;
use serde::{Deserialize, Serialize};

/// What makes a flow fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    MessageReceived,
    KeywordDetected,
    TagAdded,
    ConversationStarted,
    ConversationClosed,
    Scheduled,
    ContactCreated,
    HandoffResolved,
    CustomWebhook,
}

/// The side effect a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    SendMessage,
    SendImage,
    AddTag,
    RemoveTag,
    AssignAgent,
    Wait,
    Webhook,
    UpdateContact,
    StartConversation,
    CloseConversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Gt,
    Lt,
    Exists,
}

/// A guard on a step: `field` is a dotted path into the execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// An action plus its kind-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub config: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    pub id: String,
    pub action: FlowAction,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Overrides the sequential successor after this step runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
}

impl FlowStep {
    pub fn new(action: FlowAction) -> Self {
        Self {
            id: new_id(),
            action,
            conditions: Vec::new(),
            next_step_id: None,
        }
    }
}

/// A declarative automation: trigger + ordered steps. Only active flows fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub trigger: TriggerKind,
    /// Kind-specific filters (`keywords`, `cron`, `channel`, …).
    #[serde(default)]
    pub trigger_config: Metadata,
    pub steps: Vec<FlowStep>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(name: impl Into<String>, trigger: TriggerKind, steps: Vec<FlowStep>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            trigger,
            trigger_config: Metadata::new(),
            steps,
            active: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}

impl Record for Flow {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One run of a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowExecution {
    pub id: String,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    pub status: ExecutionStatus,
    /// The step the execution is at (or will resume at after a wait).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    /// Free-form data conditions and webhooks read.
    pub context: serde_json::Value,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FlowExecution {
    pub fn new(flow_id: impl Into<String>, context: serde_json::Value) -> Self {
        let conversation_id = context
            .get("conversationId")
            .and_then(|v| v.as_str())
            .map(String::from);
        let contact_id = context
            .get("contactId")
            .and_then(|v| v.as_str())
            .map(String::from);
        Self {
            id: new_id(),
            flow_id: flow_id.into(),
            conversation_id,
            contact_id,
            status: ExecutionStatus::Running,
            current_step_id: None,
            context,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

impl Record for FlowExecution {
    fn id(&self) -> &str {
        &self.id
    }
}
