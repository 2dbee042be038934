use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use parley_channels::ChannelManager;
use parley_contacts::ContactRegistry;
use parley_conversations::ConversationRegistry;
use parley_core::config::DEFAULT_WEBHOOK_TIMEOUT_SECS;
use parley_core::types::Channel;

use crate::error::{FlowError, Result};
use crate::types::{ActionKind, Flow, FlowExecution, FlowStep};

/// What a step's action tells the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Suspend the execution; the delay handler resumes it later.
    Wait { delay_ms: u64 },
}

/// Executes one step's side effect against the owning collaborator.
pub struct ActionRunner {
    channels: Arc<ChannelManager>,
    contacts: Arc<ContactRegistry>,
    conversations: Arc<ConversationRegistry>,
    http: reqwest::Client,
}

impl ActionRunner {
    pub fn new(
        channels: Arc<ChannelManager>,
        contacts: Arc<ContactRegistry>,
        conversations: Arc<ConversationRegistry>,
    ) -> Self {
        Self {
            channels,
            contacts,
            conversations,
            http: reqwest::Client::new(),
        }
    }

    #[instrument(skip_all, fields(flow_id = %flow.id, step_id = %step.id, kind = ?step.action.kind))]
    pub async fn run(
        &self,
        flow: &Flow,
        execution: &FlowExecution,
        step: &FlowStep,
    ) -> Result<StepOutcome> {
        let config = &step.action.config;
        match step.action.kind {
            ActionKind::SendMessage => {
                let message = config_str(config, "message")
                    .ok_or_else(|| FlowError::InvalidInput("send-message requires `message`".into()))?;
                let (channel, to) = self.delivery_target(execution, config).await?;
                self.channels
                    .send_message(channel, &to, message)
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                Ok(StepOutcome::Continue)
            }

            ActionKind::SendImage => {
                let url = config_str(config, "url")
                    .ok_or_else(|| FlowError::InvalidInput("send-image requires `url`".into()))?;
                let caption = config_str(config, "caption");
                let (channel, to) = self.delivery_target(execution, config).await?;
                self.channels
                    .send_image(channel, &to, url, caption)
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                Ok(StepOutcome::Continue)
            }

            ActionKind::AddTag => {
                let tag = config_str(config, "tag")
                    .ok_or_else(|| FlowError::InvalidInput("add-tag requires `tag`".into()))?;
                let contact_id = self.required_contact(execution)?;
                self.contacts
                    .add_tag(&contact_id, tag)
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                Ok(StepOutcome::Continue)
            }

            ActionKind::RemoveTag => {
                let tag = config_str(config, "tag")
                    .ok_or_else(|| FlowError::InvalidInput("remove-tag requires `tag`".into()))?;
                let contact_id = self.required_contact(execution)?;
                self.contacts
                    .remove_tag(&contact_id, tag)
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                Ok(StepOutcome::Continue)
            }

            ActionKind::UpdateContact => {
                let fields = config
                    .get("fields")
                    .cloned()
                    .ok_or_else(|| FlowError::InvalidInput("update-contact requires `fields`".into()))?;
                let contact_id = self.required_contact(execution)?;
                self.contacts
                    .update(&contact_id, fields)
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                Ok(StepOutcome::Continue)
            }

            ActionKind::AssignAgent => {
                let agent = config_str(config, "agentId")
                    .ok_or_else(|| FlowError::InvalidInput("assign-agent requires `agentId`".into()))?;
                let conversation_id = self.required_conversation(execution)?;
                self.conversations
                    .update_agent(&conversation_id, Some(agent))
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                Ok(StepOutcome::Continue)
            }

            ActionKind::CloseConversation => {
                let reason = config_str(config, "reason").unwrap_or("closed by flow");
                let conversation_id = self.required_conversation(execution)?;
                self.conversations
                    .close(&conversation_id, reason)
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                Ok(StepOutcome::Continue)
            }

            ActionKind::StartConversation => {
                let contact_id = self.required_contact(execution)?;
                let contact = self
                    .contacts
                    .get(&contact_id)
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                let channel = config_str(config, "channel")
                    .and_then(|c| Channel::from_str(c).ok())
                    .unwrap_or(contact.channel);
                self.conversations
                    .start(&contact_id, channel)
                    .await
                    .map_err(|e| FlowError::Action(e.to_string()))?;
                Ok(StepOutcome::Continue)
            }

            ActionKind::Wait => {
                let duration = config
                    .get("duration")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| FlowError::InvalidInput("wait requires numeric `duration`".into()))?;
                let unit = config_str(config, "unit").unwrap_or("seconds");
                Ok(StepOutcome::Wait {
                    delay_ms: wait_to_ms(duration, unit),
                })
            }

            ActionKind::Webhook => {
                let url = config_str(config, "url")
                    .ok_or_else(|| FlowError::InvalidInput("webhook requires `url`".into()))?;
                let timeout = config
                    .get("timeoutSecs")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS);

                let body = serde_json::json!({
                    "flowId": flow.id,
                    "conversationId": execution.conversation_id,
                    "contactId": execution.contact_id,
                    "data": execution.context,
                    "timestamp": Utc::now(),
                });

                let response = self
                    .http
                    .post(url)
                    .timeout(std::time::Duration::from_secs(timeout))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| FlowError::Webhook(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(FlowError::Webhook(format!(
                        "{} returned {}",
                        url,
                        response.status()
                    )));
                }
                debug!(url, "webhook delivered");
                Ok(StepOutcome::Continue)
            }
        }
    }

    /// Channel + recipient for send actions: explicit config wins, then the
    /// execution context's `channel`/`channelUserId`, then the contact.
    async fn delivery_target(
        &self,
        execution: &FlowExecution,
        config: &parley_core::types::Metadata,
    ) -> Result<(Channel, String)> {
        if let (Some(channel), Some(to)) = (
            config_str(config, "channel").and_then(|c| Channel::from_str(c).ok()),
            config_str(config, "to"),
        ) {
            return Ok((channel, to.to_string()));
        }

        let ctx = &execution.context;
        if let (Some(channel), Some(to)) = (
            ctx.get("channel")
                .and_then(|v| v.as_str())
                .and_then(|c| Channel::from_str(c).ok()),
            ctx.get("channelUserId").and_then(|v| v.as_str()),
        ) {
            return Ok((channel, to.to_string()));
        }

        let contact_id = self.required_contact(execution)?;
        let contact = self
            .contacts
            .get(&contact_id)
            .await
            .map_err(|e| FlowError::Action(e.to_string()))?;
        Ok((contact.channel, contact.channel_user_id))
    }

    fn required_contact(&self, execution: &FlowExecution) -> Result<String> {
        execution
            .contact_id
            .clone()
            .ok_or_else(|| FlowError::InvalidInput("step requires a contact in context".into()))
    }

    fn required_conversation(&self, execution: &FlowExecution) -> Result<String> {
        execution
            .conversation_id
            .clone()
            .ok_or_else(|| FlowError::InvalidInput("step requires a conversation in context".into()))
    }
}

fn config_str<'a>(config: &'a parley_core::types::Metadata, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

/// seconds/minutes/hours/days → milliseconds; unknown units read as seconds.
pub fn wait_to_ms(duration: u64, unit: &str) -> u64 {
    let per_unit = match unit {
        "minutes" => 60_000,
        "hours" => 3_600_000,
        "days" => 86_400_000,
        "seconds" => 1_000,
        _ => 1_000,
    };
    duration.saturating_mul(per_unit)
}
