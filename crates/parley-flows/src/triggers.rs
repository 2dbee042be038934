use std::sync::Arc;

use chrono::{Local, Timelike};
use serde_json::json;
use tracing::{debug, error};

use parley_contacts::Contact;
use parley_conversations::{Conversation, Message};
use parley_core::config::BusinessHoursConfig;
use parley_core::types::Channel;
use parley_engine::{EngineEvent, EventListener};

use crate::engine::FlowEngine;
use crate::types::{Flow, TriggerKind};

/// Bridges engine events (and cron fires) onto flow executions.
///
/// Subscribed on the engine's bus; each event is mapped to its trigger
/// kind(s), matching active flows are filtered by their trigger config,
/// and executions run on a fresh task so publication never stalls.
pub struct TriggerManager {
    engine: Arc<FlowEngine>,
    business_hours: BusinessHoursConfig,
}

impl TriggerManager {
    pub fn new(engine: Arc<FlowEngine>, business_hours: BusinessHoursConfig) -> Arc<Self> {
        Arc::new(Self {
            engine,
            business_hours,
        })
    }

    /// Execute every active flow of `kind` whose filters accept the event.
    pub async fn fire(
        &self,
        kind: TriggerKind,
        context: serde_json::Value,
        content: Option<&str>,
        channel: Option<Channel>,
    ) {
        let flows = match self.engine.active_flows(kind).await {
            Ok(flows) => flows,
            Err(e) => {
                error!(error = %e, "could not list active flows for trigger");
                return;
            }
        };

        for flow in flows {
            if !self.matches(&flow, kind, content, channel) {
                continue;
            }
            debug!(flow_id = %flow.id, trigger = ?kind, "trigger matched; executing flow");
            if let Err(e) = self.engine.execute(&flow.id, context.clone()).await {
                error!(flow_id = %flow.id, error = %e, "triggered flow execution failed");
            }
        }
    }

    fn matches(
        &self,
        flow: &Flow,
        kind: TriggerKind,
        content: Option<&str>,
        channel: Option<Channel>,
    ) -> bool {
        let config = &flow.trigger_config;

        if let Some(required) = config.get("channel").and_then(|v| v.as_str()) {
            match channel {
                Some(ch) if ch.as_str() == required => {}
                _ => return false,
            }
        }

        if config
            .get("outside-business-hours")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            let hour = Local::now().hour();
            if !is_outside_business_hours(hour, &self.business_hours) {
                return false;
            }
        }

        if kind == TriggerKind::KeywordDetected {
            let Some(content) = content else { return false };
            let lowered = content.to_lowercase();
            let matched = config
                .get("keywords")
                .and_then(|v| v.as_array())
                .map(|keys| {
                    keys.iter()
                        .filter_map(|k| k.as_str())
                        .any(|k| lowered.contains(&k.to_lowercase()))
                })
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }

        true
    }

    fn spawn_fires(&self, fires: Vec<PendingFire>) {
        let worker = TriggerManager {
            engine: Arc::clone(&self.engine),
            business_hours: self.business_hours.clone(),
        };
        tokio::spawn(async move {
            for fire in fires {
                worker
                    .fire(fire.kind, fire.context, fire.content.as_deref(), fire.channel)
                    .await;
            }
        });
    }
}

struct PendingFire {
    kind: TriggerKind,
    context: serde_json::Value,
    content: Option<String>,
    channel: Option<Channel>,
}

/// Inclusive start hour, exclusive end hour.
fn is_outside_business_hours(hour: u32, config: &BusinessHoursConfig) -> bool {
    hour < config.start_hour || hour >= config.end_hour
}

fn event_context(
    trigger: &str,
    message: Option<&Message>,
    conversation: &Conversation,
    contact: &Contact,
) -> serde_json::Value {
    json!({
        "trigger": trigger,
        "content": message.map(|m| m.content.clone()),
        "channel": conversation.channel,
        "conversationId": conversation.id,
        "contactId": contact.id,
        "channelUserId": contact.channel_user_id,
        "contact": {
            "name": contact.name,
            "tags": contact.tags,
            "conversationCount": contact.conversation_count,
        },
    })
}

impl EventListener for TriggerManager {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        match event {
            EngineEvent::MessageIncoming {
                message,
                conversation,
                contact,
            } => {
                let context =
                    event_context("message-received", Some(message), conversation, contact);
                self.spawn_fires(vec![
                    PendingFire {
                        kind: TriggerKind::MessageReceived,
                        context: context.clone(),
                        content: Some(message.content.clone()),
                        channel: Some(conversation.channel),
                    },
                    PendingFire {
                        kind: TriggerKind::KeywordDetected,
                        context,
                        content: Some(message.content.clone()),
                        channel: Some(conversation.channel),
                    },
                ]);
            }

            EngineEvent::ConversationStarted {
                conversation,
                contact,
            } => {
                let context = event_context("conversation-started", None, conversation, contact);
                let mut fires = vec![PendingFire {
                    kind: TriggerKind::ConversationStarted,
                    context: context.clone(),
                    content: None,
                    channel: Some(conversation.channel),
                }];
                // A contact's very first conversation doubles as the
                // contact-created signal.
                if contact.conversation_count <= 1 {
                    fires.push(PendingFire {
                        kind: TriggerKind::ContactCreated,
                        context,
                        content: None,
                        channel: Some(conversation.channel),
                    });
                }
                self.spawn_fires(fires);
            }

            EngineEvent::ConversationClosed {
                conversation,
                contact,
            } => {
                let context = event_context("conversation-closed", None, conversation, contact);
                self.spawn_fires(vec![PendingFire {
                    kind: TriggerKind::ConversationClosed,
                    context,
                    content: None,
                    channel: Some(conversation.channel),
                }]);
            }

            EngineEvent::ConversationHandoff {
                conversation,
                contact,
                reason,
            } => {
                let mut context = event_context("handoff-resolved", None, conversation, contact);
                context["reason"] = json!(reason);
                self.spawn_fires(vec![PendingFire {
                    kind: TriggerKind::HandoffResolved,
                    context,
                    content: None,
                    channel: Some(conversation.channel),
                }]);
            }

            EngineEvent::MessageOutgoing { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_hours_boundaries() {
        let cfg = BusinessHoursConfig {
            start_hour: 9,
            end_hour: 18,
        };
        assert!(is_outside_business_hours(8, &cfg));
        assert!(!is_outside_business_hours(9, &cfg)); // inclusive start
        assert!(!is_outside_business_hours(17, &cfg));
        assert!(is_outside_business_hours(18, &cfg)); // exclusive end
        assert!(is_outside_business_hours(23, &cfg));
    }
}
