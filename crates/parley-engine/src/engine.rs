use std::sync::Arc;

use tracing::{info, instrument, warn};

use parley_agents::{AgentAction, AgentOrchestrator, RoutingDecision};
use parley_channels::ChannelManager;
use parley_contacts::{Contact, ContactRegistry};
use parley_conversations::{
    build_window, Conversation, ConversationRegistry, ConversationStatus, Direction, Message,
};
use parley_core::types::{AgentType, InboundEvent, META_AGENT, META_HUMAN_AGENT};
use parley_core::{PlatformError, Result};

use crate::events::{EngineEvent, EventBus};
use crate::queue::SerialQueue;

/// Everything the engine choreographs over.
pub struct EngineDeps {
    pub contacts: Arc<ContactRegistry>,
    pub conversations: Arc<ConversationRegistry>,
    pub orchestrator: Arc<AgentOrchestrator>,
    pub channels: Arc<ChannelManager>,
    pub bus: Arc<EventBus>,
    /// Token budget for the context window handed to the orchestrator.
    pub context_tokens: usize,
}

/// Result of one inbound event, returned to the transport seam.
#[derive(Debug, Clone)]
pub struct HandleOutcome {
    /// The appended outbound message, when a reply was produced.
    pub outgoing: Option<Message>,
    pub conversation: Conversation,
    pub contact: Contact,
    pub routing: Option<RoutingDecision>,
    pub agent_type: AgentType,
}

struct Job {
    raw: InboundEvent,
    contact: Contact,
    conversation_id: String,
    just_started: bool,
}

/// The single entry point for inbound traffic.
///
/// Binds a raw event to a durable conversation, guarantees per-conversation
/// serial processing through a keyed queue, delegates the turn to the
/// orchestrator over a bounded context window, and publishes lifecycle
/// events along the way.
pub struct ConversationEngine {
    deps: Arc<EngineDeps>,
    queue: SerialQueue<Job, HandleOutcome>,
}

impl ConversationEngine {
    pub fn new(deps: EngineDeps) -> Self {
        let deps = Arc::new(deps);
        let worker_deps = Arc::clone(&deps);
        let queue = SerialQueue::new(move |job: Job| {
            let deps = Arc::clone(&worker_deps);
            Box::pin(async move { process_turn(deps, job).await })
                as futures_util::future::BoxFuture<'static, Result<HandleOutcome>>
        });
        Self { deps, queue }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.deps.bus)
    }

    /// Handle one raw inbound event end-to-end.
    ///
    /// Contact resolution and conversation binding happen inline (under a
    /// per-contact lock, so one contact never ends up with two open
    /// conversations); everything else runs on the conversation's serial
    /// queue, so inbound order per conversation is reply order.
    #[instrument(skip_all, fields(channel = %raw.channel, channel_user_id = %raw.channel_user_id))]
    pub async fn handle_incoming(&self, raw: InboundEvent) -> Result<HandleOutcome> {
        if raw.content.trim().is_empty() {
            return Err(PlatformError::InvalidInput(
                "inbound content must not be empty".to_string(),
            ));
        }

        let contact = self
            .deps
            .contacts
            .get_or_create(&raw.channel_user_id, raw.channel, raw.sender_name.as_deref())
            .await
            .map_err(PlatformError::from)?;

        let (conversation_id, just_started) = {
            let lock_key = format!("contact-open:{}", contact.id);
            let _guard = self.deps.conversations.locks().acquire(&lock_key).await;

            match self.deps.conversations.get_open(&contact.id).await? {
                Some(open) => (open.id, false),
                None => {
                    let fresh = self
                        .deps
                        .conversations
                        .start(&contact.id, raw.channel)
                        .await?;
                    self.deps
                        .contacts
                        .increment_conversation_count(&contact.id)
                        .await
                        .map_err(PlatformError::from)?;
                    (fresh.id, true)
                }
            }
        };

        let job = Job {
            raw,
            contact,
            conversation_id: conversation_id.clone(),
            just_started,
        };
        self.queue.process(&conversation_id, job).await
    }

    /// A human agent replies. Never touches a persona; transitions the
    /// conversation to human-active.
    #[instrument(skip(self, content))]
    pub async fn handle_human_reply(
        &self,
        conversation_id: &str,
        human_id: &str,
        content: &str,
    ) -> Result<Message> {
        let _guard = self.deps.conversations.locks().acquire(conversation_id).await;

        let conversation = self.deps.conversations.get(conversation_id).await?;
        if conversation.status == ConversationStatus::Closed {
            return Err(PlatformError::InvalidStateTransition(
                "cannot reply in a closed conversation".to_string(),
            ));
        }
        let contact = self
            .deps
            .contacts
            .get(&conversation.contact_id)
            .await
            .map_err(PlatformError::from)?;

        self.deps
            .conversations
            .assign_human(conversation_id, human_id)
            .await?;

        let mut message = Message::new(
            conversation_id,
            &contact.id,
            Direction::Outbound,
            content,
            conversation.channel,
        );
        message
            .metadata
            .insert(META_HUMAN_AGENT.to_string(), serde_json::json!(human_id));

        self.deps
            .conversations
            .append_message(conversation_id, message.clone())
            .await?;
        let conversation = self
            .deps
            .conversations
            .update_status(conversation_id, ConversationStatus::HumanActive)
            .await?;

        if let Err(e) = self
            .deps
            .channels
            .send_message(conversation.channel, &contact.channel_user_id, content)
            .await
        {
            warn!(error = %e, "transport send failed for human reply");
        }

        self.deps.bus.publish(&EngineEvent::MessageOutgoing {
            message: message.clone(),
            conversation,
            contact,
        });

        Ok(message)
    }

    /// Manual transition to handoff.
    pub async fn handle_handoff(&self, conversation_id: &str) -> Result<Conversation> {
        let _guard = self.deps.conversations.locks().acquire(conversation_id).await;
        let conversation = self
            .deps
            .conversations
            .update_status(conversation_id, ConversationStatus::Handoff)
            .await?;
        let contact = self
            .deps
            .contacts
            .get(&conversation.contact_id)
            .await
            .map_err(PlatformError::from)?;
        self.deps.bus.publish(&EngineEvent::ConversationHandoff {
            conversation: conversation.clone(),
            contact,
            reason: "manual handoff".to_string(),
        });
        Ok(conversation)
    }

    /// Hand the conversation back to the AI.
    pub async fn resume_ai(&self, conversation_id: &str) -> Result<Conversation> {
        let _guard = self.deps.conversations.locks().acquire(conversation_id).await;
        Ok(self
            .deps
            .conversations
            .update_status(conversation_id, ConversationStatus::Active)
            .await?)
    }

    pub async fn pause(&self, conversation_id: &str) -> Result<Conversation> {
        let _guard = self.deps.conversations.locks().acquire(conversation_id).await;
        Ok(self
            .deps
            .conversations
            .update_status(conversation_id, ConversationStatus::Paused)
            .await?)
    }

    pub async fn close_conversation(
        &self,
        conversation_id: &str,
        reason: &str,
    ) -> Result<Conversation> {
        let _guard = self.deps.conversations.locks().acquire(conversation_id).await;
        let conversation = self.deps.conversations.close(conversation_id, reason).await?;
        let contact = self
            .deps
            .contacts
            .get(&conversation.contact_id)
            .await
            .map_err(PlatformError::from)?;
        self.deps.bus.publish(&EngineEvent::ConversationClosed {
            conversation: conversation.clone(),
            contact,
        });
        Ok(conversation)
    }

    pub async fn reopen(&self, conversation_id: &str) -> Result<Conversation> {
        let _guard = self.deps.conversations.locks().acquire(conversation_id).await;
        Ok(self.deps.conversations.reopen(conversation_id).await?)
    }
}

/// The serialized portion of an inbound turn. Runs on the conversation's
/// queue worker, under the conversation's advisory lock.
async fn process_turn(deps: Arc<EngineDeps>, job: Job) -> Result<HandleOutcome> {
    let Job {
        raw,
        contact,
        conversation_id,
        just_started,
    } = job;

    let _guard = deps.conversations.locks().acquire(&conversation_id).await;

    let conversation = deps.conversations.get(&conversation_id).await?;
    if just_started {
        deps.bus.publish(&EngineEvent::ConversationStarted {
            conversation: conversation.clone(),
            contact: contact.clone(),
        });
    }

    // Inbound message: created, announced, then appended.
    let mut inbound = Message::new(
        &conversation_id,
        &contact.id,
        Direction::Inbound,
        &raw.content,
        raw.channel,
    );
    inbound.metadata = raw.metadata.clone();

    deps.bus.publish(&EngineEvent::MessageIncoming {
        message: inbound.clone(),
        conversation: conversation.clone(),
        contact: contact.clone(),
    });
    let conversation = deps
        .conversations
        .append_message(&conversation_id, inbound.clone())
        .await?;

    // Paused, handed-off, or human-served conversations record the message
    // but never run a persona.
    if !matches!(
        conversation.status,
        ConversationStatus::Active | ConversationStatus::Waiting
    ) {
        info!(status = %conversation.status, "inbound recorded; persona turn skipped");
        let agent_type = if conversation.status == ConversationStatus::HumanActive {
            AgentType::Human
        } else {
            AgentType::Ai
        };
        return Ok(HandleOutcome {
            outgoing: None,
            conversation,
            contact,
            routing: None,
            agent_type,
        });
    }

    // Bounded context window; the orchestrator sees a copy and never
    // mutates the stored record.
    let window = build_window(&conversation, Some(deps.context_tokens));
    let mut working_copy = conversation.clone();
    working_copy.messages = window.messages;

    let outcome = deps
        .orchestrator
        .handle(&inbound, working_copy, &contact)
        .await
        .map_err(PlatformError::from)?;

    // Reconcile orchestrator-owned fields back into the registry.
    deps.conversations
        .update_agent(
            &conversation_id,
            outcome.conversation.current_agent_id.as_deref(),
        )
        .await?;
    deps.conversations
        .update_context(
            &conversation_id,
            serde_json::to_value(&outcome.conversation.context)?,
        )
        .await?;

    // Outbound message with reserved metadata.
    let response = &outcome.response;
    let mut outgoing = Message::new(
        &conversation_id,
        &contact.id,
        Direction::Outbound,
        &response.content,
        conversation.channel,
    );
    outgoing
        .metadata
        .insert(META_AGENT.to_string(), serde_json::json!(response.agent));
    outgoing.metadata.insert(
        "confidence".to_string(),
        serde_json::json!(response.confidence),
    );
    if let Some(action) = &response.action {
        outgoing
            .metadata
            .insert("action".to_string(), serde_json::json!(action.as_str()));
    }

    let conversation = deps
        .conversations
        .append_message(&conversation_id, outgoing.clone())
        .await?;

    if let Err(e) = deps
        .channels
        .send_message(conversation.channel, &contact.channel_user_id, &response.content)
        .await
    {
        warn!(error = %e, "transport send failed for persona reply");
    }

    deps.bus.publish(&EngineEvent::MessageOutgoing {
        message: outgoing.clone(),
        conversation: conversation.clone(),
        contact: contact.clone(),
    });

    // Status follow-through: handoff or close, with their events.
    let conversation = if response.handoff {
        let updated = deps
            .conversations
            .update_status(&conversation_id, ConversationStatus::Handoff)
            .await?;
        deps.bus.publish(&EngineEvent::ConversationHandoff {
            conversation: updated.clone(),
            contact: contact.clone(),
            reason: response
                .handoff_reason
                .clone()
                .unwrap_or_else(|| "persona handoff".to_string()),
        });
        updated
    } else if response.action == Some(AgentAction::CloseConversation) {
        // No built-in detector produces this action today; conversations
        // close through flow steps and the HTTP surface. The branch keeps
        // the engine's contract for any future producer of the action.
        let closed = deps
            .conversations
            .close(&conversation_id, "closed by assistant")
            .await?;
        deps.bus.publish(&EngineEvent::ConversationClosed {
            conversation: closed.clone(),
            contact: contact.clone(),
        });
        closed
    } else {
        conversation
    };

    Ok(HandleOutcome {
        outgoing: Some(outgoing),
        conversation,
        contact,
        routing: outcome.routing,
        agent_type: AgentType::Ai,
    })
}
