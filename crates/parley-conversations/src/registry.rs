use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parley_core::types::Channel;
use parley_store::Store;
use tracing::{info, instrument};

use crate::error::{ConversationError, Result};
use crate::types::{
    Conversation, ConversationFilters, ConversationStatus, Message,
};

/// Key under which a close reason is recorded in `context.custom_fields`.
const CLOSE_REASON_KEY: &str = "close-reason";

/// Single writer for [`Conversation`] records and their messages.
pub struct ConversationRegistry {
    store: Arc<dyn Store<Conversation>>,
}

impl ConversationRegistry {
    pub fn new(store: Arc<dyn Store<Conversation>>) -> Self {
        Self { store }
    }

    /// Expose the store's advisory locks so the engine can hold a
    /// conversation's lock across its whole choreography.
    pub fn locks(&self) -> &parley_store::KeyLocks {
        self.store.locks()
    }

    /// Create a fresh active conversation with no messages and blank context.
    #[instrument(skip(self))]
    pub async fn start(&self, contact_id: &str, channel: Channel) -> Result<Conversation> {
        let conversation = Conversation::new(contact_id, channel);
        info!(conversation_id = %conversation.id, "conversation started");
        Ok(self.store.create(conversation).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Conversation> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ConversationError::NotFound(id.to_string()))
    }

    /// Most recently updated conversation for the contact whose status is
    /// active or waiting.
    pub async fn get_active(&self, contact_id: &str) -> Result<Option<Conversation>> {
        let cid = contact_id.to_string();
        let candidates = self
            .store
            .find(&move |c: &Conversation| {
                c.contact_id == cid
                    && matches!(
                        c.status,
                        ConversationStatus::Active | ConversationStatus::Waiting
                    )
            })
            .await?;
        Ok(candidates.into_iter().max_by_key(|c| c.updated_at))
    }

    /// Most recently updated conversation for the contact in ANY non-terminal
    /// state. New inbound events append here rather than opening a second
    /// conversation.
    pub async fn get_open(&self, contact_id: &str) -> Result<Option<Conversation>> {
        let cid = contact_id.to_string();
        let candidates = self
            .store
            .find(&move |c: &Conversation| c.contact_id == cid && !c.status.is_terminal())
            .await?;
        Ok(candidates.into_iter().max_by_key(|c| c.updated_at))
    }

    /// Append a message, bumping `updated_at`.
    ///
    /// Timestamps within a conversation stay strictly increasing: a message
    /// arriving with a timestamp at or before the current tail is nudged one
    /// millisecond past it.
    #[instrument(skip(self, message), fields(conversation_id = %id))]
    pub async fn append_message(&self, id: &str, mut message: Message) -> Result<Conversation> {
        let conversation = self.get(id).await?;

        if let Some(last) = conversation.messages.last() {
            if message.timestamp <= last.timestamp {
                message.timestamp = last.timestamp + chrono::Duration::milliseconds(1);
            }
        }

        let mut messages = conversation.messages;
        messages.push(message);

        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "messages": messages,
                    "updatedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Transition status. Setting `human-active` requires a human agent to
    /// already be assigned.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn update_status(&self, id: &str, status: ConversationStatus) -> Result<Conversation> {
        let conversation = self.get(id).await?;

        if status == ConversationStatus::HumanActive && conversation.human_agent_id.is_none() {
            return Err(ConversationError::InvalidTransition(
                "human-active requires an assigned human agent".to_string(),
            ));
        }

        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "status": status,
                    "updatedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Set (or clear) the persona serving this conversation.
    pub async fn update_agent(&self, id: &str, agent_id: Option<&str>) -> Result<Conversation> {
        self.get(id).await?;
        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "currentAgentId": agent_id,
                    "updatedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Assign a human agent id (precondition for the human-active status).
    pub async fn assign_human(&self, id: &str, human_id: &str) -> Result<Conversation> {
        self.get(id).await?;
        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "humanAgentId": human_id,
                    "updatedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Shallow-merge fields into the conversation context.
    pub async fn update_context(&self, id: &str, patch: serde_json::Value) -> Result<Conversation> {
        let conversation = self.get(id).await?;
        let mut context = serde_json::to_value(&conversation.context)?;
        if let (Some(base), Some(fields)) = (context.as_object_mut(), patch.as_object()) {
            for (k, v) in fields {
                base.insert(k.clone(), v.clone());
            }
        } else {
            return Err(ConversationError::InvalidInput(
                "context patch must be a JSON object".to_string(),
            ));
        }

        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "context": context,
                    "updatedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Close, recording the reason under `context.custom_fields.close-reason`.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn close(&self, id: &str, reason: &str) -> Result<Conversation> {
        let conversation = self.get(id).await?;
        let mut context = conversation.context;
        context
            .custom_fields
            .insert(CLOSE_REASON_KEY.to_string(), serde_json::json!(reason));

        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "status": ConversationStatus::Closed,
                    "context": context,
                    "updatedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Reopen a closed conversation, erasing the recorded close reason.
    pub async fn reopen(&self, id: &str) -> Result<Conversation> {
        let conversation = self.get(id).await?;
        let mut context = conversation.context;
        context.custom_fields.remove(CLOSE_REASON_KEY);

        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "status": ConversationStatus::Active,
                    "context": context,
                    "updatedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// The message tail of length `limit`, or the full ordered list.
    pub async fn get_history(&self, id: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        let conversation = self.get(id).await?;
        let messages = conversation.messages;
        Ok(match limit {
            Some(n) if n < messages.len() => messages[messages.len() - n..].to_vec(),
            _ => messages,
        })
    }

    pub async fn find(&self, filters: ConversationFilters) -> Result<Vec<Conversation>> {
        Ok(self
            .store
            .find(&move |c: &Conversation| {
                filters.status.map_or(true, |s| c.status == s)
                    && filters.channel.map_or(true, |ch| c.channel == ch)
                    && filters
                        .current_agent_id
                        .as_deref()
                        .map_or(true, |a| c.current_agent_id.as_deref() == Some(a))
                    && filters
                        .contact_id
                        .as_deref()
                        .map_or(true, |id| c.contact_id == id)
                    && filters.started_before.map_or(true, |t| c.started_at < t)
                    && filters.started_after.map_or(true, |t| c.started_at > t)
            })
            .await?)
    }

    /// Conversation counts grouped by status.
    pub async fn stats(&self) -> Result<HashMap<ConversationStatus, usize>> {
        let all = self.store.get_all().await?;
        let mut counts: HashMap<ConversationStatus, usize> = ConversationStatus::all()
            .into_iter()
            .map(|s| (s, 0))
            .collect();
        for conversation in &all {
            *counts.entry(conversation.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use parley_store::MemoryStore;

    fn registry() -> ConversationRegistry {
        ConversationRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn text(conv: &Conversation, direction: Direction, content: &str) -> Message {
        Message::new(&conv.id, &conv.contact_id, direction, content, conv.channel)
    }

    #[tokio::test]
    async fn start_creates_blank_active_conversation() {
        let reg = registry();
        let conv = reg.start("contact-1", Channel::Web).await.unwrap();
        assert_eq!(conv.status, ConversationStatus::Active);
        assert!(conv.messages.is_empty());
        assert!(conv.current_agent_id.is_none());
    }

    #[tokio::test]
    async fn append_keeps_timestamps_strictly_increasing() {
        let reg = registry();
        let conv = reg.start("c1", Channel::Web).await.unwrap();

        let first = text(&conv, Direction::Inbound, "a");
        let mut second = text(&conv, Direction::Inbound, "b");
        second.timestamp = first.timestamp; // simulate identical clock reads

        reg.append_message(&conv.id, first).await.unwrap();
        let after = reg.append_message(&conv.id, second).await.unwrap();

        assert_eq!(after.messages.len(), 2);
        assert!(after.messages[1].timestamp > after.messages[0].timestamp);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_fails() {
        let reg = registry();
        let conv = Conversation::new("c1", Channel::Web);
        let msg = text(&conv, Direction::Inbound, "x");
        assert!(matches!(
            reg.append_message("missing", msg).await,
            Err(ConversationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn human_active_requires_assigned_human() {
        let reg = registry();
        let conv = reg.start("c1", Channel::Web).await.unwrap();

        assert!(matches!(
            reg.update_status(&conv.id, ConversationStatus::HumanActive).await,
            Err(ConversationError::InvalidTransition(_))
        ));

        reg.assign_human(&conv.id, "human-9").await.unwrap();
        let after = reg
            .update_status(&conv.id, ConversationStatus::HumanActive)
            .await
            .unwrap();
        assert_eq!(after.status, ConversationStatus::HumanActive);
    }

    #[tokio::test]
    async fn close_records_reason_and_reopen_erases_it() {
        let reg = registry();
        let conv = reg.start("c1", Channel::Web).await.unwrap();

        let closed = reg.close(&conv.id, "resolved").await.unwrap();
        assert_eq!(closed.status, ConversationStatus::Closed);
        assert_eq!(
            closed.context.custom_fields.get("close-reason"),
            Some(&serde_json::json!("resolved"))
        );

        let reopened = reg.reopen(&conv.id).await.unwrap();
        assert_eq!(reopened.status, ConversationStatus::Active);
        assert!(reopened.context.custom_fields.get("close-reason").is_none());
    }

    #[tokio::test]
    async fn get_active_skips_handoff_but_get_open_does_not() {
        let reg = registry();
        let conv = reg.start("c1", Channel::Web).await.unwrap();
        reg.update_status(&conv.id, ConversationStatus::Handoff)
            .await
            .unwrap();

        assert!(reg.get_active("c1").await.unwrap().is_none());
        let open = reg.get_open("c1").await.unwrap().unwrap();
        assert_eq!(open.id, conv.id);
    }

    #[tokio::test]
    async fn context_update_is_a_shallow_merge() {
        let reg = registry();
        let conv = reg.start("c1", Channel::Web).await.unwrap();

        reg.update_context(&conv.id, serde_json::json!({"intent": "sales"}))
            .await
            .unwrap();
        let after = reg
            .update_context(&conv.id, serde_json::json!({"leadScore": 40}))
            .await
            .unwrap();

        assert_eq!(after.context.intent.as_deref(), Some("sales"));
        assert_eq!(after.context.lead_score, Some(40));
    }

    #[tokio::test]
    async fn history_returns_tail() {
        let reg = registry();
        let conv = reg.start("c1", Channel::Web).await.unwrap();
        for i in 0..5 {
            reg.append_message(&conv.id, text(&conv, Direction::Inbound, &format!("m{i}")))
                .await
                .unwrap();
        }

        let tail = reg.get_history(&conv.id, Some(2)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].content, "m4");

        let full = reg.get_history(&conv.id, None).await.unwrap();
        assert_eq!(full.len(), 5);
    }

    #[tokio::test]
    async fn find_and_stats_group_correctly() {
        let reg = registry();
        let a = reg.start("c1", Channel::Web).await.unwrap();
        let _b = reg.start("c2", Channel::Whatsapp).await.unwrap();
        reg.close(&a.id, "done").await.unwrap();

        let closed = reg
            .find(ConversationFilters {
                status: Some(ConversationStatus::Closed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);

        let stats = reg.stats().await.unwrap();
        assert_eq!(stats[&ConversationStatus::Closed], 1);
        assert_eq!(stats[&ConversationStatus::Active], 1);
    }
}
