use std::sync::Arc;

use chrono::Utc;
use parley_core::types::Channel;
use parley_store::Store;
use tracing::{debug, info, instrument};

use crate::error::{ContactError, Result};
use crate::types::Contact;

/// Single writer for [`Contact`] records.
///
/// Every mutator runs under the store's per-contact advisory lock so
/// concurrent inbound events for the same person cannot interleave their
/// read-modify-write sequences.
pub struct ContactRegistry {
    store: Arc<dyn Store<Contact>>,
}

impl ContactRegistry {
    pub fn new(store: Arc<dyn Store<Contact>>) -> Self {
        Self { store }
    }

    /// Resolve `(channel, channel_user_id)` to a contact, creating one on
    /// first inbound. Existing contacts get `last_seen_at` refreshed (never
    /// moved backwards) and `name` back-filled only when previously unset.
    #[instrument(skip(self, name))]
    pub async fn get_or_create(
        &self,
        channel_user_id: &str,
        channel: Channel,
        name: Option<&str>,
    ) -> Result<Contact> {
        if channel_user_id.is_empty() {
            return Err(ContactError::InvalidInput(
                "channel_user_id must not be empty".to_string(),
            ));
        }

        let identity_key = format!("identity:{channel}:{channel_user_id}");
        let _guard = self.store.locks().acquire(&identity_key).await;

        let cuid = channel_user_id.to_string();
        let existing = self
            .store
            .find(&move |c: &Contact| c.channel == channel && c.channel_user_id == cuid)
            .await?
            .into_iter()
            .next();

        if let Some(contact) = existing {
            debug!(contact_id = %contact.id, "identity resolved to existing contact");
            let now = Utc::now();
            let last_seen = contact.last_seen_at.max(now);
            let mut patch = serde_json::json!({
                "lastSeenAt": last_seen,
                "updatedAt": now,
            });
            if contact.name.is_none() {
                if let Some(n) = name {
                    patch["name"] = serde_json::Value::String(n.to_string());
                }
            }
            return Ok(self.store.update(&contact.id, patch).await?);
        }

        info!(channel = %channel, "new identity; creating contact");
        let contact = Contact::new(channel_user_id, channel, name.map(String::from));
        Ok(self.store.create(contact).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Contact> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ContactError::NotFound(id.to_string()))
    }

    pub async fn all(&self) -> Result<Vec<Contact>> {
        Ok(self.store.get_all().await?)
    }

    pub async fn find(
        &self,
        predicate: &(dyn Fn(&Contact) -> bool + Send + Sync),
    ) -> Result<Vec<Contact>> {
        Ok(self.store.find(predicate).await?)
    }

    /// Apply a field patch (wire casing). Bumps `updated_at`.
    pub async fn update(&self, id: &str, mut patch: serde_json::Value) -> Result<Contact> {
        let _guard = self.store.locks().acquire(id).await;
        if let Some(map) = patch.as_object_mut() {
            map.insert("updatedAt".to_string(), serde_json::json!(Utc::now()));
            // Identity fields are immutable through this path.
            map.remove("id");
            map.remove("channel");
            map.remove("channelUserId");
        }
        match self.store.update(id, patch).await {
            Ok(c) => Ok(c),
            Err(parley_store::StoreError::NotFound(_)) => Err(ContactError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    pub async fn add_tag(&self, id: &str, tag: &str) -> Result<Contact> {
        let _guard = self.store.locks().acquire(id).await;
        let contact = self.fetch(id).await?;
        if contact.has_tag(tag) {
            return Ok(contact);
        }
        let mut tags = contact.tags;
        tags.push(tag.to_string());
        Ok(self
            .store
            .update(id, serde_json::json!({"tags": tags, "updatedAt": Utc::now()}))
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn remove_tag(&self, id: &str, tag: &str) -> Result<Contact> {
        let _guard = self.store.locks().acquire(id).await;
        let contact = self.fetch(id).await?;
        let tags: Vec<String> = contact.tags.into_iter().filter(|t| t != tag).collect();
        Ok(self
            .store
            .update(id, serde_json::json!({"tags": tags, "updatedAt": Utc::now()}))
            .await?)
    }

    pub async fn increment_conversation_count(&self, id: &str) -> Result<Contact> {
        let _guard = self.store.locks().acquire(id).await;
        let contact = self.fetch(id).await?;
        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "conversationCount": contact.conversation_count + 1,
                    "updatedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Case-insensitive substring over name/email/channel_user_id, plus
    /// exact-substring over tags.
    pub async fn search(&self, query: &str) -> Result<Vec<Contact>> {
        let needle = query.to_lowercase();
        let raw = query.to_string();
        Ok(self
            .store
            .find(&move |c: &Contact| {
                c.name
                    .as_deref()
                    .map_or(false, |n| n.to_lowercase().contains(&needle))
                    || c.email
                        .as_deref()
                        .map_or(false, |e| e.to_lowercase().contains(&needle))
                    || c.channel_user_id.to_lowercase().contains(&needle)
                    || c.tags.iter().any(|t| t.contains(&raw))
            })
            .await?)
    }

    async fn fetch(&self, id: &str) -> Result<Contact> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ContactError::NotFound(id.to_string()))
    }
}
