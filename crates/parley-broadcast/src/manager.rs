use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parley_channels::ChannelManager;
use parley_contacts::{Contact, ContactRegistry};
use parley_core::types::Channel;
use parley_store::Store;
use tracing::{info, instrument, warn};

use crate::error::{BroadcastError, Result};
use crate::types::{Broadcast, BroadcastStatus, BroadcastTarget};

/// Outbound messages per second each transport tolerates.
pub fn rate_limit_per_sec(channel: Channel) -> u64 {
    match channel {
        Channel::Whatsapp => 80,
        Channel::Telegram => 30,
        Channel::Instagram => 20,
        Channel::Web => 100,
    }
}

/// Sleep between sends: ceil(1000 / limit) milliseconds.
pub fn send_gap_ms(channel: Channel) -> u64 {
    let limit = rate_limit_per_sec(channel);
    1000u64.div_ceil(limit)
}

/// What a caller provides to create a broadcast.
pub struct CreateBroadcast {
    pub name: String,
    pub content: String,
    /// "text" (default) or "image".
    pub message_type: Option<String>,
    pub target: BroadcastTarget,
    pub schedule: Option<DateTime<Utc>>,
}

/// Owns [`Broadcast`] records and runs the paced send loops.
pub struct BroadcastManager {
    store: Arc<dyn Store<Broadcast>>,
    contacts: Arc<ContactRegistry>,
    channels: Arc<ChannelManager>,
    /// Live cancellation flags for broadcasts currently in `send`.
    cancels: DashMap<String, Arc<AtomicBool>>,
}

impl BroadcastManager {
    pub fn new(
        store: Arc<dyn Store<Broadcast>>,
        contacts: Arc<ContactRegistry>,
        channels: Arc<ChannelManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            contacts,
            channels,
            cancels: DashMap::new(),
        })
    }

    /// Create a broadcast: resolve the target set now, then either leave it
    /// as a draft or arm a one-shot timer for the scheduled send.
    #[instrument(skip_all, fields(name = %config.name))]
    pub async fn create(
        self: &Arc<Self>,
        config: CreateBroadcast,
        predicate: Option<&(dyn Fn(&Contact) -> bool + Send + Sync)>,
    ) -> Result<Broadcast> {
        if config.content.is_empty() {
            return Err(BroadcastError::InvalidInput("content must not be empty".into()));
        }

        let target = config.target.clone();
        let recipients: Vec<Contact> = self
            .contacts
            .find(&move |c: &Contact| {
                target.channel.map_or(true, |ch| c.channel == ch)
                    && target.tags.iter().all(|t| c.has_tag(t))
            })
            .await
            .map_err(|e| BroadcastError::InvalidInput(e.to_string()))?
            .into_iter()
            .filter(|c| predicate.map_or(true, |p| p(c)))
            .collect();

        let mut broadcast = Broadcast::new(config.name, config.content, config.target);
        if let Some(kind) = config.message_type {
            broadcast.message_type = kind;
        }
        broadcast.recipient_ids = recipients.iter().map(|c| c.id.clone()).collect();
        broadcast.total_recipients = recipients.len() as u32;

        let now = Utc::now();
        if let Some(at) = config.schedule {
            if at > now {
                broadcast.status = BroadcastStatus::Scheduled;
                broadcast.scheduled_for = Some(at);
            }
        }

        let broadcast = self.store.create(broadcast).await?;
        info!(
            broadcast_id = %broadcast.id,
            recipients = broadcast.total_recipients,
            status = broadcast.status.as_str(),
            "broadcast created"
        );

        if broadcast.status == BroadcastStatus::Scheduled {
            self.arm_timer(&broadcast);
        }

        Ok(broadcast)
    }

    pub async fn get(&self, id: &str) -> Result<Broadcast> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BroadcastError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Broadcast>> {
        Ok(self.store.get_all().await?)
    }

    /// Run the send loop: one message per recipient, paced by the channel's
    /// rate limit, counting successes and failures. Checks its cancel flag
    /// at every rate-limit boundary.
    ///
    /// The claim (status check, cancel-flag registration, transition to
    /// sending) happens under the broadcast's advisory lock: a scheduled
    /// timer firing and a manual send can race here, and only one may run
    /// the loop. The lock is released for the loop itself so `cancel` can
    /// flag a send in progress.
    #[instrument(skip(self), fields(broadcast_id = %id))]
    pub async fn send(self: &Arc<Self>, id: &str) -> Result<Broadcast> {
        let cancel = Arc::new(AtomicBool::new(false));
        let broadcast = {
            let _guard = self.store.locks().acquire(id).await;

            let broadcast = self.get(id).await?;
            match broadcast.status {
                BroadcastStatus::Draft | BroadcastStatus::Scheduled => {}
                status => {
                    return Err(BroadcastError::NotSendable {
                        id: id.to_string(),
                        status: status.as_str().to_string(),
                    })
                }
            }

            self.cancels.insert(id.to_string(), Arc::clone(&cancel));
            self.store
                .update(
                    id,
                    serde_json::json!({
                        "status": BroadcastStatus::Sending,
                        "startedAt": Utc::now(),
                    }),
                )
                .await?;
            broadcast
        };

        let mut sent = 0u32;
        let mut delivered = 0u32;
        let mut failed = 0u32;
        let mut cancelled = false;

        for contact_id in &broadcast.recipient_ids {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }

            match self.deliver(&broadcast, contact_id).await {
                Ok(channel) => {
                    sent += 1;
                    delivered += 1;
                    // Rate-limit spacing before the next recipient.
                    tokio::time::sleep(std::time::Duration::from_millis(send_gap_ms(channel)))
                        .await;
                }
                Err(e) => {
                    warn!(contact_id = %contact_id, error = %e, "broadcast send failed");
                    failed += 1;
                }
            }

            self.store
                .update(
                    id,
                    serde_json::json!({
                        "sentCount": sent,
                        "deliveredCount": delivered,
                        "failedCount": failed,
                    }),
                )
                .await?;
        }

        // Finalize under the lock again so `cancel` never observes a stale
        // sending record with no live flag.
        let _guard = self.store.locks().acquire(id).await;
        self.cancels.remove(id);
        let final_status = if cancelled {
            BroadcastStatus::Cancelled
        } else {
            BroadcastStatus::Completed
        };
        info!(
            broadcast_id = %id,
            sent,
            failed,
            status = final_status.as_str(),
            "broadcast finished"
        );

        Ok(self
            .store
            .update(
                id,
                serde_json::json!({
                    "status": final_status,
                    "completedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Cancel: a sending broadcast stops at the next rate-limit boundary; a
    /// draft or scheduled one flips to cancelled immediately. Runs under
    /// the broadcast's advisory lock so it cannot interleave with a send
    /// call's claim sequence.
    pub async fn cancel(&self, id: &str) -> Result<Broadcast> {
        let _guard = self.store.locks().acquire(id).await;

        if let Some(flag) = self.cancels.get(id) {
            flag.store(true, Ordering::SeqCst);
            return self.get(id).await;
        }

        let broadcast = self.get(id).await?;
        match broadcast.status {
            BroadcastStatus::Draft | BroadcastStatus::Scheduled => Ok(self
                .store
                .update(
                    id,
                    serde_json::json!({
                        "status": BroadcastStatus::Cancelled,
                        "completedAt": Utc::now(),
                    }),
                )
                .await?),
            _ => Ok(broadcast),
        }
    }

    async fn deliver(&self, broadcast: &Broadcast, contact_id: &str) -> Result<Channel> {
        let contact = self
            .contacts
            .get(contact_id)
            .await
            .map_err(|e| BroadcastError::InvalidInput(e.to_string()))?;

        let result = if broadcast.message_type == "image" {
            self.channels
                .send_image(contact.channel, &contact.channel_user_id, &broadcast.content, None)
                .await
        } else {
            self.channels
                .send_message(contact.channel, &contact.channel_user_id, &broadcast.content)
                .await
        };

        result.map_err(|e| BroadcastError::InvalidInput(e.to_string()))?;
        Ok(contact.channel)
    }

    /// One-shot timer for a scheduled broadcast.
    fn arm_timer(self: &Arc<Self>, broadcast: &Broadcast) {
        let Some(at) = broadcast.scheduled_for else {
            return;
        };
        let manager = Arc::clone(self);
        let id = broadcast.id.clone();
        let delay = (at - Utc::now()).to_std().unwrap_or_default();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match manager.get(&id).await {
                // Cancelled while waiting: nothing to do.
                Ok(b) if b.status != BroadcastStatus::Scheduled => {}
                Ok(_) => {
                    if let Err(e) = manager.send(&id).await {
                        warn!(broadcast_id = %id, error = %e, "scheduled broadcast failed");
                    }
                }
                Err(e) => warn!(broadcast_id = %id, error = %e, "scheduled broadcast vanished"),
            }
        });
    }
}
