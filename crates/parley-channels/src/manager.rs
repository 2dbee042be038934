use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use parley_core::types::{Channel, InboundEvent};

use crate::adapter::ChannelAdapter;
use crate::error::{ChannelError, Result};
use crate::types::Button;

/// Dispatches outbound operations to the adapter registered for a channel.
///
/// Sending on a channel with no registered adapter is a logged no-op —
/// flows and broadcasts keep running when a transport is not configured.
#[derive(Default)]
pub struct ChannelManager {
    adapters: DashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            adapters: DashMap::new(),
        }
    }

    /// Register an adapter. Replaces any adapter already serving the channel.
    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        let channel = adapter.channel();
        info!(channel = %channel, "registering channel adapter");
        self.adapters.insert(channel, adapter);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).map(|a| Arc::clone(a.value()))
    }

    pub fn is_registered(&self, channel: Channel) -> bool {
        self.adapters.contains_key(&channel)
    }

    pub async fn send_message(&self, channel: Channel, to: &str, message: &str) -> Result<()> {
        match self.get(channel) {
            Some(adapter) => adapter.send_message(to, message).await,
            None => {
                warn!(channel = %channel, "send_message dropped: no adapter registered");
                Ok(())
            }
        }
    }

    pub async fn send_image(
        &self,
        channel: Channel,
        to: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        match self.get(channel) {
            Some(adapter) => adapter.send_image(to, url, caption).await,
            None => {
                warn!(channel = %channel, "send_image dropped: no adapter registered");
                Ok(())
            }
        }
    }

    pub async fn send_buttons(
        &self,
        channel: Channel,
        to: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<()> {
        match self.get(channel) {
            Some(adapter) => adapter.send_buttons(to, text, buttons).await,
            None => {
                warn!(channel = %channel, "send_buttons dropped: no adapter registered");
                Ok(())
            }
        }
    }

    pub async fn send_template(
        &self,
        channel: Channel,
        to: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<()> {
        match self.get(channel) {
            Some(adapter) => adapter.send_template(to, name, params).await,
            None => {
                warn!(channel = %channel, "send_template dropped: no adapter registered");
                Ok(())
            }
        }
    }

    /// Parse a raw webhook body through the channel's adapter.
    ///
    /// Unlike sends, parsing without an adapter is an error — the HTTP seam
    /// cannot fabricate inbound events.
    pub fn parse_incoming(&self, channel: Channel, raw: &serde_json::Value) -> Result<Vec<InboundEvent>> {
        let adapter = self
            .get(channel)
            .ok_or(ChannelError::NotRegistered(channel))?;
        adapter.parse_incoming(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::WebChannel;

    #[tokio::test]
    async fn unregistered_send_is_a_no_op() {
        let manager = ChannelManager::new();
        manager
            .send_message(Channel::Telegram, "u1", "hi")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn registered_adapter_receives_sends() {
        let manager = ChannelManager::new();
        let web = Arc::new(WebChannel::new(None));
        manager.register(Arc::clone(&web) as Arc<dyn ChannelAdapter>);

        manager
            .send_message(Channel::Web, "visitor-1", "hello")
            .await
            .unwrap();

        let sent = web.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "visitor-1");
    }

    #[test]
    fn parse_without_adapter_errors() {
        let manager = ChannelManager::new();
        assert!(matches!(
            manager.parse_incoming(Channel::Web, &serde_json::json!({})),
            Err(ChannelError::NotRegistered(Channel::Web))
        ));
    }
}
