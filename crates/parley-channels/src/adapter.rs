use async_trait::async_trait;
use std::collections::HashMap;

use parley_core::types::{Channel, InboundEvent};

use crate::error::Result;
use crate::types::Button;

/// Capability set implemented by every transport adapter.
///
/// Implementations must be `Send + Sync` so they can live in a
/// [`ChannelManager`](crate::manager::ChannelManager) and be driven from
/// multiple Tokio tasks. The four send operations are called with the
/// channel pre-selected; webhook verification and inbound parsing run on
/// the HTTP seam before anything reaches the engine.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The transport this adapter serves.
    fn channel(&self) -> Channel;

    /// Deliver a plain text message.
    async fn send_message(&self, to: &str, message: &str) -> Result<()>;

    /// Deliver an image by URL, with an optional caption.
    async fn send_image(&self, to: &str, url: &str, caption: Option<&str>) -> Result<()>;

    /// Deliver a text with quick-reply buttons.
    async fn send_buttons(&self, to: &str, text: &str, buttons: &[Button]) -> Result<()>;

    /// Deliver a named template with parameters.
    async fn send_template(&self, to: &str, name: &str, params: &HashMap<String, String>)
        -> Result<()>;

    /// Check a webhook payload's signature. Adapters without signed
    /// webhooks accept everything.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        let _ = (payload, signature);
        true
    }

    /// Translate a raw webhook body into inbound events (possibly several
    /// per delivery, depending on the transport's batching).
    fn parse_incoming(&self, raw: &serde_json::Value) -> Result<Vec<InboundEvent>>;
}
