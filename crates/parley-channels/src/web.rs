use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use parley_core::types::{Channel, InboundEvent};

use crate::adapter::ChannelAdapter;
use crate::error::{ChannelError, Result};
use crate::types::{Button, OutboundContent, OutboundRecord};
use crate::webhook;

/// Adapter for the in-process web widget.
///
/// Deliveries are journalled and optionally forwarded to an mpsc consumer
/// (the widget's push connection). Doubles as the recording adapter in
/// engine and flow tests.
pub struct WebChannel {
    secret: Option<String>,
    sent: Mutex<Vec<OutboundRecord>>,
    forward: Mutex<Option<mpsc::UnboundedSender<OutboundRecord>>>,
}

impl WebChannel {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            sent: Mutex::new(Vec::new()),
            forward: Mutex::new(None),
        }
    }

    /// Attach a live consumer; subsequent deliveries are pushed to it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OutboundRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.forward.lock().expect("web channel poisoned") = Some(tx);
        rx
    }

    /// Everything delivered so far, in order.
    pub fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.lock().expect("web channel poisoned").clone()
    }

    fn record(&self, to: &str, content: OutboundContent) {
        let record = OutboundRecord {
            to: to.to_string(),
            content,
        };
        if let Some(tx) = self.forward.lock().expect("web channel poisoned").as_ref() {
            let _ = tx.send(record.clone());
        }
        self.sent.lock().expect("web channel poisoned").push(record);
    }
}

#[async_trait]
impl ChannelAdapter for WebChannel {
    fn channel(&self) -> Channel {
        Channel::Web
    }

    async fn send_message(&self, to: &str, message: &str) -> Result<()> {
        self.record(
            to,
            OutboundContent::Text {
                body: message.to_string(),
            },
        );
        Ok(())
    }

    async fn send_image(&self, to: &str, url: &str, caption: Option<&str>) -> Result<()> {
        self.record(
            to,
            OutboundContent::Image {
                url: url.to_string(),
                caption: caption.map(String::from),
            },
        );
        Ok(())
    }

    async fn send_buttons(&self, to: &str, text: &str, buttons: &[Button]) -> Result<()> {
        self.record(
            to,
            OutboundContent::Buttons {
                text: text.to_string(),
                buttons: buttons.to_vec(),
            },
        );
        Ok(())
    }

    async fn send_template(
        &self,
        to: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<()> {
        self.record(
            to,
            OutboundContent::Template {
                name: name.to_string(),
                params: params.clone(),
            },
        );
        Ok(())
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        match &self.secret {
            Some(secret) => webhook::verify(secret, payload, signature),
            None => true,
        }
    }

    fn parse_incoming(&self, raw: &serde_json::Value) -> Result<Vec<InboundEvent>> {
        let content = raw
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::Parse("missing `content`".to_string()))?;
        let user_id = raw
            .get("userId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::Parse("missing `userId`".to_string()))?;

        let mut event = InboundEvent::new(content, user_id, Channel::Web);
        if let Some(name) = raw.get("senderName").and_then(|v| v.as_str()) {
            event = event.with_sender_name(name);
        }
        Ok(vec![event])
    }
}
