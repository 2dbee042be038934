use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A quick-reply button offered to the recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

/// What went out the door, in adapter-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        body: String,
    },
    Image {
        url: String,
        caption: Option<String>,
    },
    Buttons {
        text: String,
        buttons: Vec<Button>,
    },
    Template {
        name: String,
        params: HashMap<String, String>,
    },
}

/// One delivered (or attempted) outbound send, as recorded by adapters
/// that keep a journal (the web adapter, test doubles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundRecord {
    pub to: String,
    pub content: OutboundContent,
}
