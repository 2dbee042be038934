pub mod error;
pub mod manager;
pub mod types;

pub use error::{BroadcastError, Result};
pub use manager::{rate_limit_per_sec, send_gap_ms, BroadcastManager, CreateBroadcast};
pub use types::{Broadcast, BroadcastStatus, BroadcastTarget};
