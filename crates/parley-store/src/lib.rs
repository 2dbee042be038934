pub mod error;
pub mod locks;
pub mod memory;
pub mod record;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use locks::KeyLocks;
pub use memory::MemoryStore;
pub use record::{Record, Store};
pub use sqlite::SqliteStore;
