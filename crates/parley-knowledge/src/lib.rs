pub mod error;
pub mod index;
pub mod types;

pub use error::{KnowledgeError, Result};
pub use index::KnowledgeIndex;
pub use types::{FaqHit, KnowledgeDoc, ScoredDoc};
