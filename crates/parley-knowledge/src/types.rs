use serde::{Deserialize, Serialize};

/// One loaded knowledge document, addressed as `category/subcategory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDoc {
    pub category: String,
    /// File stem under the category directory (e.g. `faq`, `uploaded-menu`).
    pub subcategory: String,
    pub data: serde_json::Value,
}

impl KnowledgeDoc {
    pub fn key(&self) -> String {
        format!("{}/{}", self.category, self.subcategory)
    }
}

/// A keyword-search result: document plus its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDoc {
    pub doc: KnowledgeDoc,
    /// Count of case-insensitive substring hits across the flattened document.
    pub relevance: usize,
}

/// An FAQ entry matched against a free-text query.
#[derive(Debug, Clone, Serialize)]
pub struct FaqHit {
    pub question: String,
    pub answer: String,
    /// keyword hits ×2 + question-word hits ×1.
    pub score: usize,
}
