use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{info, warn};

use crate::error::{KnowledgeError, Result};
use crate::types::{FaqHit, KnowledgeDoc, ScoredDoc};

/// Categories scanned under the corpus root. Unknown directories are ignored.
const CATEGORIES: [&str; 4] = ["sales", "support", "company", "config"];

/// Persona-specific knowledge blocks: persona key → (category, subcategories).
const PERSONA_BLOCKS: &[(&str, &str, &[&str])] = &[
    ("sales", "sales", &["products", "pricing", "promotions"]),
    ("support", "support", &["faq", "policies", "troubleshooting"]),
];

/// The loaded, queryable knowledge corpus.
///
/// Documents live on disk as `<root>/<category>/<subcategory>.json` and are
/// loaded at startup and on explicit [`reload`](KnowledgeIndex::reload).
/// A file that fails to load or validate is logged and skipped — the index
/// stays usable with whatever loaded successfully.
pub struct KnowledgeIndex {
    root: PathBuf,
    docs: RwLock<Vec<KnowledgeDoc>>,
}

impl KnowledgeIndex {
    /// Load the corpus under `root`. An empty or missing root yields an
    /// empty (but usable) index.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let index = Self {
            root: root.into(),
            docs: RwLock::new(Vec::new()),
        };
        index.reload()?;
        Ok(index)
    }

    /// Re-scan the corpus root, replacing the in-memory documents.
    pub fn reload(&self) -> Result<()> {
        let mut loaded = Vec::new();

        for category in CATEGORIES {
            let dir = self.root.join(category);
            if !dir.is_dir() {
                continue;
            }
            let entries = std::fs::read_dir(&dir)
                .map_err(|e| KnowledgeError::RootUnreadable(format!("{}: {e}", dir.display())))?;
            let mut paths: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
                .collect();
            paths.sort();

            for path in paths {
                match load_doc(category, &path) {
                    Some(doc) => loaded.push(doc),
                    None => continue, // already logged
                }
            }
        }

        info!(docs = loaded.len(), root = %self.root.display(), "knowledge corpus loaded");
        *self.docs.write().expect("knowledge index poisoned") = loaded;
        Ok(())
    }

    /// Fetch one document by address.
    pub fn get(&self, category: &str, subcategory: &str) -> Option<KnowledgeDoc> {
        let docs = self.docs.read().expect("knowledge index poisoned");
        docs.iter()
            .find(|d| d.category == category && d.subcategory == subcategory)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().expect("knowledge index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rank documents by total case-insensitive substring hits of `keywords`
    /// across a flattened text rendering of each document.
    pub fn search_by_keywords(&self, keywords: &[String], category: Option<&str>) -> Vec<ScoredDoc> {
        let lowered: Vec<String> = keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if lowered.is_empty() {
            return Vec::new();
        }

        let docs = self.docs.read().expect("knowledge index poisoned");
        let mut scored: Vec<ScoredDoc> = docs
            .iter()
            .filter(|d| category.map_or(true, |c| d.category == c))
            .filter_map(|d| {
                let flat = flatten(&d.data);
                let relevance: usize = lowered.iter().map(|k| count_hits(&flat, k)).sum();
                (relevance > 0).then(|| ScoredDoc {
                    doc: d.clone(),
                    relevance,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.relevance.cmp(&a.relevance));
        scored
    }

    /// Score FAQ entries against a free-text query.
    ///
    /// Each entry keyword found in the query counts 2; each query word found
    /// in the entry's question counts 1. Zero-score entries are dropped.
    pub fn search_faq(&self, query: &str) -> Vec<FaqHit> {
        let query_lower = query.to_lowercase();
        let query_words: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .collect();

        let docs = self.docs.read().expect("knowledge index poisoned");
        let mut hits = Vec::new();

        for doc in docs.iter() {
            let Some(entries) = doc.data.get("faqs").and_then(|v| v.as_array()) else {
                continue;
            };
            for entry in entries {
                let question = entry
                    .get("question")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let answer = entry
                    .get("answer")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if question.is_empty() {
                    continue;
                }

                let keyword_hits = entry
                    .get("keywords")
                    .and_then(|v| v.as_array())
                    .map(|keys| {
                        keys.iter()
                            .filter_map(|k| k.as_str())
                            .filter(|k| query_lower.contains(&k.to_lowercase()))
                            .count()
                    })
                    .unwrap_or(0);

                let question_lower = question.to_lowercase();
                let word_hits = query_words
                    .iter()
                    .filter(|w| question_lower.contains(**w))
                    .count();

                let score = keyword_hits * 2 + word_hits;
                if score > 0 {
                    hits.push(FaqHit {
                        question: question.to_string(),
                        answer: answer.to_string(),
                        score,
                    });
                }
            }
        }

        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits
    }

    /// Find a product by id across `products` arrays in the sales category.
    pub fn get_product(&self, id: &str) -> Option<serde_json::Value> {
        let docs = self.docs.read().expect("knowledge index poisoned");
        docs.iter()
            .filter(|d| d.category == "sales")
            .filter_map(|d| d.data.get("products").and_then(|v| v.as_array()))
            .flatten()
            .find(|p| p.get("id").and_then(|v| v.as_str()) == Some(id))
            .cloned()
    }

    /// Assemble the persona-appropriate knowledge subset for one turn.
    ///
    /// Company profile and tone-of-voice are always included; persona-keyed
    /// blocks and any `uploaded-*` documents in the persona's category are
    /// added on top. FAQ matches against `message` land under `faq-matches`.
    pub fn find_relevant_data(
        &self,
        message: &str,
        persona: &str,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();

        if let Some(profile) = self.get("company", "profile") {
            out.insert("company-info".to_string(), profile.data);
        }
        if let Some(tone) = self.get("company", "tone-of-voice") {
            out.insert("tone-of-voice".to_string(), tone.data);
        }

        let block = PERSONA_BLOCKS.iter().find(|(key, _, _)| *key == persona);
        if let Some((_, category, subcategories)) = block {
            for sub in *subcategories {
                if let Some(doc) = self.get(category, sub) {
                    out.insert((*sub).to_string(), doc.data);
                }
            }

            let docs = self.docs.read().expect("knowledge index poisoned");
            for doc in docs
                .iter()
                .filter(|d| d.category == *category && d.subcategory.starts_with("uploaded-"))
            {
                out.insert(doc.subcategory.clone(), doc.data.clone());
            }
        }

        let faq_hits = self.search_faq(message);
        if !faq_hits.is_empty() {
            let rendered: Vec<serde_json::Value> = faq_hits
                .iter()
                .take(5)
                .map(|h| {
                    serde_json::json!({
                        "question": h.question,
                        "answer": h.answer,
                    })
                })
                .collect();
            out.insert("faq-matches".to_string(), serde_json::Value::Array(rendered));
        }

        out
    }
}

/// Read and (when the key is schema-bound) validate one document.
fn load_doc(category: &str, path: &Path) -> Option<KnowledgeDoc> {
    let subcategory = path.file_stem()?.to_string_lossy().to_string();

    let raw = match std::fs::read_to_string(path) {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable knowledge file");
            return None;
        }
    };

    let data: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping malformed knowledge file");
            return None;
        }
    };

    if let Err(reason) = validate(category, &subcategory, &data) {
        warn!(path = %path.display(), reason, "skipping knowledge file failing schema");
        return None;
    }

    Some(KnowledgeDoc {
        category: category.to_string(),
        subcategory,
        data,
    })
}

/// Schema checks for the documents the platform itself depends on.
/// Everything else is accepted verbatim.
fn validate(category: &str, subcategory: &str, data: &serde_json::Value) -> std::result::Result<(), &'static str> {
    match (category, subcategory) {
        ("company", "profile") => {
            if data.get("name").and_then(|v| v.as_str()).is_none() {
                return Err("company profile requires a string `name`");
            }
        }
        ("config", "routing-rules") => {
            let Some(rules) = data.get("rules").and_then(|v| v.as_array()) else {
                return Err("routing-rules requires a `rules` array");
            };
            for rule in rules {
                if rule.get("intent").and_then(|v| v.as_str()).is_none()
                    || rule.get("keywords").and_then(|v| v.as_array()).is_none()
                {
                    return Err("each routing rule requires `intent` and `keywords`");
                }
            }
        }
        ("config", "personas") => {
            let Some(personas) = data.get("personas").and_then(|v| v.as_array()) else {
                return Err("personas requires a `personas` array");
            };
            for p in personas {
                if p.get("key").and_then(|v| v.as_str()).is_none() {
                    return Err("each persona requires a string `key`");
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Flatten a document to one lowercase string: keys and scalar values,
/// whitespace-joined. Substring scoring runs over this rendering.
fn flatten(value: &serde_json::Value) -> String {
    let mut out = String::new();
    flatten_into(value, &mut out);
    out.to_lowercase()
}

fn flatten_into(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        serde_json::Value::Number(n) => {
            out.push_str(&n.to_string());
            out.push(' ');
        }
        serde_json::Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            out.push(' ');
        }
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                out.push_str(key);
                out.push(' ');
                flatten_into(val, out);
            }
        }
        serde_json::Value::Null => {}
    }
}

/// Count non-overlapping occurrences of `needle` in `haystack`.
fn count_hits(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn corpus(files: &[(&str, &str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for (category, name, content) in files {
            let cat_dir = dir.path().join(category);
            fs::create_dir_all(&cat_dir).expect("mkdir");
            fs::write(cat_dir.join(format!("{name}.json")), content).expect("write");
        }
        dir
    }

    #[test]
    fn loads_categories_and_skips_bad_files() {
        let dir = corpus(&[
            ("company", "profile", r#"{"name": "Acme", "website": "acme.example"}"#),
            ("sales", "products", r#"{"products": [{"id": "p1", "name": "Widget"}]}"#),
            ("support", "broken", "{not json"),
        ]);

        let index = KnowledgeIndex::load(dir.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.get("support", "broken").is_none());
        assert!(index.get("company", "profile").is_some());
    }

    #[test]
    fn schema_failure_skips_but_keeps_index_usable() {
        let dir = corpus(&[
            ("company", "profile", r#"{"website": "no-name.example"}"#),
            ("company", "tone-of-voice", r#"{"style": "warm"}"#),
        ]);

        let index = KnowledgeIndex::load(dir.path()).unwrap();
        assert!(index.get("company", "profile").is_none());
        assert!(index.get("company", "tone-of-voice").is_some());
    }

    #[test]
    fn keyword_search_ranks_by_hit_count() {
        let dir = corpus(&[
            (
                "sales",
                "products",
                r#"{"products": [{"name": "Blue widget"}, {"name": "Blue deluxe widget"}]}"#,
            ),
            ("support", "policies", r#"{"returns": "widgets may be returned"}"#),
        ]);

        let index = KnowledgeIndex::load(dir.path()).unwrap();
        let results = index.search_by_keywords(&["widget".to_string()], None);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc.subcategory, "products");
        assert!(results[0].relevance > results[1].relevance);

        let sales_only = index.search_by_keywords(&["widget".to_string()], Some("sales"));
        assert_eq!(sales_only.len(), 1);
    }

    #[test]
    fn faq_scoring_weights_keywords_double() {
        let dir = corpus(&[(
            "support",
            "faq",
            r#"{"faqs": [
                {"question": "How do refunds work?", "answer": "Within 30 days.", "keywords": ["refund"]},
                {"question": "Where do you ship?", "answer": "Worldwide.", "keywords": ["shipping"]}
            ]}"#,
        )]);

        let index = KnowledgeIndex::load(dir.path()).unwrap();
        let hits = index.search_faq("can I get a refund");
        assert_eq!(hits.len(), 1);
        // "refund" keyword (2) + "refund" not in question words... question
        // contains "refunds", so the word hit also lands.
        assert!(hits[0].score >= 2);
        assert_eq!(hits[0].answer, "Within 30 days.");
    }

    #[test]
    fn product_lookup_scans_sales_docs() {
        let dir = corpus(&[(
            "sales",
            "products",
            r#"{"products": [{"id": "p1", "name": "Widget", "price": 9}]}"#,
        )]);

        let index = KnowledgeIndex::load(dir.path()).unwrap();
        let product = index.get_product("p1").unwrap();
        assert_eq!(product["name"], "Widget");
        assert!(index.get_product("nope").is_none());
    }

    #[test]
    fn relevant_data_includes_company_persona_and_uploads() {
        let dir = corpus(&[
            ("company", "profile", r#"{"name": "Acme"}"#),
            ("company", "tone-of-voice", r#"{"style": "warm"}"#),
            ("sales", "products", r#"{"products": []}"#),
            ("sales", "uploaded-catalog-2026", r#"{"items": 12}"#),
            ("support", "faq", r#"{"faqs": []}"#),
        ]);

        let index = KnowledgeIndex::load(dir.path()).unwrap();
        let data = index.find_relevant_data("tell me about the catalog", "sales");

        assert!(data.contains_key("company-info"));
        assert!(data.contains_key("tone-of-voice"));
        assert!(data.contains_key("products"));
        assert!(data.contains_key("uploaded-catalog-2026"));
        // Support material stays out of the sales persona's subset.
        assert!(!data.contains_key("faq"));
    }

    #[test]
    fn reload_picks_up_new_files() {
        let dir = corpus(&[("company", "profile", r#"{"name": "Acme"}"#)]);
        let index = KnowledgeIndex::load(dir.path()).unwrap();
        assert_eq!(index.len(), 1);

        let support = dir.path().join("support");
        fs::create_dir_all(&support).unwrap();
        fs::write(support.join("faq.json"), r#"{"faqs": []}"#).unwrap();

        index.reload().unwrap();
        assert_eq!(index.len(), 2);
    }
}
