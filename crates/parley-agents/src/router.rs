use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use parley_conversations::{Conversation, Message};
use parley_knowledge::KnowledgeIndex;

use crate::llm::{chat_with_retry, strip_code_fence, ChatRequest, LlmClient};
use crate::personas::{intent_to_persona, PersonaCatalog, PersonaConfig};
use crate::prompt::build_router_prompt;

/// Keyword-fallback confidence floor when nothing matches.
const NO_HIT_CONFIDENCE: f64 = 0.3;
/// Keyword-fallback confidence cap.
const MAX_KEYWORD_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMethod {
    Llm,
    Keyword,
    Transfer,
}

/// The router's verdict for one inbound message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub selected_agent: String,
    /// Always within [0, 1].
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub method: RoutingMethod,
}

/// The JSON classification requested from the LLM.
#[derive(Debug, Deserialize)]
struct RouterClassification {
    intent: String,
    confidence: f64,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Picks a persona for an unassigned conversation, or proposes a
/// mid-conversation transfer.
pub struct Router {
    confidence_threshold: f64,
}

impl Router {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
        }
    }

    /// Route an inbound message: LLM classification first, keyword scoring
    /// as the fallback when the call fails or confidence is too low.
    #[instrument(skip_all, fields(conversation_id = %conversation.id))]
    pub async fn route(
        &self,
        llm: &dyn LlmClient,
        knowledge: &KnowledgeIndex,
        catalog: &PersonaCatalog,
        conversation: &Conversation,
        message: &Message,
    ) -> RoutingDecision {
        let prompt = build_router_prompt(knowledge, conversation, message);
        let request = ChatRequest {
            system: prompt.system,
            messages: prompt.history,
            temperature: 0.0,
            max_tokens: 300,
        };

        match chat_with_retry(llm, &request).await {
            Ok(outcome) => {
                match serde_json::from_str::<RouterClassification>(strip_code_fence(
                    &outcome.content,
                )) {
                    Ok(c) if c.confidence >= self.confidence_threshold => {
                        let selected =
                            self.select_persona(catalog, &c.intent, &message.content);
                        info!(intent = %c.intent, agent = %selected, "routed via LLM");
                        RoutingDecision {
                            selected_agent: selected,
                            confidence: c.confidence.clamp(0.0, 1.0),
                            intent: Some(c.intent),
                            language: c.language,
                            sentiment: c.sentiment,
                            summary: c.summary,
                            method: RoutingMethod::Llm,
                        }
                    }
                    Ok(c) => {
                        debug!(
                            confidence = c.confidence,
                            threshold = self.confidence_threshold,
                            "LLM classification below threshold; using keywords"
                        );
                        self.keyword_fallback(knowledge, catalog, &message.content)
                    }
                    Err(e) => {
                        warn!(error = %e, "router classification unparseable; using keywords");
                        self.keyword_fallback(knowledge, catalog, &message.content)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "router LLM call failed; using keywords");
                self.keyword_fallback(knowledge, catalog, &message.content)
            }
        }
    }

    /// Score routing rules from the knowledge corpus against the content.
    ///
    /// Confidence: min(0.5 + hits·0.1, 0.85) when anything hits, else 0.3.
    pub fn keyword_fallback(
        &self,
        knowledge: &KnowledgeIndex,
        catalog: &PersonaCatalog,
        content: &str,
    ) -> RoutingDecision {
        let lowered = content.to_lowercase();
        let mut best: Option<(String, usize)> = None;

        if let Some(doc) = knowledge.get("config", "routing-rules") {
            if let Some(rules) = doc.data.get("rules").and_then(|v| v.as_array()) {
                for rule in rules {
                    let Some(intent) = rule.get("intent").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let hits = rule
                        .get("keywords")
                        .and_then(|v| v.as_array())
                        .map(|keys| {
                            keys.iter()
                                .filter_map(|k| k.as_str())
                                .filter(|k| lowered.contains(&k.to_lowercase()))
                                .count()
                        })
                        .unwrap_or(0);
                    if hits > 0 && best.as_ref().map_or(true, |(_, b)| hits > *b) {
                        best = Some((intent.to_string(), hits));
                    }
                }
            }
        }

        let (intent, hits) = best.unwrap_or_else(|| ("support".to_string(), 0));
        let confidence = if hits > 0 {
            (0.5 + hits as f64 * 0.1).min(MAX_KEYWORD_CONFIDENCE)
        } else {
            NO_HIT_CONFIDENCE
        };

        let selected = self.select_persona(catalog, &intent, content);
        RoutingDecision {
            selected_agent: selected,
            confidence,
            intent: Some(intent),
            language: None,
            sentiment: None,
            summary: None,
            method: RoutingMethod::Keyword,
        }
    }

    /// Map an intent to a persona key.
    ///
    /// With a custom catalog the candidates are ranked by content keywords
    /// (routing keywords ×2, topic names ×1) with the catalog default as
    /// fallback; otherwise the fixed intent map applies.
    fn select_persona(&self, catalog: &PersonaCatalog, intent: &str, content: &str) -> String {
        if !catalog.has_custom() {
            return intent_to_persona(intent).to_string();
        }

        let ranked = rank_candidates(catalog.routing_candidates(), content);
        ranked
            .into_iter()
            .find(|(_, score)| *score > 0)
            .map(|(key, _)| key)
            .unwrap_or_else(|| catalog.default_key().to_string())
    }

    /// Propose a mid-conversation transfer: the content must score for
    /// another persona and not at all for the current one.
    pub fn check_transfer(
        &self,
        catalog: &PersonaCatalog,
        current_agent: &str,
        content: &str,
    ) -> Option<RoutingDecision> {
        let scores = rank_candidates(catalog.routing_candidates(), content);
        let current_score = scores
            .iter()
            .find(|(key, _)| key.as_str() == current_agent)
            .map(|(_, s)| *s)
            .unwrap_or(0);
        if current_score > 0 {
            return None;
        }

        let (target, score) = scores
            .into_iter()
            .find(|(key, score)| key.as_str() != current_agent && *score > 0)?;

        info!(from = current_agent, to = %target, score, "proposing persona transfer");
        Some(RoutingDecision {
            selected_agent: target,
            confidence: (0.5 + score as f64 * 0.1).min(MAX_KEYWORD_CONFIDENCE),
            intent: None,
            language: None,
            sentiment: None,
            summary: None,
            method: RoutingMethod::Transfer,
        })
    }
}

/// Score every candidate: routing keyword hits ×2 plus topic name hits ×1,
/// sorted best first.
fn rank_candidates(candidates: &[PersonaConfig], content: &str) -> Vec<(String, usize)> {
    let lowered = content.to_lowercase();
    let mut scored: Vec<(String, usize)> = candidates
        .iter()
        .map(|p| {
            let keyword_hits = p
                .routing_keywords
                .iter()
                .filter(|k| lowered.contains(&k.to_lowercase()))
                .count();
            let topic_hits = p
                .topics
                .iter()
                .filter(|t| lowered.contains(&t.to_lowercase()))
                .count();
            (p.key.clone(), keyword_hits * 2 + topic_hits)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatOutcome, LlmError};
    use async_trait::async_trait;
    use parley_core::types::Channel;

    struct FixedClient(String);

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatOutcome, LlmError> {
            Ok(ChatOutcome {
                content: self.0.clone(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    struct DownClient;

    #[async_trait]
    impl LlmClient for DownClient {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatOutcome, LlmError> {
            Err(LlmError::Http("connection refused".to_string()))
        }
    }

    fn knowledge_with_rules() -> (tempfile::TempDir, KnowledgeIndex) {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        std::fs::create_dir_all(&config).unwrap();
        std::fs::write(
            config.join("routing-rules.json"),
            serde_json::json!({
                "rules": [
                    {"intent": "sales", "keywords": ["buy", "price", "product", "order"]},
                    {"intent": "support", "keywords": ["help", "broken", "issue"]}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let index = KnowledgeIndex::load(dir.path()).unwrap();
        (dir, index)
    }

    fn turn(content: &str) -> (Conversation, Message) {
        let conversation = Conversation::new("c1", Channel::Whatsapp);
        let message = Message::new(
            &conversation.id,
            "c1",
            parley_conversations::Direction::Inbound,
            content,
            Channel::Whatsapp,
        );
        (conversation, message)
    }

    #[tokio::test]
    async fn confident_llm_classification_wins() {
        let (_dir, knowledge) = knowledge_with_rules();
        let catalog = PersonaCatalog::builtin_only();
        let router = Router::new(0.6);
        let llm = FixedClient(
            r#"{"intent": "sales", "confidence": 0.9, "language": "en", "sentiment": "positive", "summary": "wants to buy"}"#.to_string(),
        );
        let (conversation, message) = turn("I want to buy a product");

        let decision = router
            .route(&llm, &knowledge, &catalog, &conversation, &message)
            .await;

        assert_eq!(decision.selected_agent, "sales");
        assert_eq!(decision.method, RoutingMethod::Llm);
        assert!((decision.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn llm_failure_falls_back_to_keywords() {
        let (_dir, knowledge) = knowledge_with_rules();
        let catalog = PersonaCatalog::builtin_only();
        let router = Router::new(0.6);
        let (conversation, message) = turn("What is the price of your product?");

        let decision = router
            .route(&DownClient, &knowledge, &catalog, &conversation, &message)
            .await;

        assert_eq!(decision.selected_agent, "sales");
        assert_eq!(decision.method, RoutingMethod::Keyword);
        // Two rule hits: "price" and "product" → 0.5 + 0.2.
        assert!((decision.confidence - 0.7).abs() < 1e-9);
        assert!(decision.confidence >= 0.3 && decision.confidence <= 0.85);
    }

    #[tokio::test]
    async fn low_confidence_classification_also_falls_back() {
        let (_dir, knowledge) = knowledge_with_rules();
        let catalog = PersonaCatalog::builtin_only();
        let router = Router::new(0.6);
        let llm = FixedClient(r#"{"intent": "sales", "confidence": 0.2}"#.to_string());
        let (conversation, message) = turn("hmm");

        let decision = router
            .route(&llm, &knowledge, &catalog, &conversation, &message)
            .await;

        assert_eq!(decision.method, RoutingMethod::Keyword);
        // No keyword hits at all → support at 0.3.
        assert_eq!(decision.selected_agent, "support");
        assert!((decision.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn keyword_confidence_caps_at_085() {
        let (_dir, knowledge) = knowledge_with_rules();
        let catalog = PersonaCatalog::builtin_only();
        let router = Router::new(0.6);

        let decision = router.keyword_fallback(
            &knowledge,
            &catalog,
            "buy buy: price of the product, an order please",
        );
        assert!(decision.confidence <= 0.85);
    }

    #[test]
    fn transfer_fires_only_when_current_persona_misses() {
        let catalog = PersonaCatalog::builtin_only();
        let router = Router::new(0.6);

        // Clearly a support question while sales is assigned.
        let proposal = router.check_transfer(&catalog, "sales", "my widget is broken, help");
        assert_eq!(proposal.unwrap().selected_agent, "support");

        // Content matching the current persona stays put.
        assert!(router
            .check_transfer(&catalog, "sales", "what does it cost to buy one")
            .is_none());

        // Content matching nobody stays put too.
        assert!(router.check_transfer(&catalog, "sales", "good morning").is_none());
    }
}
