use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use parley_contacts::Contact;
use parley_conversations::{Conversation, ConversationStatus, Message};
use parley_knowledge::KnowledgeIndex;

use crate::detectors;
use crate::error::{AgentError, Result};
use crate::llm::{chat_with_retry, ChatRequest, LlmClient};
use crate::personas::{PersonaCatalog, PersonaConfig};
use crate::prompt::build_persona_prompt;
use crate::router::{Router, RoutingDecision};
use crate::sales;

/// Reply used when a rule detector forces handoff.
const HANDOFF_REPLY: &str =
    "Of course — I'm connecting you with a member of our team who can help right away.";

/// Reply used when the LLM is unavailable after all retries.
const FALLBACK_REPLY: &str =
    "I'm having trouble responding right now. Let me connect you with a human who can help.";

/// Confidence reported with the fallback reply — below 0.5 by contract.
const FALLBACK_CONFIDENCE: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentAction {
    Escalate,
    CloseConversation,
    Transfer,
}

impl AgentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentAction::Escalate => "escalate",
            AgentAction::CloseConversation => "close-conversation",
            AgentAction::Transfer => "transfer",
        }
    }
}

/// What a persona turn produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<AgentAction>,
    pub handoff: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_reason: Option<String>,
    pub confidence: f64,
    /// Persona key that produced this reply.
    pub agent: String,
}

/// The orchestrator's full result for one inbound turn.
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    pub response: AgentResponse,
    /// The (windowed) conversation copy with agent/context/status updates
    /// applied — the engine reconciles these fields back into the registry.
    pub conversation: Conversation,
    pub routing: Option<RoutingDecision>,
}

/// Routes between personas, runs the selected persona's turn, and decides
/// handoff/transfer. Never mutates registries — it works on the copy the
/// engine hands it.
pub struct AgentOrchestrator {
    llm: Arc<dyn LlmClient>,
    knowledge: Arc<KnowledgeIndex>,
    catalog: PersonaCatalog,
    router: Router,
    max_turns: u32,
}

impl AgentOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        knowledge: Arc<KnowledgeIndex>,
        catalog: PersonaCatalog,
        router: Router,
        max_turns: u32,
    ) -> Self {
        Self {
            llm,
            knowledge,
            catalog,
            router,
            max_turns,
        }
    }

    #[instrument(skip_all, fields(conversation_id = %conversation.id))]
    pub async fn handle(
        &self,
        message: &Message,
        mut conversation: Conversation,
        contact: &Contact,
    ) -> Result<OrchestratorOutcome> {
        // 1. Route when unassigned; otherwise consider a transfer.
        let routing = match conversation.current_agent_id.clone() {
            None => {
                let decision = self
                    .router
                    .route(
                        self.llm.as_ref(),
                        &self.knowledge,
                        &self.catalog,
                        &conversation,
                        message,
                    )
                    .await;
                conversation.current_agent_id = Some(decision.selected_agent.clone());
                apply_classification(&mut conversation, &decision);
                Some(decision)
            }
            Some(current) => {
                match self
                    .router
                    .check_transfer(&self.catalog, &current, &message.content)
                {
                    Some(decision) => {
                        conversation.current_agent_id = Some(decision.selected_agent.clone());
                        Some(decision)
                    }
                    None => None,
                }
            }
        };

        // 2. Resolve the persona; stale keys fall back to the default.
        let agent_key = conversation
            .current_agent_id
            .clone()
            .unwrap_or_else(|| self.catalog.default_key().to_string());
        let persona = match self.catalog.get(&agent_key) {
            Some(p) => p,
            None => {
                warn!(agent = %agent_key, "unknown persona key; using default");
                let default = self.catalog.default_key().to_string();
                conversation.current_agent_id = Some(default.clone());
                self.catalog
                    .get(&default)
                    .ok_or(AgentError::UnknownPersona(default))?
            }
        };

        // 3. Run the turn.
        let mut response = self
            .run_persona(persona, message, &mut conversation, contact, &routing)
            .await;

        if let Some(decision) = &routing {
            if decision.method == crate::router::RoutingMethod::Transfer {
                response.action.get_or_insert(AgentAction::Transfer);
            }
        }

        // 4. Handoff moves the conversation out of AI hands.
        if response.handoff {
            conversation.status = ConversationStatus::Handoff;
        }

        Ok(OrchestratorOutcome {
            response,
            conversation,
            routing,
        })
    }

    /// One persona turn: rule detectors may short-circuit before any LLM
    /// call; otherwise the persona prompt goes to the model with the
    /// persona's sampling settings.
    async fn run_persona(
        &self,
        persona: &PersonaConfig,
        message: &Message,
        conversation: &mut Conversation,
        contact: &Contact,
        routing: &Option<RoutingDecision>,
    ) -> AgentResponse {
        let agent = persona.key.clone();

        if persona.key == "sales" {
            conversation.context.lead_score = Some(sales::lead_score(conversation));
        }

        if let Some(reason) = self.detect_handoff(persona, message, conversation) {
            info!(agent = %agent, reason = %reason, "rule detector forced handoff");
            return AgentResponse {
                content: HANDOFF_REPLY.to_string(),
                action: Some(AgentAction::Escalate),
                handoff: true,
                handoff_reason: Some(reason),
                confidence: 1.0,
                agent,
            };
        }

        let prompt = build_persona_prompt(persona, message, conversation, contact, &self.knowledge);
        let request = ChatRequest {
            system: prompt.system,
            messages: prompt.history,
            temperature: persona.temperature,
            max_tokens: persona.max_tokens,
        };

        match chat_with_retry(self.llm.as_ref(), &request).await {
            Ok(outcome) => AgentResponse {
                content: outcome.content,
                action: None,
                handoff: false,
                handoff_reason: None,
                confidence: routing.as_ref().map(|r| r.confidence).unwrap_or(0.9),
                agent,
            },
            Err(e) => {
                warn!(agent = %agent, error = %e, "persona turn failed; sending fallback");
                AgentResponse {
                    content: FALLBACK_REPLY.to_string(),
                    action: Some(AgentAction::Escalate),
                    handoff: true,
                    handoff_reason: Some("assistant unavailable".to_string()),
                    confidence: FALLBACK_CONFIDENCE,
                    agent,
                }
            }
        }
    }

    /// All rule-based handoff detectors, cheapest first. Returns the reason
    /// when any fires.
    fn detect_handoff(
        &self,
        persona: &PersonaConfig,
        message: &Message,
        conversation: &Conversation,
    ) -> Option<String> {
        if detectors::wants_human(&message.content) {
            return Some("customer requested a human agent".to_string());
        }

        let inbound_turns = conversation.inbound_count() as u32;
        if inbound_turns > self.max_turns {
            return Some(format!(
                "conversation exceeded {} turns without resolution",
                self.max_turns
            ));
        }

        let inbound = conversation.last_inbound(detectors::NEGATIVE_STREAK_LIMIT);
        if detectors::negative_streak(&inbound) >= detectors::NEGATIVE_STREAK_LIMIT {
            return Some("repeated negative sentiment".to_string());
        }

        if persona.key == "support" {
            if detectors::mentions_refund(&message.content) {
                return Some("refund or return request".to_string());
            }
            let window = conversation.last_inbound(5);
            let score = detectors::frustration_score(&window);
            if score >= detectors::FRUSTRATION_THRESHOLD {
                return Some(format!("customer frustration (score {score})"));
            }
        }

        None
    }
}

fn apply_classification(conversation: &mut Conversation, decision: &RoutingDecision) {
    if decision.intent.is_some() {
        conversation.context.intent = decision.intent.clone();
    }
    if decision.sentiment.is_some() {
        conversation.context.sentiment = decision.sentiment.clone();
    }
    if decision.language.is_some() {
        conversation.context.language = decision.language.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatOutcome, LlmError};
    use crate::router::RoutingMethod;
    use async_trait::async_trait;
    use parley_conversations::Direction;
    use parley_core::types::Channel;
    use std::sync::Mutex;

    /// Replies with the queued responses in order; panics when exhausted.
    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat(&self, _req: &ChatRequest) -> std::result::Result<ChatOutcome, LlmError> {
            let content = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .expect("unexpected extra LLM call");
            Ok(ChatOutcome {
                content,
                input_tokens: 10,
                output_tokens: 10,
            })
        }
    }

    /// Panics if any call reaches it — proves a path is LLM-free.
    struct MustNotCall;

    #[async_trait]
    impl LlmClient for MustNotCall {
        async fn chat(&self, _req: &ChatRequest) -> std::result::Result<ChatOutcome, LlmError> {
            panic!("LLM must not be called on this path");
        }
    }

    struct AlwaysDown;

    #[async_trait]
    impl LlmClient for AlwaysDown {
        async fn chat(&self, _req: &ChatRequest) -> std::result::Result<ChatOutcome, LlmError> {
            Err(LlmError::Http("connection refused".to_string()))
        }
    }

    fn orchestrator(llm: Arc<dyn LlmClient>) -> AgentOrchestrator {
        let dir = tempfile::tempdir().unwrap();
        let knowledge = Arc::new(KnowledgeIndex::load(dir.path()).unwrap());
        AgentOrchestrator::new(
            llm,
            knowledge,
            PersonaCatalog::builtin_only(),
            Router::new(0.6),
            50,
        )
    }

    fn turn(content: &str, agent: Option<&str>) -> (Contact, Conversation, Message) {
        let contact = Contact::new("+100", Channel::Whatsapp, Some("Maya".to_string()));
        let mut conversation = Conversation::new(&contact.id, Channel::Whatsapp);
        conversation.current_agent_id = agent.map(String::from);
        let message = Message::new(
            &conversation.id,
            &contact.id,
            Direction::Inbound,
            content,
            Channel::Whatsapp,
        );
        conversation.messages.push(message.clone());
        (contact, conversation, message)
    }

    #[tokio::test]
    async fn routes_then_replies() {
        let llm = Arc::new(ScriptedClient::new(&[
            r#"{"intent": "sales", "confidence": 0.9, "language": "en", "sentiment": "positive", "summary": "purchase"}"#,
            "Happy to help you pick a product!",
        ]));
        let orch = orchestrator(llm);
        let (contact, conversation, message) = turn("I want to buy a product", None);

        let outcome = orch.handle(&message, conversation, &contact).await.unwrap();

        assert_eq!(outcome.response.agent, "sales");
        assert!(!outcome.response.handoff);
        assert_eq!(outcome.response.content, "Happy to help you pick a product!");
        assert_eq!(
            outcome.conversation.current_agent_id.as_deref(),
            Some("sales")
        );
        assert_eq!(outcome.conversation.context.intent.as_deref(), Some("sales"));
        let routing = outcome.routing.unwrap();
        assert_eq!(routing.method, RoutingMethod::Llm);
    }

    #[tokio::test]
    async fn explicit_human_request_short_circuits_without_llm() {
        let orch = orchestrator(Arc::new(MustNotCall));
        let (contact, conversation, message) =
            turn("I want to speak to a human agent now", Some("support"));

        let outcome = orch.handle(&message, conversation, &contact).await.unwrap();

        assert!(outcome.response.handoff);
        assert!(outcome
            .response
            .handoff_reason
            .as_deref()
            .unwrap()
            .contains("human"));
        assert_eq!(outcome.conversation.status, ConversationStatus::Handoff);
        assert!(!outcome.response.content.is_empty());
    }

    #[tokio::test]
    async fn frustration_escalates_without_llm() {
        let orch = orchestrator(Arc::new(MustNotCall));
        let contact = Contact::new("+1", Channel::Web, None);
        let mut conversation = Conversation::new(&contact.id, Channel::Web);
        conversation.current_agent_id = Some("support".to_string());
        for content in ["TERRIBLE SERVICE!!!", "UNACCEPTABLE", "worst experience"] {
            conversation.messages.push(Message::new(
                &conversation.id,
                &contact.id,
                Direction::Inbound,
                content,
                Channel::Web,
            ));
        }
        let message = conversation.messages.last().unwrap().clone();

        let outcome = orch.handle(&message, conversation, &contact).await.unwrap();

        assert!(outcome.response.handoff);
        let reason = outcome.response.handoff_reason.unwrap();
        assert!(reason.contains("frustration") || reason.contains("negative"));
        assert_eq!(outcome.conversation.status, ConversationStatus::Handoff);
    }

    #[tokio::test(start_paused = true)]
    async fn llm_exhaustion_sends_fallback_and_flags_handoff() {
        let orch = orchestrator(Arc::new(AlwaysDown));
        let (contact, conversation, message) = turn("tell me about pricing", Some("sales"));

        let outcome = orch.handle(&message, conversation, &contact).await.unwrap();

        assert!(outcome.response.handoff);
        assert!(outcome.response.confidence < 0.5);
        assert_eq!(outcome.response.content, FALLBACK_REPLY);
        assert_eq!(outcome.conversation.status, ConversationStatus::Handoff);
    }

    #[tokio::test]
    async fn mismatched_content_transfers_personas() {
        let llm = Arc::new(ScriptedClient::new(&["Let me fix that for you."]));
        let orch = orchestrator(llm);
        let (contact, conversation, message) =
            turn("my widget arrived broken, i need help", Some("sales"));

        let outcome = orch.handle(&message, conversation, &contact).await.unwrap();

        assert_eq!(
            outcome.conversation.current_agent_id.as_deref(),
            Some("support")
        );
        let routing = outcome.routing.unwrap();
        assert_eq!(routing.method, RoutingMethod::Transfer);
        assert_eq!(outcome.response.action, Some(AgentAction::Transfer));
    }

    #[tokio::test]
    async fn sales_turns_maintain_lead_score() {
        let llm = Arc::new(ScriptedClient::new(&["Our widget costs $9."]));
        let orch = orchestrator(llm);
        let (contact, conversation, message) = turn("what's the price", Some("sales"));

        let outcome = orch.handle(&message, conversation, &contact).await.unwrap();

        // base 20 + one inbound (+5) + one buying signal (+8).
        assert_eq!(outcome.conversation.context.lead_score, Some(33));
    }

    #[tokio::test]
    async fn turn_limit_forces_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let knowledge = Arc::new(KnowledgeIndex::load(dir.path()).unwrap());
        let orch = AgentOrchestrator::new(
            Arc::new(MustNotCall),
            knowledge,
            PersonaCatalog::builtin_only(),
            Router::new(0.6),
            2, // tiny limit for the test
        );

        let contact = Contact::new("+1", Channel::Web, None);
        let mut conversation = Conversation::new(&contact.id, Channel::Web);
        conversation.current_agent_id = Some("support".to_string());
        for i in 0..3 {
            conversation.messages.push(Message::new(
                &conversation.id,
                &contact.id,
                Direction::Inbound,
                format!("question {i}"),
                Channel::Web,
            ));
        }
        let message = conversation.messages.last().unwrap().clone();

        let outcome = orch.handle(&message, conversation, &contact).await.unwrap();
        assert!(outcome.response.handoff);
        assert!(outcome.response.handoff_reason.unwrap().contains("turns"));
    }
}
