pub mod detectors;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod personas;
pub mod prompt;
pub mod router;
pub mod sales;

pub use error::{AgentError, Result};
pub use llm::{chat_json, ChatMessage, ChatOutcome, ChatRequest, ChatRole, HttpLlmClient, LlmClient};
pub use orchestrator::{AgentAction, AgentOrchestrator, AgentResponse, OrchestratorOutcome};
pub use personas::{PersonaCatalog, PersonaConfig};
pub use router::{Router, RoutingDecision, RoutingMethod};
