use std::sync::{Arc, Mutex};

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_agents::{AgentOrchestrator, HttpLlmClient, PersonaCatalog, Router as AgentRouter};
use parley_broadcast::{Broadcast, BroadcastManager};
use parley_channels::{ChannelAdapter, ChannelManager, WebChannel};
use parley_contacts::{Contact, ContactRegistry};
use parley_conversations::{Conversation, ConversationRegistry};
use parley_core::config::DEFAULT_CONTEXT_TOKENS;
use parley_core::ParleyConfig;
use parley_engine::{ConversationEngine, EngineDeps, EventBus, EventListener};
use parley_flows::{
    spawn_resume_pump, spawn_scheduled_fire_pump, ActionRunner, CronScheduler, Flow, FlowEngine,
    FlowExecution, TokioDelayHandler, TriggerKind, TriggerManager,
};
use parley_knowledge::KnowledgeIndex;
use parley_store::{MemoryStore, SqliteStore, Store};
use parley_templates::{Template, TemplateManager};

use crate::http;

/// Central shared state — passed as `Arc<AppState>` to all axum handlers.
pub struct AppState {
    pub config: ParleyConfig,
    pub engine: ConversationEngine,
    pub contacts: Arc<ContactRegistry>,
    pub conversations: Arc<ConversationRegistry>,
    pub knowledge: Arc<KnowledgeIndex>,
    pub channels: Arc<ChannelManager>,
    pub flows: Arc<FlowEngine>,
    pub scheduler: Arc<CronScheduler>,
    pub broadcasts: Arc<BroadcastManager>,
    pub templates: Arc<TemplateManager>,
    shutdown_tx: watch::Sender<bool>,
}

/// One store per record type, over the backend the config selects.
fn build_store<T: parley_store::Record>(
    conn: &Option<Arc<Mutex<rusqlite::Connection>>>,
    table: &str,
) -> anyhow::Result<Arc<dyn Store<T>>> {
    Ok(match conn {
        Some(conn) => Arc::new(SqliteStore::<T>::new(Arc::clone(conn), table)?),
        None => Arc::new(MemoryStore::<T>::new()),
    })
}

impl AppState {
    pub async fn build(config: ParleyConfig) -> anyhow::Result<Self> {
        // Persistence backend: SQLite when a path is configured.
        let conn = match &config.database.path {
            Some(path) => {
                info!(path, "opening sqlite store");
                Some(Arc::new(Mutex::new(rusqlite::Connection::open(path)?)))
            }
            None => None,
        };

        let contacts = Arc::new(ContactRegistry::new(build_store::<Contact>(
            &conn, "contacts",
        )?));
        let conversations = Arc::new(ConversationRegistry::new(build_store::<Conversation>(
            &conn,
            "conversations",
        )?));

        let knowledge = Arc::new(KnowledgeIndex::load(config.knowledge.root.as_str())?);
        let catalog = PersonaCatalog::from_knowledge(&knowledge);
        let llm = Arc::new(HttpLlmClient::new(&config.llm));
        let orchestrator = Arc::new(AgentOrchestrator::new(
            llm,
            Arc::clone(&knowledge),
            catalog,
            AgentRouter::new(config.routing.confidence_threshold),
            config.routing.max_turns,
        ));

        let channels = Arc::new(ChannelManager::new());
        channels.register(Arc::new(WebChannel::new(None)) as Arc<dyn ChannelAdapter>);

        let bus = Arc::new(EventBus::new());
        let engine = ConversationEngine::new(EngineDeps {
            contacts: Arc::clone(&contacts),
            conversations: Arc::clone(&conversations),
            orchestrator,
            channels: Arc::clone(&channels),
            bus: Arc::clone(&bus),
            context_tokens: DEFAULT_CONTEXT_TOKENS,
        });

        // Flow subsystem: engine, resume pump, trigger bridge, cron loop.
        let (delay, resume_rx) = TokioDelayHandler::new();
        let flows = Arc::new(FlowEngine::new(
            build_store::<Flow>(&conn, "flows")?,
            build_store::<FlowExecution>(&conn, "flow_executions")?,
            ActionRunner::new(
                Arc::clone(&channels),
                Arc::clone(&contacts),
                Arc::clone(&conversations),
            ),
            Arc::new(delay),
        ));
        spawn_resume_pump(Arc::clone(&flows), resume_rx);

        let triggers = TriggerManager::new(
            Arc::clone(&flows),
            config.business_hours.clone(),
        );
        bus.subscribe("flow-triggers", triggers as Arc<dyn EventListener>);

        let (fired_tx, fired_rx) = tokio::sync::mpsc::channel(64);
        let scheduler = Arc::new(CronScheduler::new(fired_tx));
        spawn_scheduled_fire_pump(Arc::clone(&flows), fired_rx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

        // Re-arm cron entries for flows that were active before a restart.
        for flow in flows.active_flows(TriggerKind::Scheduled).await? {
            if let Err(e) = scheduler.register(&flow) {
                warn!(flow_id = %flow.id, error = %e, "could not re-register scheduled flow");
            }
        }

        let broadcasts = BroadcastManager::new(
            build_store::<Broadcast>(&conn, "broadcasts")?,
            Arc::clone(&contacts),
            Arc::clone(&channels),
        );
        let templates = Arc::new(TemplateManager::new(build_store::<Template>(
            &conn,
            "templates",
        )?));

        Ok(Self {
            config,
            engine,
            contacts,
            conversations,
            knowledge,
            channels,
            flows,
            scheduler,
            broadcasts,
            templates,
            shutdown_tx,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health))
        // Inbound seam
        .route("/messages/incoming", post(http::messages::incoming))
        .route("/webhooks/{channel}", post(http::messages::webhook))
        // Contacts
        .route("/contacts", get(http::contacts::list))
        .route("/contacts/{id}", get(http::contacts::get))
        .route("/contacts/{id}/tags", post(http::contacts::add_tag))
        .route("/contacts/{id}/tags/{tag}", delete(http::contacts::remove_tag))
        // Conversations
        .route("/conversations", get(http::conversations::list))
        .route("/conversations/stats", get(http::conversations::stats))
        .route("/conversations/{id}", get(http::conversations::get))
        .route("/conversations/{id}/history", get(http::conversations::history))
        .route("/conversations/{id}/handoff", post(http::conversations::handoff))
        .route("/conversations/{id}/resume", post(http::conversations::resume))
        .route("/conversations/{id}/pause", post(http::conversations::pause))
        .route("/conversations/{id}/close", post(http::conversations::close))
        .route("/conversations/{id}/reopen", post(http::conversations::reopen))
        .route(
            "/conversations/{id}/human-reply",
            post(http::conversations::human_reply),
        )
        // Automation: flows
        .route("/flows", get(http::automation::list_flows).post(http::automation::create_flow))
        .route("/flows/{id}", get(http::automation::get_flow).delete(http::automation::delete_flow))
        .route("/flows/{id}/activate", post(http::automation::activate_flow))
        .route("/flows/{id}/deactivate", post(http::automation::deactivate_flow))
        .route("/flows/{id}/execute", post(http::automation::execute_flow))
        .route("/executions", get(http::automation::list_executions))
        .route("/executions/{id}", get(http::automation::get_execution))
        .route("/executions/{id}/resume", post(http::automation::resume_execution))
        // Automation: broadcasts
        .route(
            "/broadcasts",
            get(http::automation::list_broadcasts).post(http::automation::create_broadcast),
        )
        .route("/broadcasts/{id}", get(http::automation::get_broadcast))
        .route("/broadcasts/{id}/send", post(http::automation::send_broadcast))
        .route("/broadcasts/{id}/cancel", post(http::automation::cancel_broadcast))
        // Automation: templates
        .route(
            "/templates",
            get(http::automation::list_templates).post(http::automation::create_template),
        )
        .route(
            "/templates/{id}",
            get(http::automation::get_template).delete(http::automation::delete_template),
        )
        .route("/templates/{id}/render", post(http::automation::render_template))
        // Knowledge
        .route("/knowledge/reload", post(http::automation::reload_knowledge))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
