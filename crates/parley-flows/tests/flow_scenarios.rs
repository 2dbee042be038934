//! Flow engine scenarios: wait/resume, condition gates, failure handling,
//! and trigger matching — all over in-memory stores and the web adapter.

use std::sync::{Arc, Mutex};

use parley_channels::{ChannelAdapter, ChannelManager, OutboundContent, WebChannel};
use parley_contacts::{Contact, ContactRegistry};
use parley_conversations::{Conversation, ConversationRegistry};
use parley_core::config::BusinessHoursConfig;
use parley_core::types::{Channel, Metadata};
use parley_flows::{
    ActionKind, ActionRunner, Condition, ConditionOperator, DelayHandler, ExecutionStatus, Flow,
    FlowAction, FlowEngine, FlowExecution, FlowStep, TriggerKind, TriggerManager,
};
use parley_store::MemoryStore;

/// Records every schedule call instead of sleeping.
#[derive(Default)]
struct RecordingDelay {
    calls: Mutex<Vec<(String, String, u64)>>,
}

impl RecordingDelay {
    fn calls(&self) -> Vec<(String, String, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

impl DelayHandler for RecordingDelay {
    fn schedule(&self, execution_id: &str, step_id: &str, delay_ms: u64) {
        self.calls
            .lock()
            .unwrap()
            .push((execution_id.to_string(), step_id.to_string(), delay_ms));
    }
}

struct Fixture {
    engine: Arc<FlowEngine>,
    contacts: Arc<ContactRegistry>,
    web: Arc<WebChannel>,
    delay: Arc<RecordingDelay>,
}

fn fixture() -> Fixture {
    let contacts = Arc::new(ContactRegistry::new(Arc::new(MemoryStore::<Contact>::new())));
    let conversations = Arc::new(ConversationRegistry::new(Arc::new(
        MemoryStore::<Conversation>::new(),
    )));
    let channels = Arc::new(ChannelManager::new());
    let web = Arc::new(WebChannel::new(None));
    channels.register(Arc::clone(&web) as Arc<dyn ChannelAdapter>);

    let delay = Arc::new(RecordingDelay::default());
    let engine = Arc::new(FlowEngine::new(
        Arc::new(MemoryStore::<Flow>::new()),
        Arc::new(MemoryStore::<FlowExecution>::new()),
        ActionRunner::new(channels, Arc::clone(&contacts), conversations),
        Arc::clone(&delay) as Arc<dyn DelayHandler>,
    ));

    Fixture {
        engine,
        contacts,
        web,
        delay,
    }
}

fn step(kind: ActionKind, config: serde_json::Value) -> FlowStep {
    let config: Metadata = config.as_object().cloned().unwrap_or_default();
    FlowStep::new(FlowAction { kind, config })
}

async fn register_active(engine: &FlowEngine, mut flow: Flow) -> Flow {
    flow.active = true;
    engine.register(flow).await.unwrap()
}

#[tokio::test]
async fn wait_suspends_exactly_once_and_resume_completes() {
    let fx = fixture();

    let wait_step = step(
        ActionKind::Wait,
        serde_json::json!({"duration": 5, "unit": "minutes"}),
    );
    let send_step = step(
        ActionKind::SendMessage,
        serde_json::json!({"message": "Delayed hello"}),
    );
    let send_step_id = send_step.id.clone();
    let flow = register_active(
        &fx.engine,
        Flow::new("delayed greeting", TriggerKind::MessageReceived, vec![wait_step, send_step]),
    )
    .await;

    let execution = fx
        .engine
        .execute(
            &flow.id,
            serde_json::json!({"channel": "web", "channelUserId": "+100"}),
        )
        .await
        .unwrap();

    // Suspended at the send step; the delay handler saw exactly one call
    // with the computed milliseconds.
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.current_step_id.as_deref(), Some(send_step_id.as_str()));
    let calls = fx.delay.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, send_step_id);
    assert_eq!(calls[0].2, 300_000);
    assert!(fx.web.sent().is_empty());

    // Resume delivers the message once and completes.
    let resumed = fx.engine.resume(&execution.id, &send_step_id).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    let sent = fx.web.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0].content,
        OutboundContent::Text { body } if body == "Delayed hello"
    ));

    // Resuming again is a no-op.
    let again = fx.engine.resume(&execution.id, &send_step_id).await.unwrap();
    assert_eq!(again.status, ExecutionStatus::Completed);
    assert_eq!(fx.web.sent().len(), 1);
}

#[tokio::test]
async fn concurrent_resumes_run_the_step_once() {
    let fx = fixture();

    let wait_step = step(
        ActionKind::Wait,
        serde_json::json!({"duration": 1, "unit": "seconds"}),
    );
    let send_step = step(
        ActionKind::SendMessage,
        serde_json::json!({"message": "exactly once"}),
    );
    let send_step_id = send_step.id.clone();
    let flow = register_active(
        &fx.engine,
        Flow::new("raced", TriggerKind::MessageReceived, vec![wait_step, send_step]),
    )
    .await;

    let execution = fx
        .engine
        .execute(
            &flow.id,
            serde_json::json!({"channel": "web", "channelUserId": "+1"}),
        )
        .await
        .unwrap();

    // The delay pump and an external resume call can land together; only
    // one may run the suspended step.
    let (a, b) = tokio::join!(
        fx.engine.resume(&execution.id, &send_step_id),
        fx.engine.resume(&execution.id, &send_step_id),
    );
    assert_eq!(a.unwrap().status, ExecutionStatus::Completed);
    assert_eq!(b.unwrap().status, ExecutionStatus::Completed);
    assert_eq!(fx.web.sent().len(), 1);
}

#[tokio::test]
async fn false_conditions_skip_the_action_but_not_the_flow() {
    let fx = fixture();

    let mut gated = step(
        ActionKind::SendMessage,
        serde_json::json!({"message": "only for telegram"}),
    );
    gated.conditions = vec![Condition {
        field: "channel".to_string(),
        operator: ConditionOperator::Equals,
        value: serde_json::json!("telegram"),
    }];
    let always = step(
        ActionKind::SendMessage,
        serde_json::json!({"message": "for everyone"}),
    );

    let flow = register_active(
        &fx.engine,
        Flow::new("gated", TriggerKind::MessageReceived, vec![gated, always]),
    )
    .await;

    let execution = fx
        .engine
        .execute(
            &flow.id,
            serde_json::json!({"channel": "web", "channelUserId": "+1"}),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let sent = fx.web.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0].content,
        OutboundContent::Text { body } if body == "for everyone"
    ));
}

#[tokio::test]
async fn failing_webhook_marks_execution_failed_and_stops() {
    let fx = fixture();

    let webhook = step(
        ActionKind::Webhook,
        // Nothing listens here; connection is refused immediately.
        serde_json::json!({"url": "http://127.0.0.1:9/hook", "timeoutSecs": 1}),
    );
    let after = step(
        ActionKind::SendMessage,
        serde_json::json!({"message": "never sent"}),
    );

    let flow = register_active(
        &fx.engine,
        Flow::new("webhooked", TriggerKind::MessageReceived, vec![webhook, after]),
    )
    .await;

    let execution = fx
        .engine
        .execute(
            &flow.id,
            serde_json::json!({"channel": "web", "channelUserId": "+1"}),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.is_some());
    assert!(execution.completed_at.is_some());
    assert!(fx.web.sent().is_empty());
}

#[tokio::test]
async fn inactive_flows_refuse_to_execute() {
    let fx = fixture();
    let flow = fx
        .engine
        .register(Flow::new(
            "dormant",
            TriggerKind::MessageReceived,
            vec![step(ActionKind::AddTag, serde_json::json!({"tag": "x"}))],
        ))
        .await
        .unwrap();

    assert!(fx
        .engine
        .execute(&flow.id, serde_json::json!({}))
        .await
        .is_err());
}

#[tokio::test]
async fn tag_actions_go_through_the_contact_registry() {
    let fx = fixture();
    let contact = fx
        .contacts
        .get_or_create("+900", Channel::Web, Some("Noa"))
        .await
        .unwrap();

    let flow = register_active(
        &fx.engine,
        Flow::new(
            "tagger",
            TriggerKind::MessageReceived,
            vec![
                step(ActionKind::AddTag, serde_json::json!({"tag": "lead"})),
                step(ActionKind::AddTag, serde_json::json!({"tag": "hot"})),
                step(ActionKind::RemoveTag, serde_json::json!({"tag": "lead"})),
            ],
        ),
    )
    .await;

    let execution = fx
        .engine
        .execute(
            &flow.id,
            serde_json::json!({"contactId": contact.id, "channel": "web"}),
        )
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let after = fx.contacts.get(&contact.id).await.unwrap();
    assert_eq!(after.tags, vec!["hot"]);
}

#[tokio::test]
async fn next_step_override_jumps_in_sequence() {
    let fx = fixture();

    let mut first = step(
        ActionKind::SendMessage,
        serde_json::json!({"message": "one"}),
    );
    let skipped = step(
        ActionKind::SendMessage,
        serde_json::json!({"message": "two"}),
    );
    let last = step(
        ActionKind::SendMessage,
        serde_json::json!({"message": "three"}),
    );
    first.next_step_id = Some(last.id.clone());

    let flow = register_active(
        &fx.engine,
        Flow::new("jumpy", TriggerKind::MessageReceived, vec![first, skipped, last]),
    )
    .await;

    fx.engine
        .execute(
            &flow.id,
            serde_json::json!({"channel": "web", "channelUserId": "+1"}),
        )
        .await
        .unwrap();

    let bodies: Vec<String> = fx
        .web
        .sent()
        .into_iter()
        .map(|r| match r.content {
            OutboundContent::Text { body } => body,
            _ => String::new(),
        })
        .collect();
    assert_eq!(bodies, vec!["one", "three"]);
}

#[tokio::test]
async fn keyword_trigger_matches_configured_substrings() {
    let fx = fixture();

    let mut flow = Flow::new(
        "pricing autoresponder",
        TriggerKind::KeywordDetected,
        vec![step(
            ActionKind::SendMessage,
            serde_json::json!({"message": "Our pricing page: example.com/pricing"}),
        )],
    );
    flow.trigger_config
        .insert("keywords".to_string(), serde_json::json!(["pricing", "cost"]));
    let flow = register_active(&fx.engine, flow).await;
    let _ = flow;

    let triggers = TriggerManager::new(
        Arc::clone(&fx.engine),
        BusinessHoursConfig {
            start_hour: 0,
            end_hour: 24,
        },
    );

    let context = serde_json::json!({"channel": "web", "channelUserId": "+2"});
    triggers
        .fire(
            TriggerKind::KeywordDetected,
            context.clone(),
            Some("how much does it COST?"),
            Some(Channel::Web),
        )
        .await;
    triggers
        .fire(
            TriggerKind::KeywordDetected,
            context,
            Some("unrelated message"),
            Some(Channel::Web),
        )
        .await;

    assert_eq!(fx.web.sent().len(), 1);
}

#[tokio::test]
async fn channel_filter_gates_triggers() {
    let fx = fixture();

    let mut flow = Flow::new(
        "whatsapp only",
        TriggerKind::MessageReceived,
        vec![step(
            ActionKind::SendMessage,
            serde_json::json!({"message": "wa auto-reply"}),
        )],
    );
    flow.trigger_config
        .insert("channel".to_string(), serde_json::json!("whatsapp"));
    register_active(&fx.engine, flow).await;

    let triggers = TriggerManager::new(
        Arc::clone(&fx.engine),
        BusinessHoursConfig {
            start_hour: 0,
            end_hour: 24,
        },
    );

    triggers
        .fire(
            TriggerKind::MessageReceived,
            serde_json::json!({"channel": "web", "channelUserId": "+3"}),
            Some("hello"),
            Some(Channel::Web),
        )
        .await;
    assert!(fx.web.sent().is_empty());
}
