use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use parley_store::Store;

use crate::actions::{ActionRunner, StepOutcome};
use crate::conditions::evaluate;
use crate::error::{FlowError, Result};
use crate::types::{ExecutionStatus, Flow, FlowExecution, TriggerKind};

/// Receives `(execution, next step, delay)` when a wait action suspends a
/// flow. Typically backed by a durable scheduler; the engine itself never
/// blocks on wall-clock time.
pub trait DelayHandler: Send + Sync {
    fn schedule(&self, execution_id: &str, step_id: &str, delay_ms: u64);
}

/// A request to continue a suspended execution.
#[derive(Debug, Clone)]
pub struct ResumeRequest {
    pub execution_id: String,
    pub step_id: String,
}

/// In-process delay handler: sleeps on a Tokio timer, then emits a
/// [`ResumeRequest`] for the resume pump to act on.
pub struct TokioDelayHandler {
    tx: mpsc::UnboundedSender<ResumeRequest>,
}

impl TokioDelayHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResumeRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DelayHandler for TokioDelayHandler {
    fn schedule(&self, execution_id: &str, step_id: &str, delay_ms: u64) {
        let tx = self.tx.clone();
        let request = ResumeRequest {
            execution_id: execution_id.to_string(),
            step_id: step_id.to_string(),
        };
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            // Receiver gone means the process is shutting down.
            let _ = tx.send(request);
        });
    }
}

/// Drives [`FlowEngine::resume`] from delay-handler requests.
pub fn spawn_resume_pump(
    engine: Arc<FlowEngine>,
    mut rx: mpsc::UnboundedReceiver<ResumeRequest>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            if let Err(e) = engine.resume(&request.execution_id, &request.step_id).await {
                error!(
                    execution_id = %request.execution_id,
                    error = %e,
                    "flow resume failed"
                );
            }
        }
    })
}

/// Owns flows and executions; runs steps in declared order with condition
/// gates, action dispatch, and resume-after-wait semantics.
pub struct FlowEngine {
    flows: Arc<dyn Store<Flow>>,
    executions: Arc<dyn Store<FlowExecution>>,
    actions: ActionRunner,
    delay: Arc<dyn DelayHandler>,
}

impl FlowEngine {
    pub fn new(
        flows: Arc<dyn Store<Flow>>,
        executions: Arc<dyn Store<FlowExecution>>,
        actions: ActionRunner,
        delay: Arc<dyn DelayHandler>,
    ) -> Self {
        Self {
            flows,
            executions,
            actions,
            delay,
        }
    }

    // --- flow CRUD ----------------------------------------------------------

    pub async fn register(&self, flow: Flow) -> Result<Flow> {
        if flow.steps.is_empty() {
            return Err(FlowError::InvalidInput("a flow needs at least one step".into()));
        }
        Ok(self.flows.create(flow).await?)
    }

    pub async fn get_flow(&self, id: &str) -> Result<Flow> {
        self.flows
            .get(id)
            .await?
            .ok_or_else(|| FlowError::FlowNotFound(id.to_string()))
    }

    pub async fn list_flows(&self) -> Result<Vec<Flow>> {
        Ok(self.flows.get_all().await?)
    }

    pub async fn active_flows(&self, trigger: TriggerKind) -> Result<Vec<Flow>> {
        Ok(self
            .flows
            .find(&move |f: &Flow| f.active && f.trigger == trigger)
            .await?)
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<Flow> {
        self.get_flow(id).await?;
        Ok(self
            .flows
            .update(id, serde_json::json!({"active": active, "updatedAt": Utc::now()}))
            .await?)
    }

    pub async fn delete_flow(&self, id: &str) -> Result<bool> {
        Ok(self.flows.delete(id).await?)
    }

    pub async fn get_execution(&self, id: &str) -> Result<FlowExecution> {
        self.executions
            .get(id)
            .await?
            .ok_or_else(|| FlowError::ExecutionNotFound(id.to_string()))
    }

    pub async fn list_executions(&self, flow_id: Option<&str>) -> Result<Vec<FlowExecution>> {
        let flow_id = flow_id.map(String::from);
        Ok(self
            .executions
            .find(&move |e: &FlowExecution| {
                flow_id.as_deref().map_or(true, |id| e.flow_id == id)
            })
            .await?)
    }

    // --- execution ----------------------------------------------------------

    /// Start a new execution of an active flow.
    #[instrument(skip(self, context))]
    pub async fn execute(&self, flow_id: &str, context: serde_json::Value) -> Result<FlowExecution> {
        let flow = self.get_flow(flow_id).await?;
        if !flow.active {
            return Err(FlowError::Inactive(flow_id.to_string()));
        }

        let mut execution = FlowExecution::new(flow_id, context);
        execution.current_step_id = flow.steps.first().map(|s| s.id.clone());
        let execution = self.executions.create(execution).await?;
        info!(execution_id = %execution.id, flow = %flow.name, "flow execution started");

        self.run_from(&flow, execution, 0).await
    }

    /// Continue a suspended execution at `step_id`.
    ///
    /// Idempotent: resuming an execution that is no longer running (or that
    /// has already moved past `step_id`) is a no-op. The per-execution
    /// advisory lock is held through the run so two racing resumes (the
    /// delay pump vs an external resume call) cannot both pass the
    /// staleness check and run the step's action twice.
    #[instrument(skip(self))]
    pub async fn resume(&self, execution_id: &str, step_id: &str) -> Result<FlowExecution> {
        let _guard = self.executions.locks().acquire(execution_id).await;

        let execution = self.get_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Ok(execution);
        }
        if execution.current_step_id.as_deref() != Some(step_id) {
            warn!(
                execution_id,
                step_id,
                current = ?execution.current_step_id,
                "stale resume ignored"
            );
            return Ok(execution);
        }

        let flow = self.get_flow(&execution.flow_id).await?;
        let index = flow
            .step_index(step_id)
            .ok_or_else(|| FlowError::InvalidInput(format!("unknown step id: {step_id}")))?;

        self.run_from(&flow, execution, index).await
    }

    /// Cancel a running execution.
    pub async fn cancel(&self, execution_id: &str) -> Result<FlowExecution> {
        let execution = self.get_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Ok(execution);
        }
        Ok(self
            .executions
            .update(
                execution_id,
                serde_json::json!({
                    "status": ExecutionStatus::Cancelled,
                    "completedAt": Utc::now(),
                }),
            )
            .await?)
    }

    /// Run steps starting at `index` until completion, wait, or failure.
    async fn run_from(
        &self,
        flow: &Flow,
        execution: FlowExecution,
        index: usize,
    ) -> Result<FlowExecution> {
        let mut idx = index;

        while idx < flow.steps.len() {
            let step = &flow.steps[idx];

            // Condition gate: all must hold, otherwise the action is skipped
            // and the run moves to the next step in sequence.
            if !step.conditions.iter().all(|c| evaluate(c, &execution.context)) {
                idx += 1;
                continue;
            }

            match self.actions.run(flow, &execution, step).await {
                Ok(StepOutcome::Continue) => match next_index(flow, idx) {
                    Some(next) => {
                        self.executions
                            .update(
                                &execution.id,
                                serde_json::json!({"currentStepId": flow.steps[next].id}),
                            )
                            .await?;
                        idx = next;
                    }
                    None => break,
                },

                Ok(StepOutcome::Wait { delay_ms }) => match next_index(flow, idx) {
                    Some(next) => {
                        let next_id = flow.steps[next].id.clone();
                        let updated = self
                            .executions
                            .update(
                                &execution.id,
                                serde_json::json!({"currentStepId": next_id}),
                            )
                            .await?;
                        info!(
                            execution_id = %execution.id,
                            delay_ms,
                            next_step = %next_id,
                            "flow suspended on wait"
                        );
                        self.delay.schedule(&execution.id, &next_id, delay_ms);
                        return Ok(updated);
                    }
                    // A wait with nothing after it: nothing to resume into.
                    None => break,
                },

                Err(e) => {
                    error!(execution_id = %execution.id, step_id = %step.id, error = %e, "flow step failed");
                    return Ok(self
                        .executions
                        .update(
                            &execution.id,
                            serde_json::json!({
                                "status": ExecutionStatus::Failed,
                                "error": e.to_string(),
                                "completedAt": Utc::now(),
                            }),
                        )
                        .await?);
                }
            }
        }

        info!(execution_id = %execution.id, "flow execution completed");
        Ok(self
            .executions
            .update(
                &execution.id,
                serde_json::json!({
                    "status": ExecutionStatus::Completed,
                    "completedAt": Utc::now(),
                }),
            )
            .await?)
    }
}

/// The successor of `idx`: an explicit `next_step_id` override wins, else
/// the next step in sequence; `None` when the flow is exhausted (or the
/// override names a step that no longer exists).
fn next_index(flow: &Flow, idx: usize) -> Option<usize> {
    match &flow.steps[idx].next_step_id {
        Some(next_id) => flow.step_index(next_id),
        None => {
            let next = idx + 1;
            (next < flow.steps.len()).then_some(next)
        }
    }
}
