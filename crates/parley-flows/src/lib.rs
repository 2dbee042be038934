pub mod actions;
pub mod conditions;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod triggers;
pub mod types;

pub use actions::{ActionRunner, StepOutcome};
pub use engine::{spawn_resume_pump, DelayHandler, FlowEngine, ResumeRequest, TokioDelayHandler};
pub use error::{FlowError, Result};
pub use schedule::{spawn_scheduled_fire_pump, CronScheduler, ScheduledFire};
pub use triggers::TriggerManager;
pub use types::{
    ActionKind, Condition, ConditionOperator, ExecutionStatus, Flow, FlowAction, FlowExecution,
    FlowStep, TriggerKind,
};
