use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::engine::FlowEngine;
use crate::error::{FlowError, Result};
use crate::types::{Flow, TriggerKind};

/// A scheduled flow coming due.
#[derive(Debug, Clone)]
pub struct ScheduledFire {
    pub flow_id: String,
    pub scheduled_at: DateTime<Utc>,
}

struct CronEntry {
    schedule: cron::Schedule,
    next: DateTime<Utc>,
}

/// Registers scheduled flows as cron entries and fires them on a one-second
/// tick loop. Fired flows are handed to an mpsc consumer (see
/// [`spawn_scheduled_fire_pump`]) so the tick loop never blocks on flow
/// execution.
pub struct CronScheduler {
    entries: DashMap<String, CronEntry>,
    fired_tx: mpsc::Sender<ScheduledFire>,
}

impl CronScheduler {
    pub fn new(fired_tx: mpsc::Sender<ScheduledFire>) -> Self {
        Self {
            entries: DashMap::new(),
            fired_tx,
        }
    }

    /// Register an active scheduled flow. Fails fast on a bad expression —
    /// flows are user-authored, so a silent skip would hide the mistake.
    pub fn register(&self, flow: &Flow) -> Result<()> {
        if flow.trigger != TriggerKind::Scheduled {
            return Err(FlowError::InvalidInput(format!(
                "flow {} is not a scheduled flow",
                flow.id
            )));
        }
        let expression = flow
            .trigger_config
            .get("cron")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                FlowError::InvalidInput("scheduled flow requires `cron` in trigger config".into())
            })?;

        let normalized = normalize_cron(expression);
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            FlowError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            }
        })?;

        let next = schedule.after(&Utc::now()).next().ok_or_else(|| {
            FlowError::InvalidSchedule {
                expression: expression.to_string(),
                reason: "schedule yields no future occurrence".to_string(),
            }
        })?;

        info!(flow_id = %flow.id, %expression, next = %next, "scheduled flow registered");
        self.entries
            .insert(flow.id.clone(), CronEntry { schedule, next });
        Ok(())
    }

    /// Drop a flow's cron entry (deactivation or deletion). No-op if absent.
    pub fn unregister(&self, flow_id: &str) {
        if self.entries.remove(flow_id).is_some() {
            info!(flow_id, "scheduled flow unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tick loop at one-second resolution until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("cron scheduler started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(Utc::now()),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fire everything due at `now` and advance each entry's next occurrence.
    pub fn tick(&self, now: DateTime<Utc>) {
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().next <= now)
            .map(|e| e.key().clone())
            .collect();

        for flow_id in due {
            let Some(mut entry) = self.entries.get_mut(&flow_id) else {
                continue;
            };
            let fire = ScheduledFire {
                flow_id: flow_id.clone(),
                scheduled_at: entry.next,
            };
            // Never stall the tick loop; a full channel drops the fire.
            if self.fired_tx.try_send(fire).is_err() {
                warn!(flow_id = %flow_id, "scheduled fire channel full; fire dropped");
            }

            match entry.schedule.after(&now).next() {
                Some(next) => entry.next = next,
                None => {
                    drop(entry);
                    self.entries.remove(&flow_id);
                }
            }
        }
    }
}

/// Drives `execute` for fired schedules.
pub fn spawn_scheduled_fire_pump(
    engine: Arc<FlowEngine>,
    mut rx: mpsc::Receiver<ScheduledFire>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(fire) = rx.recv().await {
            let context = serde_json::json!({
                "trigger": "scheduled",
                "scheduledAt": fire.scheduled_at,
            });
            if let Err(e) = engine.execute(&fire.flow_id, context).await {
                error!(flow_id = %fire.flow_id, error = %e, "scheduled flow execution failed");
            }
        }
    })
}

/// The platform speaks five-field cron; the parser wants a seconds field,
/// so five-field expressions get `0 ` prepended.
fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_core::types::Metadata;
    use crate::types::{ActionKind, FlowAction, FlowStep};

    fn scheduled_flow(expr: &str) -> Flow {
        let mut flow = Flow::new(
            "nightly",
            TriggerKind::Scheduled,
            vec![FlowStep::new(FlowAction {
                kind: ActionKind::Webhook,
                config: Metadata::new(),
            })],
        );
        flow.trigger_config
            .insert("cron".to_string(), serde_json::json!(expr));
        flow.active = true;
        flow
    }

    #[tokio::test]
    async fn five_field_expressions_register() {
        let (tx, _rx) = mpsc::channel(8);
        let scheduler = CronScheduler::new(tx);
        scheduler.register(&scheduled_flow("0 9 * * *")).unwrap();
        assert_eq!(scheduler.len(), 1);
        scheduler.unregister(&scheduled_flow("0 9 * * *").id); // unknown id: no-op
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn bad_expressions_fail_registration() {
        let (tx, _rx) = mpsc::channel(8);
        let scheduler = CronScheduler::new(tx);
        let err = scheduler.register(&scheduled_flow("every tuesday")).unwrap_err();
        assert!(matches!(err, FlowError::InvalidSchedule { .. }));

        let mut no_cron = scheduled_flow("* * * * *");
        no_cron.trigger_config.clear();
        assert!(matches!(
            scheduler.register(&no_cron),
            Err(FlowError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn due_entries_fire_and_advance() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = CronScheduler::new(tx);
        let flow = scheduled_flow("* * * * *");
        scheduler.register(&flow).unwrap();

        // Force the entry due, then tick.
        let future = Utc::now() + Duration::minutes(2);
        scheduler.tick(future);

        let fire = rx.try_recv().expect("a fire should be queued");
        assert_eq!(fire.flow_id, flow.id);

        // The entry advanced rather than firing forever.
        scheduler.tick(future);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn normalize_only_touches_five_field_forms() {
        assert_eq!(normalize_cron("0 9 * * *"), "0 0 9 * * *");
        assert_eq!(normalize_cron("30 0 9 * * *"), "30 0 9 * * *");
    }
}
