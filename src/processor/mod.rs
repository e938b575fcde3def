//! Location processor
//!
//! One processor per location. It owns a periodic task per equipment type
//! present there, each on its configured cadence. Within a task, ticks are
//! strictly serialised: an overrunning tick skips its own next slot rather
//! than queueing (interval with skip semantics). A tick reads once,
//! computes, writes, then merges state; errors never cross tick or
//! equipment boundaries.

pub mod tick;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LocationConfig;
use crate::runtime::Runtime;
use crate::types::EquipmentType;

pub use tick::{run_type_tick, safe_default_bag, TickOutcome};

/// How often the processor logs its task health summary.
const HEALTH_SUMMARY_INTERVAL: Duration = Duration::from_secs(300);

/// Processor-level errors (tick-level failures are contained in the tick).
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Location {0} has no equipment")]
    NoEquipment(String),
}

/// Health counters for one periodic task.
#[derive(Debug, Clone, Default)]
pub struct TaskHealth {
    pub ticks_run: u64,
    pub ticks_failed: u64,
    pub consecutive_failures: u64,
    pub commands_written: u64,
    pub last_duration_ms: u64,
    pub last_status: String,
}

/// Shared health map, read by the supervisor's summary log.
pub type HealthMap = Arc<Mutex<HashMap<EquipmentType, TaskHealth>>>;

/// Final accounting returned when a processor drains.
#[derive(Debug, Clone, Default)]
pub struct ProcessorReport {
    pub location_id: String,
    pub ticks_run: u64,
    pub ticks_failed: u64,
    pub commands_written: u64,
}

/// One location's periodic control loops.
pub struct LocationProcessor {
    runtime: Arc<Runtime>,
    location: LocationConfig,
    cancel: CancellationToken,
    health: HealthMap,
}

impl LocationProcessor {
    pub fn new(runtime: Arc<Runtime>, location: LocationConfig, cancel: CancellationToken) -> Self {
        Self {
            runtime,
            location,
            cancel,
            health: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn health(&self) -> HealthMap {
        Arc::clone(&self.health)
    }

    /// Run until cancelled. Spawns one periodic task per equipment type
    /// present at the location plus the health summary loop, then drains.
    pub async fn run(self) -> Result<ProcessorReport, ProcessorError> {
        let location_id = self.location.id.clone();
        let types = self.runtime.metadata.types_at(&location_id).await;
        if types.is_empty() {
            return Err(ProcessorError::NoEquipment(location_id));
        }

        info!(
            location = %location_id,
            types = types.len(),
            "Location processor starting"
        );

        let mut task_set: JoinSet<()> = JoinSet::new();
        for equipment_type in types {
            let runtime = Arc::clone(&self.runtime);
            let location = self.location.clone();
            let cancel = self.cancel.clone();
            let health = Arc::clone(&self.health);
            task_set.spawn(async move {
                run_type_loop(runtime, location, equipment_type, cancel, health).await;
            });
        }

        // Health summary loop.
        {
            let cancel = self.cancel.clone();
            let health = Arc::clone(&self.health);
            let location = location_id.clone();
            task_set.spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_SUMMARY_INTERVAL);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                interval.tick().await; // first tick fires immediately; skip it
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => log_health_summary(&location, &health),
                    }
                }
            });
        }

        while let Some(result) = task_set.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(location = %location_id, "Processor task panicked: {}", e);
                    self.cancel.cancel();
                }
            }
        }

        let report = self.report(&location_id);
        info!(
            location = %location_id,
            ticks = report.ticks_run,
            failed = report.ticks_failed,
            commands = report.commands_written,
            "Location processor stopped"
        );
        Ok(report)
    }

    fn report(&self, location_id: &str) -> ProcessorReport {
        let mut report = ProcessorReport {
            location_id: location_id.to_string(),
            ..Default::default()
        };
        if let Ok(health) = self.health.lock() {
            for task in health.values() {
                report.ticks_run += task.ticks_run;
                report.ticks_failed += task.ticks_failed;
                report.commands_written += task.commands_written;
            }
        }
        report
    }
}

/// The periodic loop for one (location, equipment type) task.
async fn run_type_loop(
    runtime: Arc<Runtime>,
    location: LocationConfig,
    equipment_type: EquipmentType,
    cancel: CancellationToken,
    health: HealthMap,
) {
    let cadence = Duration::from_secs(location.cadence_for(equipment_type));
    info!(
        location = %location.id,
        equipment_type = %equipment_type,
        cadence_secs = cadence.as_secs(),
        "Task starting"
    );

    let mut interval = tokio::time::interval(cadence);
    // An overrunning tick skips its own next slot; it never queues.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut last_started: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(
                    location = %location.id,
                    equipment_type = %equipment_type,
                    "Task received shutdown signal"
                );
                break;
            }
            _ = interval.tick() => {
                let started = Instant::now();
                let dt_secs = last_started
                    .map(|t| started.duration_since(t).as_secs_f64())
                    .unwrap_or_else(|| cadence.as_secs_f64());
                last_started = Some(started);

                let outcome =
                    run_type_tick(&runtime, &location, equipment_type, dt_secs).await;
                let duration = started.elapsed();

                record_health(&health, equipment_type, &outcome, duration);
                match &outcome {
                    TickOutcome { failed: true, detail, .. } => {
                        warn!(
                            location = %location.id,
                            equipment_type = %equipment_type,
                            duration_ms = duration.as_millis() as u64,
                            "Tick degraded: {}", detail
                        );
                    }
                    TickOutcome { commands_written, .. } => {
                        debug!(
                            location = %location.id,
                            equipment_type = %equipment_type,
                            duration_ms = duration.as_millis() as u64,
                            commands_written,
                            "Tick complete"
                        );
                    }
                }
            }
        }
    }
}

fn record_health(
    health: &HealthMap,
    equipment_type: EquipmentType,
    outcome: &TickOutcome,
    duration: Duration,
) {
    if let Ok(mut map) = health.lock() {
        let task = map.entry(equipment_type).or_default();
        task.ticks_run += 1;
        task.commands_written += outcome.commands_written;
        task.last_duration_ms = duration.as_millis() as u64;
        if outcome.failed {
            task.ticks_failed += 1;
            task.consecutive_failures += 1;
            task.last_status = outcome.detail.clone();
        } else {
            task.consecutive_failures = 0;
            task.last_status = "ok".to_string();
        }
    }
}

fn log_health_summary(location: &str, health: &HealthMap) {
    if let Ok(map) = health.lock() {
        for (equipment_type, task) in map.iter() {
            info!(
                location = %location,
                equipment_type = %equipment_type,
                ticks = task.ticks_run,
                failed = task.ticks_failed,
                consecutive_failures = task.consecutive_failures,
                commands = task.commands_written,
                last_ms = task.last_duration_ms,
                "Task health"
            );
        }
    }
}
