//! Process supervisor
//!
//! Owns the runtime (gateway, state store, metadata, dispatcher), starts
//! one location processor per configured location, restarts processors
//! that die, flushes state snapshots on a slow cadence, and drains
//! everything within the grace period on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::processor::LocationProcessor;
use crate::runtime::Runtime;
use crate::state::snapshot::StateSnapshot;

/// Delay before a dead processor is restarted.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// The engine's top-level supervisor.
pub struct Supervisor {
    runtime: Arc<Runtime>,
    cancel: CancellationToken,
    /// Restrict to one location (CLI `--location`).
    only_location: Option<String>,
}

impl Supervisor {
    pub fn new(runtime: Runtime, cancel: CancellationToken, only_location: Option<String>) -> Self {
        Self {
            runtime: Arc::new(runtime),
            cancel,
            only_location,
        }
    }

    /// Run until the cancellation token fires, then drain within the
    /// grace period. In-flight ticks that outlive the grace period are
    /// aborted; writes already issued stand.
    pub async fn run(self) -> anyhow::Result<()> {
        let snapshot = self.open_snapshot();
        if let Some(snapshot) = &snapshot {
            let entries = snapshot.load_all();
            if !entries.is_empty() {
                info!("Restored {} state entries from snapshot", entries.len());
                self.runtime.store.load(entries);
            }
        }

        let locations: Vec<_> = self
            .runtime
            .site
            .locations
            .iter()
            .filter(|l| {
                self.only_location
                    .as_ref()
                    .map(|only| l.id == *only)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if locations.is_empty() {
            anyhow::bail!(
                "no locations to supervise (filter: {:?})",
                self.only_location
            );
        }

        let equipment_count = self.runtime.metadata.len().await;
        info!(
            locations = locations.len(),
            equipment = equipment_count,
            dry_run = self.runtime.engine.dry_run,
            "Supervisor starting"
        );

        let mut task_set: JoinSet<String> = JoinSet::new();
        for location in &locations {
            spawn_processor(&mut task_set, &self.runtime, location.id.clone(), &self.cancel);
        }

        // Snapshot flush loop.
        if let Some(snapshot) = snapshot.clone() {
            let store = Arc::clone(&self.runtime.store);
            let cancel = self.cancel.clone();
            let flush_interval = self.runtime.engine.state_flush_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(flush_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            if let Err(e) = snapshot.save(&store) {
                                warn!("State snapshot flush failed: {}", e);
                            }
                        }
                    }
                }
            });
        }

        // Supervision loop: restart processors that die while the engine
        // is still running.
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Supervisor: shutdown signal received");
                    break;
                }
                result = task_set.join_next() => {
                    match result {
                        Some(Ok(location_id)) => {
                            if self.cancel.is_cancelled() {
                                continue;
                            }
                            warn!(
                                location = %location_id,
                                "Processor exited unexpectedly; restarting in {:?}",
                                RESTART_DELAY
                            );
                            tokio::time::sleep(RESTART_DELAY).await;
                            spawn_processor(&mut task_set, &self.runtime, location_id, &self.cancel);
                        }
                        Some(Err(e)) => {
                            error!("Processor task panicked: {}", e);
                            self.cancel.cancel();
                            break;
                        }
                        None => {
                            info!("Supervisor: all processors completed");
                            break;
                        }
                    }
                }
            }
        }

        // Graceful drain: in-flight ticks get the grace period, then the
        // remaining tasks are aborted.
        let grace = self.runtime.engine.shutdown_grace;
        info!("Draining processors (grace {:?})", grace);
        let drain = async {
            while task_set.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Grace period elapsed; aborting remaining tasks");
            task_set.abort_all();
            while task_set.join_next().await.is_some() {}
        }

        if let Some(snapshot) = &snapshot {
            match snapshot.save(&self.runtime.store) {
                Ok(count) => info!("Final state snapshot saved ({} entries)", count),
                Err(e) => warn!("Final state snapshot failed: {}", e),
            }
            if let Err(e) = snapshot.flush() {
                warn!("State snapshot sync failed: {}", e);
            }
        }

        info!("Supervisor stopped");
        Ok(())
    }

    fn open_snapshot(&self) -> Option<StateSnapshot> {
        let dir = self.runtime.engine.state_dir.trim();
        if dir.is_empty() {
            return None;
        }
        match StateSnapshot::open(dir) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(
                    "State snapshot unavailable at {} ({}); running without persistence",
                    dir, e
                );
                None
            }
        }
    }
}

/// Spawn one location processor task; the task resolves to its location
/// id so the supervisor can restart it.
fn spawn_processor(
    task_set: &mut JoinSet<String>,
    runtime: &Arc<Runtime>,
    location_id: String,
    cancel: &CancellationToken,
) {
    let Some(location) = runtime.site.location(&location_id).cloned() else {
        error!(location = %location_id, "Cannot spawn processor for unknown location");
        return;
    };
    let runtime = Arc::clone(runtime);
    let cancel = cancel.clone();
    task_set.spawn(async move {
        let processor = LocationProcessor::new(runtime, location, cancel);
        match processor.run().await {
            Ok(report) => {
                info!(
                    location = %report.location_id,
                    ticks = report.ticks_run,
                    "Processor drained"
                );
            }
            Err(e) => {
                error!(location = %location_id, "Processor failed: {}", e);
            }
        }
        location_id
    });
}
