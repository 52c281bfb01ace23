//! Wake scheduling and the per-entity concurrency guard
//!
//! The scheduler keeps the set of entity ids that are mid-run. An id enters
//! the set through `try_claim` and leaves it when the returned `RunGuard` is
//! dropped, whether the run succeeded, failed or panicked.
//!
//! The guard is process-local: two scheduler processes sharing a database
//! can still run the same entity concurrently.
//!
//! # Lifecycle
//!
//! 1. Every `scan_interval`, `scan()` lists all entity ids.
//! 2. Ids already running are skipped.
//! 3. Every other id is claimed and gets its own task: load, `check_wakeup`,
//!    save, record the run, release.

use anyhow::Result;
use sdk::errors::EngineError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::{EntityStore, RunRepository};
use crate::entity::{EntityServices, RunSummary, WakeOutcome};

type RunningSet = Arc<Mutex<HashSet<String>>>;

fn lock(running: &RunningSet) -> MutexGuard<'_, HashSet<String>> {
    // A panic while holding the lock cannot leave the set half-updated
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Proof that an entity id is claimed; releases it on drop
#[derive(Debug)]
pub struct RunGuard {
    id: String,
    running: RunningSet,
}

impl RunGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.id);
        debug!(entity = %self.id, "Released run guard");
    }
}

/// What one scan did
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Ids a wake check was started for
    pub started: Vec<String>,
    /// Ids skipped because a run was already in flight
    pub skipped: Vec<String>,
    pub handles: Vec<JoinHandle<()>>,
}

impl ScanReport {
    /// Wait for every started wake check to settle
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!("Wake task panicked: {}", e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Run only if due
    CheckWakeup,
    /// Run regardless of sleep state
    Force,
}

pub struct Scheduler {
    store: Arc<dyn EntityStore>,
    services: Arc<EntityServices>,
    history: Option<RunRepository>,
    running: RunningSet,
    scan_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        services: Arc<EntityServices>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            store,
            services,
            history: None,
            running: Arc::new(Mutex::new(HashSet::new())),
            scan_interval,
        }
    }

    /// Record every run in the run history table
    pub fn with_history(mut self, history: RunRepository) -> Self {
        self.history = Some(history);
        self
    }

    /// Claim `id` for a run. `None` if it is already running.
    pub fn try_claim(&self, id: &str) -> Option<RunGuard> {
        let mut running = lock(&self.running);
        if !running.insert(id.to_string()) {
            return None;
        }
        Some(RunGuard {
            id: id.to_string(),
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.running).contains(id)
    }

    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.running).iter().cloned().collect();
        ids.sort();
        ids
    }

    /// `check_wakeup` one entity under the guard.
    ///
    /// Returns `Ok(None)` without doing anything if the entity is already
    /// running.
    pub async fn wake(&self, id: &str) -> Result<Option<WakeOutcome>> {
        let Some(guard) = self.try_claim(id) else {
            debug!(entity = %id, "Already running, wake skipped");
            return Ok(None);
        };
        self.execute(&guard, Trigger::CheckWakeup).await.map(Some)
    }

    /// Run one entity now, ignoring its sleep state.
    ///
    /// Returns `Ok(None)` if the entity is already running.
    pub async fn run_now(&self, id: &str) -> Result<Option<RunSummary>> {
        let Some(guard) = self.try_claim(id) else {
            debug!(entity = %id, "Already running, run skipped");
            return Ok(None);
        };
        match self.execute(&guard, Trigger::Force).await? {
            WakeOutcome::Ran(summary) => Ok(Some(summary)),
            WakeOutcome::Dormant { .. } => Ok(None),
        }
    }

    async fn execute(&self, guard: &RunGuard, trigger: Trigger) -> Result<WakeOutcome> {
        let id = guard.id();
        let mut entity = self
            .services
            .load_existing(self.store.as_ref(), id)
            .await?
            .ok_or_else(|| EngineError::EntityNotFound(id.to_string()))?;

        if trigger == Trigger::CheckWakeup {
            if let Some(remaining) = entity.remaining_sleep() {
                debug!(
                    entity = %id,
                    remaining_minutes = remaining.num_minutes(),
                    "Not due yet"
                );
                return Ok(WakeOutcome::Dormant { remaining });
            }
        }

        let run_id = match &self.history {
            Some(history) => Some(history.start_run(id).await?),
            None => None,
        };

        let result = match trigger {
            Trigger::CheckWakeup => entity.check_wakeup().await,
            Trigger::Force => entity.run().await.map(WakeOutcome::Ran),
        };

        // Whatever the run got through is kept, including on failure
        let saved = self.store.save(&entity.to_record()).await;

        match (result, saved) {
            (Ok(outcome), Ok(())) => {
                if let (Some(history), Some(run_id), WakeOutcome::Ran(summary)) =
                    (&self.history, &run_id, &outcome)
                {
                    history.complete_run(run_id, summary).await?;
                }
                Ok(outcome)
            }
            (Ok(_), Err(save_error)) => {
                error!(entity = %id, "Saving run state failed: {:#}", save_error);
                self.record_failure(run_id.as_deref(), &format!("{:#}", save_error))
                    .await;
                Err(save_error)
            }
            (Err(e), saved) => {
                error!(entity = %id, "Run failed: {}", e);
                if let Err(save_error) = &saved {
                    error!(entity = %id, "Saving run state failed: {:#}", save_error);
                }
                self.record_failure(run_id.as_deref(), &e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Mark a started history row failed; a failed write is only logged
    async fn record_failure(&self, run_id: Option<&str>, message: &str) {
        if let (Some(history), Some(run_id)) = (&self.history, run_id) {
            if let Err(e) = history.fail_run(run_id, message).await {
                warn!(run_id = %run_id, "Failed to record run failure: {:#}", e);
            }
        }
    }

    /// Start a wake check for every known entity that is not already running
    pub async fn scan(self: &Arc<Self>) -> Result<ScanReport> {
        let ids = self.store.list_ids().await?;
        let mut report = ScanReport::default();

        for id in ids {
            let Some(guard) = self.try_claim(&id) else {
                debug!(entity = %id, "Run in flight, skipping");
                report.skipped.push(id);
                continue;
            };

            let scheduler = Arc::clone(self);
            report.handles.push(tokio::spawn(async move {
                if let Err(e) = scheduler.execute(&guard, Trigger::CheckWakeup).await {
                    warn!(entity = %guard.id(), "Wake check failed: {:#}", e);
                }
            }));
            report.started.push(id);
        }

        debug!(
            started = report.started.len(),
            skipped = report.skipped.len(),
            "Scan complete"
        );
        Ok(report)
    }

    /// Scan every `scan_interval` until `shutdown` is set, then wait (bounded)
    /// for in-flight runs.
    pub async fn run_until(self: Arc<Self>, shutdown: Arc<AtomicBool>) {
        info!(interval_secs = self.scan_interval.as_secs(), "Scheduler started");

        let mut ticker = tokio::time::interval(self.scan_interval);
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        while !shutdown.load(Ordering::Relaxed) {
            tokio::select! {
                _ = ticker.tick() => {
                    in_flight.retain(|h| !h.is_finished());
                    match self.scan().await {
                        Ok(report) => in_flight.extend(report.handles),
                        Err(e) => error!("Scan failed: {:#}", e),
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }

        info!(in_flight = in_flight.len(), "Scheduler stopping, waiting for runs");
        let drain = futures::future::join_all(in_flight);
        if tokio::time::timeout(Duration::from_secs(30), drain).await.is_err() {
            warn!("Runs still in flight after 30 seconds, stopping anyway");
        }
        info!("Scheduler stopped");
    }
}
