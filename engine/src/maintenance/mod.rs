//! Maintenance scheduler
//!
//! Background housekeeping, each job on its own interval:
//! - memory sampling through the `MemoryGovernor`
//! - expiry of idle conversation contexts
//! - purging queued requests whose deadline already passed
//! - periodic statistics logging
//!
//! Jobs never propagate failures: a panicking job is logged and the task
//! keeps its schedule. `stop()` signals every task through a watch channel
//! and waits for them to exit.

use crate::batch::BatchCoordinator;
use crate::config::MaintenanceConfig;
use crate::context::ConversationContextStore;
use crate::memory::{MemoryGovernor, MemorySample};
use crate::stats::ServiceState;
use ember_sdk::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Outcome of running every job once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub memory: MemorySample,
    pub expired_contexts: usize,
    pub purged_requests: usize,
}

/// The shared state maintenance jobs operate on
pub struct MaintenanceTasks {
    contexts: Arc<ConversationContextStore>,
    coordinator: Arc<BatchCoordinator>,
    governor: Arc<MemoryGovernor>,
    state: Arc<ServiceState>,
}

impl MaintenanceTasks {
    pub fn new(
        contexts: Arc<ConversationContextStore>,
        coordinator: Arc<BatchCoordinator>,
        governor: Arc<MemoryGovernor>,
        state: Arc<ServiceState>,
    ) -> Self {
        Self {
            contexts,
            coordinator,
            governor,
            state,
        }
    }

    pub fn sample_memory(&self) -> MemorySample {
        self.governor.sample()
    }

    pub fn expire_contexts(&self) -> usize {
        self.contexts.evict_expired()
    }

    pub fn purge_queue(&self) -> usize {
        self.coordinator.purge_expired()
    }

    pub fn log_statistics(&self) {
        info!(
            total_inferences = self.state.total_inferences(),
            total_chars = self.state.total_chars_processed(),
            failed = self.state.failed_requests(),
            timed_out = self.state.timed_out_requests(),
            peak_memory_mb = self.state.peak_memory_mb(),
            active_contexts = self.contexts.len(),
            queued_requests = self.coordinator.len(),
            low_memory = self.state.is_low_memory(),
            "Service statistics"
        );
    }

    /// Run every job once: memory, contexts, queue, statistics
    pub fn tick(&self) -> TickReport {
        let memory = self.sample_memory();
        let expired_contexts = self.expire_contexts();
        let purged_requests = self.purge_queue();
        self.log_statistics();

        TickReport {
            memory,
            expired_contexts,
            purged_requests,
        }
    }
}

type Job = fn(&MaintenanceTasks);

/// Handle to the running background jobs
pub struct MaintenanceScheduler {
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    /// Spawn every job on its configured interval
    pub fn start(tasks: Arc<MaintenanceTasks>, config: &MaintenanceConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| EngineError::State("no async runtime available".to_string()))?;
        let (shutdown, _) = watch::channel(false);

        let jobs: [(&'static str, u64, Job); 4] = [
            ("memory_check", config.memory_check_secs, |t| {
                t.sample_memory();
            }),
            ("context_cleanup", config.context_cleanup_secs, |t| {
                t.expire_contexts();
            }),
            ("queue_purge", config.queue_purge_secs, |t| {
                t.purge_queue();
            }),
            ("stats_log", config.stats_log_secs, |t| t.log_statistics()),
        ];

        let handles = jobs
            .into_iter()
            .map(|(name, secs, job)| {
                let period = Duration::from_secs(secs.max(1));
                let stop = shutdown.subscribe();
                runtime.spawn(run_periodic(name, period, stop, Arc::clone(&tasks), job))
            })
            .collect();

        info!("Maintenance scheduler started");
        Ok(Self {
            shutdown,
            handles: Mutex::new(handles),
        })
    }

    /// Signal every job to stop and wait for them. Safe to call twice.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Maintenance task ended abnormally: {}", e);
            }
        }
        debug!("Maintenance scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }
}

async fn run_periodic(
    name: &'static str,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    tasks: Arc<MaintenanceTasks>,
    job: Job,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if std::panic::catch_unwind(AssertUnwindSafe(|| job(&tasks))).is_err() {
                    error!(task = name, "Maintenance task panicked");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    debug!(task = name, "Maintenance task exited");
}
