//! Inference service
//!
//! The caller-facing façade. One `InferenceService` owns everything a
//! serving instance needs: the backend and its capacity-1 gate, the
//! conversation context store, the request queue and its drainer, the
//! memory governor and the maintenance schedule.
//!
//! Submission errors (blank input, no model, shut down) are returned
//! directly from `generate`. Everything that can go wrong after a request is
//! queued is delivered through its `GenerationHandle`.
//!
//! # Example
//!
//! ```no_run
//! use ember_engine::backend::EchoBackend;
//! use ember_engine::config::Config;
//! use ember_engine::memory::SysinfoProbe;
//! use ember_engine::service::InferenceService;
//! use std::sync::Arc;
//!
//! # async fn run() -> ember_sdk::Result<()> {
//! let service = InferenceService::new(
//!     Arc::new(EchoBackend::new()),
//!     Arc::new(SysinfoProbe::new()),
//!     &Config::default(),
//! );
//! service.load_model("models/tiny.gguf", None).await?;
//!
//! let ctx = service.create_context(None, Some("You are terse."));
//! let reply = service.generate(" hello ", Some(&ctx), None)?.await?;
//! println!("{}", reply);
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::batch::BatchCoordinator;
use crate::config::Config;
use crate::context::{ConversationContext, ConversationContextStore};
use crate::executor::InferenceExecutor;
use crate::maintenance::{MaintenanceScheduler, MaintenanceTasks};
use crate::memory::{MemoryGovernor, MemoryProbe};
use crate::request::{GenerationHandle, GenerationRequest};
use crate::stats::{MemoryStats, ServiceState, Statistics};
use ember_sdk::backend::InferenceBackend;
use ember_sdk::errors::{EngineError, Result};
use ember_sdk::types::{self, Options};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Backend context window requested at load time
const DEFAULT_CONTEXT_LENGTH: i64 = 2048;
const LOW_MEMORY_CONTEXT_LENGTH: i64 = 1024;
const MAX_DEFAULT_THREADS: usize = 4;

/// What `optimize_memory` released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryOptimization {
    pub expired_contexts: usize,
    pub purged_requests: usize,
}

pub struct InferenceService {
    backend: Arc<dyn InferenceBackend>,
    gate: Arc<tokio::sync::Mutex<()>>,
    state: Arc<ServiceState>,
    contexts: Arc<ConversationContextStore>,
    coordinator: Arc<BatchCoordinator>,
    governor: Arc<MemoryGovernor>,
    tasks: Arc<MaintenanceTasks>,
    scheduler: Mutex<Option<MaintenanceScheduler>>,
    config: Config,
}

impl InferenceService {
    /// Wire up a service around `backend`. No model is loaded and no
    /// background work is started.
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        probe: Arc<dyn MemoryProbe>,
        config: &Config,
    ) -> Self {
        let state = Arc::new(ServiceState::new());
        let gate = Arc::new(tokio::sync::Mutex::new(()));
        let contexts = Arc::new(ConversationContextStore::new(
            config.context.capacity,
            config.context.ttl(),
            config.context.max_length,
        ));

        let executor = Arc::new(InferenceExecutor::new(
            Arc::clone(&backend),
            Arc::clone(&gate),
            Arc::clone(&contexts),
            Arc::clone(&state),
        ));
        let coordinator = Arc::new(BatchCoordinator::new(
            executor,
            Arc::clone(&state),
            config.service.batch_size,
            config.service.batch_timeout(),
        ));
        let governor = Arc::new(MemoryGovernor::new(
            probe,
            Arc::clone(&state),
            Arc::clone(&contexts),
            &config.memory,
            &config.context,
        ));
        let tasks = Arc::new(MaintenanceTasks::new(
            Arc::clone(&contexts),
            Arc::clone(&coordinator),
            Arc::clone(&governor),
            Arc::clone(&state),
        ));

        info!(
            backend = backend.name(),
            batch_size = config.service.batch_size,
            "Inference service initialized"
        );

        Self {
            backend,
            gate,
            state,
            contexts,
            coordinator,
            governor,
            tasks,
            scheduler: Mutex::new(None),
            config: config.clone(),
        }
    }

    /// Submit a generation request and return a handle to its result.
    ///
    /// Never blocks. Fails immediately with `EngineError::State` when no
    /// model is loaded or the service is shut down, and with
    /// `EngineError::Input` when `text` is blank; nothing is queued then.
    pub fn generate(
        &self,
        text: &str,
        context_id: Option<&str>,
        options: Option<Options>,
    ) -> Result<GenerationHandle> {
        if self.state.is_shutting_down() {
            return Err(EngineError::State("service is shut down".to_string()));
        }
        if !self.state.is_model_loaded() {
            return Err(EngineError::no_model());
        }

        let (request, handle) = GenerationRequest::new(
            text,
            context_id,
            options.unwrap_or_default(),
            self.config.service.inference_timeout(),
        )?;
        self.coordinator.submit(request)?;
        Ok(handle)
    }

    /// Submit and wait up to `timeout` for the result.
    ///
    /// Giving up locally does not cancel the request; it may still complete
    /// and update its context.
    pub async fn generate_sync(
        &self,
        text: &str,
        context_id: Option<&str>,
        options: Option<Options>,
        timeout: Duration,
    ) -> Result<String> {
        let handle = self.generate(text, context_id, options)?;
        match tokio::time::timeout(timeout, handle).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout { waited: timeout }),
        }
    }

    /// Context-free generation with the configured timeout
    pub async fn generate_simple(&self, text: &str) -> Result<String> {
        let timeout = self.config.service.inference_timeout();
        self.generate_sync(text, None, None, timeout).await
    }

    /// Create (or reset) a conversation context and return its id.
    ///
    /// A missing or blank id gets a generated `ctx_<uuid>` id.
    pub fn create_context(&self, id: Option<&str>, system_prompt: Option<&str>) -> String {
        let id = id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("ctx_{}", Uuid::new_v4().simple()));

        self.contexts.create(&id, system_prompt.unwrap_or_default());
        id
    }

    /// Drop a context. Unknown ids are ignored.
    pub fn remove_context(&self, id: &str) -> bool {
        self.contexts.remove(id)
    }

    /// Snapshot of a live context
    pub fn get_context(&self, id: &str) -> Option<ConversationContext> {
        self.contexts.get(id)
    }

    /// Model loaded and not shut down
    pub fn is_ready(&self) -> bool {
        self.state.is_model_loaded() && !self.state.is_shutting_down()
    }

    /// Point-in-time counters. Reading has no side effects.
    pub fn statistics(&self) -> Statistics {
        Statistics {
            model_loaded: self.state.is_model_loaded(),
            current_model: self.state.current_model(),
            total_inferences: self.state.total_inferences(),
            total_chars_processed: self.state.total_chars_processed(),
            active_contexts: self.contexts.len(),
            queued_requests: self.coordinator.len(),
            low_memory_mode: self.state.is_low_memory(),
            peak_memory_mb: self.state.peak_memory_mb(),
            failed_requests: self.state.failed_requests(),
            timed_out_requests: self.state.timed_out_requests(),
            drain_cycles: self.coordinator.drain_cycles(),
        }
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            context_cache_size: self.contexts.len(),
            request_queue_size: self.coordinator.len(),
            low_memory_mode: self.state.is_low_memory(),
            peak_memory_usage_mb: self.state.peak_memory_mb(),
            current_memory_usage_mb: self.governor.current_mb(),
            available_memory_mb: self.governor.available_mb(),
            total_context_length: self.contexts.total_length(),
        }
    }

    /// Evict expired contexts, fail lapsed queued requests and release
    /// spare store capacity
    pub fn optimize_memory(&self) -> MemoryOptimization {
        info!("Optimizing memory usage");
        let report = MemoryOptimization {
            expired_contexts: self.tasks.expire_contexts(),
            purged_requests: self.tasks.purge_queue(),
        };
        self.contexts.shrink();
        info!(
            expired_contexts = report.expired_contexts,
            purged_requests = report.purged_requests,
            "Memory optimization complete"
        );
        report
    }

    /// Load `path`, replacing any model already loaded.
    ///
    /// Unset recognized options get memory-aware defaults. The previous
    /// model stays active unless the backend confirms the new one; on
    /// success every conversation context is dropped.
    pub async fn load_model(&self, path: &str, options: Option<Options>) -> Result<()> {
        let path = path.trim();
        if path.is_empty() {
            return Err(EngineError::Input("model path is empty".to_string()));
        }
        if self.state.is_shutting_down() {
            return Err(EngineError::State("service is shut down".to_string()));
        }

        info!(model = %path, "Loading model");
        let sample = self.governor.sample();
        if self.state.is_low_memory() {
            warn!(
                available_mb = sample.available_mb,
                "Loading with low-memory defaults"
            );
        }
        let options = self.load_options(options.unwrap_or_default());

        let _gate = self.gate.lock().await;
        let loaded = AssertUnwindSafe(self.backend.load_model(path, &options))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(EngineError::Backend("backend panicked during load".to_string())));

        match loaded {
            Ok(()) => {
                let previous = self.state.current_model();
                self.state.set_loaded(path);
                let cleared = self.contexts.clear();
                match previous {
                    Some(previous) => info!(
                        from = %previous,
                        to = %path,
                        cleared_contexts = cleared,
                        "Model hot-swapped"
                    ),
                    None => info!(model = %path, "Model loaded"),
                }
                Ok(())
            }
            Err(e) => {
                warn!(model = %path, "Failed to load model: {}", e);
                Err(e)
            }
        }
    }

    fn load_options(&self, mut options: Options) -> Options {
        let low = self.state.is_low_memory();
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_THREADS);

        options.set_default(
            types::CONTEXT_LENGTH,
            if low {
                LOW_MEMORY_CONTEXT_LENGTH
            } else {
                DEFAULT_CONTEXT_LENGTH
            },
        );
        options.set_default(
            types::BATCH_SIZE,
            if low { 1 } else { self.config.service.batch_size },
        );
        options.set_default(types::THREADS, threads);
        options.set_default(types::MMAP, true);
        options.set_default(types::MLOCK, false);
        options
    }

    /// Unload the current model. A no-op when nothing is loaded.
    pub async fn unload_model(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        if !self.state.is_model_loaded() {
            return Ok(());
        }

        self.backend.unload_model().await.map_err(|e| {
            warn!("Error unloading model: {}", e);
            e
        })?;
        self.state.set_unloaded();
        let cleared = self.contexts.clear();
        info!(cleared_contexts = cleared, "Model unloaded");
        Ok(())
    }

    /// Start the background maintenance jobs. Starting twice is a no-op.
    pub fn start_maintenance(&self) -> Result<()> {
        if self.state.is_shutting_down() {
            return Err(EngineError::State("service is shut down".to_string()));
        }
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_none() {
            *scheduler = Some(MaintenanceScheduler::start(
                Arc::clone(&self.tasks),
                &self.config.maintenance,
            )?);
        }
        Ok(())
    }

    /// Run every maintenance job once, in order
    pub fn run_maintenance(&self) -> crate::maintenance::TickReport {
        self.tasks.tick()
    }

    /// Fail pending work, stop maintenance and unload the model.
    ///
    /// Requests already handed to a drain cycle but not yet started fail
    /// with `EngineError::Shutdown`; an in-flight backend call is allowed to
    /// finish. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        if !self.state.begin_shutdown() {
            return;
        }
        info!("Shutting down inference service");

        let failed = self.coordinator.fail_all(EngineError::Shutdown);
        if failed > 0 {
            info!("Failed {} pending requests", failed);
        }

        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }

        if let Err(e) = self.unload_model().await {
            warn!("Model unload during shutdown failed: {}", e);
        }
        info!("Inference service shutdown complete");
    }

    /// The request drainer, for instrumentation
    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }
}
