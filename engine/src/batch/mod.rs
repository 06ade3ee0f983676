//! Batch coordinator
//!
//! Pending requests go into a FIFO queue. Whoever wins the `draining` flag
//! spawns a drain task; everybody else just enqueues. A drain cycle collects
//! up to `batch_size` requests, waiting at most `batch_timeout` after the
//! first one for more to arrive, then hands them to the executor in pop
//! order. When a cycle finishes and the queue is not empty, a fresh cycle
//! starts right away.
//!
//! Requests whose deadline has passed when popped are failed with a timeout
//! and never reach the backend.
//!
//! Ordering is only guaranteed within one batch. Two requests for the same
//! context that land in different cycles are serialized by the context's
//! own lock, not by submission order.

use crate::executor::InferenceExecutor;
use crate::request::GenerationRequest;
use crate::stats::ServiceState;
use ember_sdk::errors::{EngineError, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info_span, Instrument};

/// Single-flight drainer for the pending request queue
pub struct BatchCoordinator {
    queue: Mutex<VecDeque<GenerationRequest>>,
    draining: AtomicBool,
    notify: Notify,
    executor: Arc<InferenceExecutor>,
    state: Arc<ServiceState>,
    batch_size: usize,
    batch_timeout: Duration,
    drain_cycles: AtomicU64,
    active_drains: AtomicUsize,
    max_concurrent_drains: AtomicUsize,
    largest_batch: AtomicUsize,
}

impl BatchCoordinator {
    pub fn new(
        executor: Arc<InferenceExecutor>,
        state: Arc<ServiceState>,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            notify: Notify::new(),
            executor,
            state,
            batch_size: batch_size.max(1),
            batch_timeout,
            drain_cycles: AtomicU64::new(0),
            active_drains: AtomicUsize::new(0),
            max_concurrent_drains: AtomicUsize::new(0),
            largest_batch: AtomicUsize::new(0),
        }
    }

    /// Queue a request and make sure a drainer is running.
    ///
    /// Must be called from within a tokio runtime; otherwise the request is
    /// rejected with `EngineError::State` and nothing is queued.
    pub fn submit(self: &Arc<Self>, request: GenerationRequest) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|_| EngineError::State("no async runtime available".to_string()))?;

        debug!(request_id = %request.id(), "Request queued");
        self.enqueue(request);
        self.try_start_drain(&runtime);
        Ok(())
    }

    pub(crate) fn enqueue(&self, request: GenerationRequest) {
        self.queue.lock().push_back(request);
        self.notify.notify_one();
    }

    fn try_start_drain(self: &Arc<Self>, runtime: &Handle) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let this = Arc::clone(self);
            runtime.spawn(async move { this.drain().await });
        }
    }

    /// Run cycles until the queue is empty, then give up the drainer role
    async fn drain(self: Arc<Self>) {
        loop {
            let active = self.active_drains.fetch_add(1, Ordering::AcqRel) + 1;
            self.max_concurrent_drains.fetch_max(active, Ordering::AcqRel);

            let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
            if cycle.is_err() {
                error!("Drain cycle panicked; in-hand requests were dropped");
            }
            self.active_drains.fetch_sub(1, Ordering::AcqRel);

            self.draining.store(false, Ordering::Release);

            // A submit that lost the race above has already pushed its request
            if self.queue.lock().is_empty() {
                break;
            }
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
        }
    }

    async fn run_cycle(&self) {
        let cycle = self.drain_cycles.fetch_add(1, Ordering::Relaxed) + 1;

        let batch = self.collect_batch().await;
        self.largest_batch.fetch_max(batch.len(), Ordering::Relaxed);

        let span = info_span!("drain", cycle, batch_size = batch.len());
        self.process_batch(batch).instrument(span).await;
    }

    /// Pop up to the current batch size, waiting briefly for stragglers
    async fn collect_batch(&self) -> Vec<GenerationRequest> {
        let limit = self.current_batch_size();
        let mut batch = Vec::with_capacity(limit);
        let mut first_at: Option<Instant> = None;

        while batch.len() < limit {
            let next = self.queue.lock().pop_front();
            match next {
                Some(request) if request.is_expired() => self.expire(request),
                Some(request) => {
                    first_at.get_or_insert_with(Instant::now);
                    batch.push(request);
                }
                None => {
                    let Some(first) = first_at else {
                        break;
                    };
                    let deadline = first + self.batch_timeout;
                    if Instant::now() >= deadline {
                        break;
                    }
                    if tokio::time::timeout_at(deadline, self.notify.notified())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }

        batch
    }

    async fn process_batch(&self, batch: Vec<GenerationRequest>) {
        for request in batch {
            if self.state.is_shutting_down() {
                request.fulfill(Err(EngineError::Shutdown));
                continue;
            }
            self.executor.process_one(request).await;
        }
    }

    fn expire(&self, request: GenerationRequest) {
        debug!(request_id = %request.id(), "Dropping expired request");
        self.state.record_timeout();
        request.fail_timeout();
    }

    /// Batch size in effect right now (1 while memory is low)
    pub fn current_batch_size(&self) -> usize {
        if self.state.is_low_memory() {
            1
        } else {
            self.batch_size
        }
    }

    /// Fail every queued request whose deadline has passed.
    ///
    /// Returns the number of requests failed.
    pub fn purge_expired(&self) -> usize {
        let expired: Vec<GenerationRequest> = {
            let mut queue = self.queue.lock();
            let (expired, live): (Vec<_>, Vec<_>) =
                queue.drain(..).partition(|request| request.is_expired());
            queue.extend(live);
            expired
        };

        let count = expired.len();
        for request in expired {
            self.expire(request);
        }
        if count > 0 {
            debug!("Purged {} expired requests", count);
        }
        count
    }

    /// Fail every queued request with `error`, returning how many were failed
    pub fn fail_all(&self, error: EngineError) -> usize {
        let pending: Vec<GenerationRequest> = self.queue.lock().drain(..).collect();
        let count = pending.len();
        for request in pending {
            request.fulfill(Err(error.clone()));
        }
        count
    }

    /// Number of queued (not yet popped) requests
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Drain cycles started since creation
    pub fn drain_cycles(&self) -> u64 {
        self.drain_cycles.load(Ordering::Relaxed)
    }

    pub fn active_drains(&self) -> usize {
        self.active_drains.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously active drain cycles ever observed
    pub fn max_concurrent_drains(&self) -> usize {
        self.max_concurrent_drains.load(Ordering::Acquire)
    }

    /// Size of the largest batch handed to the executor
    pub fn largest_batch(&self) -> usize {
        self.largest_batch.load(Ordering::Relaxed)
    }
}
