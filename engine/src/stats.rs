//! Service state and statistics
//!
//! `ServiceState` is the per-instance shared state: model lifecycle flags,
//! the low-memory flag and monotonically increasing counters. Readers never
//! mutate it, so statistics can be polled at any rate.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared model, memory and counter state for one service instance
#[derive(Debug, Default)]
pub struct ServiceState {
    model_loaded: AtomicBool,
    current_model: RwLock<Option<String>>,
    low_memory: AtomicBool,
    shutting_down: AtomicBool,
    total_inferences: AtomicU64,
    total_chars_processed: AtomicU64,
    failed_requests: AtomicU64,
    timed_out_requests: AtomicU64,
    peak_memory_mb: AtomicU64,
}

impl ServiceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model_loaded.load(Ordering::Acquire)
    }

    pub fn current_model(&self) -> Option<String> {
        self.current_model.read().clone()
    }

    /// Record a successfully loaded model
    pub fn set_loaded(&self, model: &str) {
        *self.current_model.write() = Some(model.to_string());
        self.model_loaded.store(true, Ordering::Release);
    }

    /// Record that no model is loaded
    pub fn set_unloaded(&self) {
        self.model_loaded.store(false, Ordering::Release);
        self.current_model.write().take();
    }

    pub fn is_low_memory(&self) -> bool {
        self.low_memory.load(Ordering::Acquire)
    }

    /// Set the low-memory flag, returning the previous value
    pub fn set_low_memory(&self, enabled: bool) -> bool {
        self.low_memory.swap(enabled, Ordering::AcqRel)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Mark the service as shutting down. Returns false if it already was.
    pub fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::AcqRel)
    }

    /// Count one completed inference and its characters (input + output)
    pub fn record_inference(&self, chars: usize) {
        self.total_inferences.fetch_add(1, Ordering::Relaxed);
        self.total_chars_processed
            .fetch_add(chars as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Raise the recorded peak memory if `current_mb` exceeds it
    pub fn observe_memory(&self, current_mb: u64) {
        self.peak_memory_mb.fetch_max(current_mb, Ordering::Relaxed);
    }

    pub fn total_inferences(&self) -> u64 {
        self.total_inferences.load(Ordering::Relaxed)
    }

    pub fn total_chars_processed(&self) -> u64 {
        self.total_chars_processed.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub fn timed_out_requests(&self) -> u64 {
        self.timed_out_requests.load(Ordering::Relaxed)
    }

    pub fn peak_memory_mb(&self) -> u64 {
        self.peak_memory_mb.load(Ordering::Relaxed)
    }
}

/// Snapshot returned by `InferenceService::statistics`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub model_loaded: bool,
    pub current_model: Option<String>,
    pub total_inferences: u64,
    pub total_chars_processed: u64,
    pub active_contexts: usize,
    pub queued_requests: usize,
    pub low_memory_mode: bool,
    #[serde(rename = "peakMemoryMB")]
    pub peak_memory_mb: u64,
    pub failed_requests: u64,
    pub timed_out_requests: u64,
    pub drain_cycles: u64,
}

/// Snapshot returned by `InferenceService::memory_stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub context_cache_size: usize,
    pub request_queue_size: usize,
    pub low_memory_mode: bool,
    #[serde(rename = "peakMemoryUsageMB")]
    pub peak_memory_usage_mb: u64,
    #[serde(rename = "currentMemoryUsageMB")]
    pub current_memory_usage_mb: u64,
    #[serde(rename = "availableMemoryMB")]
    pub available_memory_mb: u64,
    pub total_context_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_lifecycle_flags() {
        let state = ServiceState::new();
        assert!(!state.is_model_loaded());
        assert_eq!(state.current_model(), None);

        state.set_loaded("models/a.gguf");
        assert!(state.is_model_loaded());
        assert_eq!(state.current_model().as_deref(), Some("models/a.gguf"));

        state.set_unloaded();
        assert!(!state.is_model_loaded());
        assert_eq!(state.current_model(), None);
    }

    #[test]
    fn test_counters() {
        let state = ServiceState::new();
        state.record_inference(10);
        state.record_inference(5);
        state.record_failure();
        state.record_timeout();

        assert_eq!(state.total_inferences(), 2);
        assert_eq!(state.total_chars_processed(), 15);
        assert_eq!(state.failed_requests(), 1);
        assert_eq!(state.timed_out_requests(), 1);
    }

    #[test]
    fn test_peak_memory_only_rises() {
        let state = ServiceState::new();
        state.observe_memory(300);
        state.observe_memory(100);
        assert_eq!(state.peak_memory_mb(), 300);
    }

    #[test]
    fn test_shutdown_is_one_way() {
        let state = ServiceState::new();
        assert!(state.begin_shutdown());
        assert!(!state.begin_shutdown());
        assert!(state.is_shutting_down());
    }

    #[test]
    fn test_statistics_field_names() {
        let stats = Statistics {
            model_loaded: true,
            current_model: Some("m".into()),
            total_inferences: 1,
            total_chars_processed: 2,
            active_contexts: 3,
            queued_requests: 4,
            low_memory_mode: false,
            peak_memory_mb: 5,
            failed_requests: 0,
            timed_out_requests: 0,
            drain_cycles: 1,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["modelLoaded"], true);
        assert_eq!(json["totalCharsProcessed"], 2);
        assert_eq!(json["peakMemoryMB"], 5);
        assert_eq!(json["lowMemoryMode"], false);
    }

    #[test]
    fn test_memory_stats_field_names() {
        let stats = MemoryStats {
            context_cache_size: 2,
            request_queue_size: 0,
            low_memory_mode: true,
            peak_memory_usage_mb: 300,
            current_memory_usage_mb: 250,
            available_memory_mb: 512,
            total_context_length: 40,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["contextCacheSize"], 2);
        assert_eq!(json["peakMemoryUsageMB"], 300);
        assert_eq!(json["currentMemoryUsageMB"], 250);
        assert_eq!(json["availableMemoryMB"], 512);
        assert_eq!(json["totalContextLength"], 40);
    }
}
