//! Memory governor
//!
//! Samples available system memory and moves the service between two modes:
//!
//! - `Normal`: full batch size, contexts get the configured max length
//! - `LowMemory`: batch size 1, new contexts get the reduced max length
//!
//! Entering `LowMemory` drops every conversation context and releases the
//! store's capacity. Leaving it needs available memory of at least
//! `threshold + hysteresis`. Every sample also raises the recorded peak
//! process memory.

mod probe;

pub use probe::{MemoryProbe, StaticProbe, SysinfoProbe};

use crate::config::{ContextConfig, MemoryConfig};
use crate::context::ConversationContextStore;
use crate::stats::ServiceState;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Operating mode derived from memory pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    Normal,
    LowMemory,
}

/// Result of one governor sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub available_mb: u64,
    pub used_mb: u64,
    pub mode: MemoryMode,
    /// Whether this sample changed the mode
    pub transitioned: bool,
}

pub struct MemoryGovernor {
    probe: Arc<dyn MemoryProbe>,
    state: Arc<ServiceState>,
    contexts: Arc<ConversationContextStore>,
    threshold_mb: u64,
    hysteresis_mb: u64,
    normal_max_length: usize,
    low_memory_max_length: usize,
}

impl MemoryGovernor {
    pub fn new(
        probe: Arc<dyn MemoryProbe>,
        state: Arc<ServiceState>,
        contexts: Arc<ConversationContextStore>,
        memory: &MemoryConfig,
        context: &ContextConfig,
    ) -> Self {
        Self {
            probe,
            state,
            contexts,
            threshold_mb: memory.threshold_mb,
            hysteresis_mb: memory.hysteresis_mb,
            normal_max_length: context.max_length,
            low_memory_max_length: context.low_memory_max_length,
        }
    }

    pub fn mode(&self) -> MemoryMode {
        if self.state.is_low_memory() {
            MemoryMode::LowMemory
        } else {
            MemoryMode::Normal
        }
    }

    /// Current process memory in MB
    pub fn current_mb(&self) -> u64 {
        self.probe.used_mb()
    }

    /// Memory still available to the system in MB. Does not change the mode.
    pub fn available_mb(&self) -> u64 {
        self.probe.available_mb()
    }

    /// Take one sample and apply any mode transition it implies
    pub fn sample(&self) -> MemorySample {
        let available_mb = self.probe.available_mb();
        let used_mb = self.probe.used_mb();
        self.state.observe_memory(used_mb);

        let low = self.state.is_low_memory();
        let transitioned = if !low && available_mb < self.threshold_mb {
            self.enter_low_memory(available_mb);
            true
        } else if low && available_mb >= self.threshold_mb.saturating_add(self.hysteresis_mb) {
            self.leave_low_memory(available_mb);
            true
        } else {
            false
        };

        debug!(available_mb, used_mb, low_memory = self.state.is_low_memory(), "Memory sampled");
        MemorySample {
            available_mb,
            used_mb,
            mode: self.mode(),
            transitioned,
        }
    }

    fn enter_low_memory(&self, available_mb: u64) {
        self.state.set_low_memory(true);
        self.contexts
            .set_default_max_length(self.low_memory_max_length);
        let cleared = self.contexts.clear();
        self.contexts.shrink();
        warn!(
            available_mb,
            threshold_mb = self.threshold_mb,
            cleared_contexts = cleared,
            "Low memory mode enabled"
        );
    }

    fn leave_low_memory(&self, available_mb: u64) {
        self.state.set_low_memory(false);
        self.contexts.set_default_max_length(self.normal_max_length);
        info!(available_mb, "Low memory mode disabled");
    }
}
