//! Ember Engine Library
//!
//! Inference-serving core: many concurrent callers share one scarce text
//! generation backend. Requests are queued, drained in small batches by a
//! single elected drainer and run one at a time against the backend, with
//! bounded per-conversation history and memory-pressure handling.
//! It is used by both the `ember` binary and integration tests.

/// Configuration management module
pub mod config;

/// Conversation contexts and their bounded store
pub mod context;

/// Generation requests and result handles
pub mod request;

/// Service state, counters and statistics snapshots
pub mod stats;

/// Shipped inference backends
pub mod backend;

/// Single-request backend invocation
pub mod executor;

/// Single-flight batch draining of the request queue
pub mod batch;

/// Memory pressure detection and low-memory mode
pub mod memory;

/// Periodic background housekeeping
pub mod maintenance;

/// Caller-facing inference service
pub mod service;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

pub use service::InferenceService;
