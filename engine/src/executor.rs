//! Inference executor
//!
//! Runs exactly one request against the backend: resolves the request's
//! conversation context (if any), builds the prompt, calls the backend while
//! holding the backend gate, records the turn and delivers the outcome.
//! A failing or panicking backend call fails only its own request.

use crate::context::ConversationContextStore;
use crate::request::GenerationRequest;
use crate::stats::ServiceState;
use ember_sdk::backend::InferenceBackend;
use ember_sdk::errors::EngineError;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn, Instrument};

/// How a processed request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    TimedOut,
}

/// Invokes the backend for one request at a time
pub struct InferenceExecutor {
    backend: Arc<dyn InferenceBackend>,
    gate: Arc<Mutex<()>>,
    contexts: Arc<ConversationContextStore>,
    state: Arc<ServiceState>,
}

impl InferenceExecutor {
    /// Create an executor.
    ///
    /// `gate` is the backend's capacity-1 lock; it must be the same lock used
    /// by model load and unload.
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        gate: Arc<Mutex<()>>,
        contexts: Arc<ConversationContextStore>,
        state: Arc<ServiceState>,
    ) -> Self {
        Self {
            backend,
            gate,
            contexts,
            state,
        }
    }

    /// Process one request and deliver its result
    pub async fn process_one(&self, request: GenerationRequest) -> Outcome {
        let span = tracing::debug_span!(
            "inference",
            request_id = %request.id(),
            context_id = request.context_id().unwrap_or("-"),
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: GenerationRequest) -> Outcome {
        if request.is_expired() {
            return self.time_out(request);
        }

        let prompt = match request.context_id() {
            Some(id) => {
                let entry = self.contexts.create_or_get(id, None);
                let prompt = entry.lock().build_prompt(request.input());
                prompt
            }
            None => request.input().to_string(),
        };

        let gate = match tokio::time::timeout_at(request.deadline(), self.gate.lock()).await {
            Ok(guard) => guard,
            Err(_) => return self.time_out(request),
        };

        debug!(prompt_chars = prompt.len(), "Invoking backend");
        let result = AssertUnwindSafe(self.backend.infer(&prompt, request.options()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(EngineError::Backend("backend panicked".to_string())));
        drop(gate);

        let output = match result {
            Ok(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Err(EngineError::Backend("backend returned empty output".to_string()))
                } else {
                    Ok(trimmed.to_string())
                }
            }
            Err(EngineError::Backend(msg)) => Err(EngineError::Backend(msg)),
            Err(other) => Err(EngineError::Backend(other.to_string())),
        };

        match output {
            Ok(output) => {
                if let Some(id) = request.context_id() {
                    if let Err(e) = self.contexts.append_turn(id, request.input(), &output) {
                        warn!("Turn not recorded: {}", e);
                    }
                }

                let chars = request.input().chars().count() + output.chars().count();
                self.state.record_inference(chars);
                debug!(output_chars = output.len(), "Inference completed");
                request.fulfill(Ok(output));
                Outcome::Completed
            }
            Err(e) => {
                self.state.record_failure();
                warn!("Inference failed: {}", e);
                request.fulfill(Err(e));
                Outcome::Failed
            }
        }
    }

    fn time_out(&self, request: GenerationRequest) -> Outcome {
        self.state.record_timeout();
        debug!("Request deadline passed before backend call");
        request.fail_timeout();
        Outcome::TimedOut
    }
}
