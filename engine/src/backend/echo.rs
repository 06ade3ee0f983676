//! Echo backend
//!
//! Replies with the latest user turn of the prompt, prefixed. Every prompt
//! it sees is recorded so tests can assert on what reached the backend.

use async_trait::async_trait;
use ember_sdk::backend::InferenceBackend;
use ember_sdk::errors::{EngineError, Result};
use ember_sdk::types::Options;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

const DEFAULT_PREFIX: &str = "echo: ";
const USER_MARKER: &str = "User: ";
const ASSISTANT_CUE: &str = "\nAssistant:";

/// Deterministic in-process backend
#[derive(Debug)]
pub struct EchoBackend {
    prefix: String,
    latency: Duration,
    model: Mutex<Option<String>>,
    load_options: Mutex<Option<Options>>,
    prompts: Mutex<Vec<String>>,
    fail_loads: AtomicBool,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    /// Echo with a custom reply prefix
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            latency: Duration::ZERO,
            model: Mutex::new(None),
            load_options: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            fail_loads: AtomicBool::new(false),
        }
    }

    /// Sleep for `latency` inside every inference
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make subsequent `load_model` calls fail
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::Release);
    }

    /// Every prompt received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Path of the model currently held
    pub fn loaded_model(&self) -> Option<String> {
        self.model.lock().clone()
    }

    /// Options passed to the most recent successful load
    pub fn load_options(&self) -> Option<Options> {
        self.load_options.lock().clone()
    }

    fn reply_to(&self, prompt: &str) -> String {
        let latest = match prompt.rfind(USER_MARKER) {
            Some(idx) => {
                let rest = &prompt[idx + USER_MARKER.len()..];
                rest.strip_suffix(ASSISTANT_CUE).unwrap_or(rest)
            }
            None => prompt,
        };
        format!("{}{}", self.prefix, latest.trim())
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn load_model(&self, path: &str, options: &Options) -> Result<()> {
        if self.fail_loads.load(Ordering::Acquire) {
            return Err(EngineError::Backend(format!("cannot load {}", path)));
        }
        debug!(model = %path, options = options.len(), "Echo backend loaded model");
        // The previous model stays until this point
        *self.model.lock() = Some(path.to_string());
        *self.load_options.lock() = Some(options.clone());
        Ok(())
    }

    async fn infer(&self, prompt: &str, _options: &Options) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.reply_to(prompt))
    }

    async fn unload_model(&self) -> Result<()> {
        self.model.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raw_prompt_is_echoed() {
        let echo = EchoBackend::new();
        let reply = echo.infer("hello", &Options::new()).await.unwrap();
        assert_eq!(reply, "echo: hello");
    }

    #[tokio::test]
    async fn test_replies_to_latest_user_turn() {
        let echo = EchoBackend::with_prefix("");
        let prompt = "System: terse\n\nUser: one\nAssistant: 1\n\nUser: two\nAssistant:";
        assert_eq!(echo.infer(prompt, &Options::new()).await.unwrap(), "two");
        assert_eq!(echo.prompts(), vec![prompt.to_string()]);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_model() {
        let echo = EchoBackend::new();
        echo.load_model("a.gguf", &Options::new()).await.unwrap();

        echo.set_fail_loads(true);
        assert!(echo.load_model("b.gguf", &Options::new()).await.is_err());
        assert_eq!(echo.loaded_model().as_deref(), Some("a.gguf"));

        echo.unload_model().await.unwrap();
        assert_eq!(echo.loaded_model(), None);
    }
}
