//! Example demonstrating the InferenceBackend trait usage
//!
//! This example implements a small backend that shouts the last user turn
//! back, serves a handful of concurrent requests through the inference
//! service and prints the resulting statistics.

use async_trait::async_trait;
use ember_engine::config::Config;
use ember_engine::memory::SysinfoProbe;
use ember_engine::InferenceService;
use ember_sdk::{InferenceBackend, Options, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Backend that upper-cases the most recent user turn
struct ShoutBackend {
    model: Mutex<Option<String>>,
}

#[async_trait]
impl InferenceBackend for ShoutBackend {
    fn name(&self) -> &str {
        "shout"
    }

    async fn load_model(&self, path: &str, options: &Options) -> Result<()> {
        println!("Loading {} with {} options", path, options.len());
        *self.model.lock() = Some(path.to_string());
        Ok(())
    }

    async fn infer(&self, prompt: &str, _options: &Options) -> Result<String> {
        let last = prompt
            .rsplit("User: ")
            .next()
            .unwrap_or(prompt)
            .trim_end_matches("\nAssistant:");
        Ok(last.to_uppercase())
    }

    async fn unload_model(&self) -> Result<()> {
        self.model.lock().take();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let backend = Arc::new(ShoutBackend {
        model: Mutex::new(None),
    });
    let service = InferenceService::new(backend, Arc::new(SysinfoProbe::new()), &Config::default());
    service.load_model("models/shout.bin", None).await?;

    // One conversation with history
    let ctx = service.create_context(None, Some("You only shout."));
    for line in ["hello", "how are you", "goodbye"] {
        let reply = service.generate(line, Some(&ctx), None)?.await?;
        println!("{} -> {}", line, reply);
    }

    // A burst of context-free requests drained in batches
    let handles = (0..6)
        .map(|i| service.generate(&format!("request {}", i), None, None))
        .collect::<Result<Vec<_>>>()?;
    for handle in handles {
        println!("{}", handle.await?);
    }

    let stats = service.statistics();
    println!(
        "{} inferences in {} drain cycles, {} context(s) live",
        stats.total_inferences, stats.drain_cycles, stats.active_contexts
    );

    service.shutdown().await;
    Ok(())
}
