//! Command handlers for CLI operations
//!
//! - ask: one-shot generation
//! - chat: interactive conversation bound to one context
//! - stats: scripted warm-up followed by a statistics dump
//! - config show / config path

use anyhow::{Context, Result};
use ember_sdk::EmberErrorExt;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::backend;
use crate::config::{BackendKind, Config};
use crate::memory::SysinfoProbe;
use crate::service::InferenceService;

/// Model name used by the echo backend when none is configured
const ECHO_MODEL: &str = "builtin-echo";

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Build a service around the configured backend and load a model into it
async fn start_service(config: &Config, model: Option<String>) -> Result<InferenceService> {
    let backend = backend::from_config(&config.backend).context("Failed to create backend")?;
    let service = InferenceService::new(backend, Arc::new(SysinfoProbe::new()), config);

    let model = resolve_model(config, model)?;
    service
        .load_model(&model, None)
        .await
        .with_context(|| format!("Failed to load model {}", model))?;
    service.start_maintenance()?;
    Ok(service)
}

/// Pick the model: command line first, then `backend.model`
fn resolve_model(config: &Config, model: Option<String>) -> Result<String> {
    if let Some(model) = model.or_else(|| config.backend.model.clone()) {
        return Ok(model);
    }
    match config.backend.kind {
        BackendKind::Echo => Ok(ECHO_MODEL.to_string()),
        BackendKind::Command => Err(anyhow::anyhow!(
            "No model configured. Pass --model or set backend.model in config.toml"
        )),
    }
}

/// Generate a single reply
pub async fn handle_ask(
    prompt: String,
    model: Option<String>,
    system: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let service = start_service(config, model).await?;

    let context = system
        .as_deref()
        .map(|system| service.create_context(None, Some(system)));
    let result = service
        .generate_sync(
            &prompt,
            context.as_deref(),
            None,
            config.service.inference_timeout(),
        )
        .await;
    service.shutdown().await;

    let reply = result?;
    match format {
        OutputFormat::Text => println!("{}", reply),
        OutputFormat::Json => {
            let output = json!({
                "status": "completed",
                "prompt": prompt,
                "reply": reply,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Interactive conversation
///
/// Every line read from stdin is one user turn. `/reset` starts a fresh
/// context, `/stats` prints statistics and `/exit` (or end of input) quits.
pub async fn handle_chat(
    model: Option<String>,
    system: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let service = start_service(config, model).await?;
    let mut context = service.create_context(None, system.as_deref());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    if let OutputFormat::Text = format {
        println!(
            "Chatting with {} (/exit to quit, /reset to start over)",
            service.statistics().current_model.unwrap_or_default()
        );
    }

    loop {
        if let OutputFormat::Text = format {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                service.remove_context(&context);
                context = service.create_context(None, system.as_deref());
                if let OutputFormat::Text = format {
                    println!("(conversation reset)");
                }
                continue;
            }
            "/stats" => {
                print_statistics(&service, format)?;
                continue;
            }
            _ => {}
        }

        let result = service
            .generate_sync(line, Some(&context), None, config.service.inference_timeout())
            .await;

        match (result, format) {
            (Ok(reply), OutputFormat::Text) => println!("{}", reply),
            (Ok(reply), OutputFormat::Json) => {
                println!("{}", json!({ "context": context, "reply": reply }));
            }
            (Err(e), OutputFormat::Text) => {
                eprintln!("Error: {}", e);
                eprintln!("Hint: {}", e.user_hint());
            }
            (Err(e), OutputFormat::Json) => {
                println!("{}", json!({ "context": context, "error": e.to_string() }));
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

/// Send a few warm-up requests, then print statistics
pub async fn handle_stats(
    requests: usize,
    model: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let service = start_service(config, model).await?;
    let context = service.create_context(Some("warmup"), None);

    let handles = (0..requests)
        .map(|i| {
            let ctx = if i % 2 == 0 { Some(context.as_str()) } else { None };
            service.generate(&format!("warm-up request {}", i + 1), ctx, None)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut failures = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Warm-up request failed: {}", e);
            failures += 1;
        }
    }

    service.run_maintenance();
    print_statistics(&service, format)?;
    if let OutputFormat::Text = format {
        if failures > 0 {
            println!("{} of {} warm-up requests failed", failures, requests);
        }
    }

    service.shutdown().await;
    Ok(())
}

fn print_statistics(service: &InferenceService, format: OutputFormat) -> Result<()> {
    let stats = service.statistics();
    let memory = service.memory_stats();

    match format {
        OutputFormat::Text => {
            println!("Model:              {}", stats.current_model.as_deref().unwrap_or("(none)"));
            println!("Inferences:         {}", stats.total_inferences);
            println!("Chars processed:    {}", stats.total_chars_processed);
            println!("Failed / timed out: {} / {}", stats.failed_requests, stats.timed_out_requests);
            println!("Active contexts:    {}", stats.active_contexts);
            println!("Queued requests:    {}", stats.queued_requests);
            println!("Drain cycles:       {}", stats.drain_cycles);
            println!("Low memory mode:    {}", stats.low_memory_mode);
            println!("Memory (MB):        {} current, {} peak", memory.current_memory_usage_mb, stats.peak_memory_mb);
            println!("Available (MB):     {}", memory.available_memory_mb);
            println!("Context chars held: {}", memory.total_context_length);
        }
        OutputFormat::Json => {
            let output = json!({
                "statistics": stats,
                "memory": memory,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
            print!("{}", rendered);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Print where the configuration is read from
pub fn handle_config_path(custom: Option<&Path>, format: OutputFormat) -> Result<()> {
    let path = match custom {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => println!("{}", json!({ "path": path })),
    }
    Ok(())
}
