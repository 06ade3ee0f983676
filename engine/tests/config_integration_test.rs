//! Integration tests for configuration management
//!
//! These tests verify that configuration files are loaded from disk,
//! defaulted, validated and rendered back to TOML.

use ember_engine::config::{BackendKind, Config};
use ember_sdk::errors::EngineError;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_config_toml_parsing() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
[core]
log_level = "debug"

[service]
batch_size = 8
batch_timeout_ms = 50
inference_timeout_ms = 5000

[context]
capacity = 32
ttl_secs = 120
max_length = 4096
low_memory_max_length = 512

[memory]
threshold_mb = 1024
hysteresis_mb = 256

[maintenance]
context_cleanup_secs = 60
memory_check_secs = 10
stats_log_secs = 300
queue_purge_secs = 5

[backend]
kind = "command"
program = "/usr/local/bin/llama-cli"
args = ["-m", "{model}", "-n", "{max_tokens}"]
timeout_secs = 90
model = "models/tiny.gguf"
"#,
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.service.batch_size, 8);
    assert_eq!(config.service.batch_timeout(), Duration::from_millis(50));
    assert_eq!(config.service.inference_timeout(), Duration::from_secs(5));
    assert_eq!(config.context.capacity, 32);
    assert_eq!(config.context.ttl(), Duration::from_secs(120));
    assert_eq!(config.context.low_memory_max_length, 512);
    assert_eq!(config.memory.threshold_mb, 1024);
    assert_eq!(config.memory.hysteresis_mb, 256);
    assert_eq!(config.maintenance.queue_purge_secs, 5);
    assert_eq!(config.backend.kind, BackendKind::Command);
    assert_eq!(
        config.backend.program,
        Some(PathBuf::from("/usr/local/bin/llama-cli"))
    );
    assert_eq!(config.backend.args.len(), 4);
    assert_eq!(config.backend.model.as_deref(), Some("models/tiny.gguf"));
}

#[test]
fn test_empty_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "");

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.service.batch_size, 4);
    assert_eq!(config.service.batch_timeout_ms, 100);
    assert_eq!(config.service.inference_timeout_ms, 30_000);
    assert_eq!(config.context.capacity, 10);
    assert_eq!(config.context.ttl_secs, 900);
    assert_eq!(config.context.max_length, 2048);
    assert_eq!(config.memory.threshold_mb, 2048);
    assert_eq!(config.memory.hysteresis_mb, 0);
    assert_eq!(config.backend.kind, BackendKind::Echo);
}

#[test]
fn test_partial_section_keeps_other_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "[service]\nbatch_size = 2\n");

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.service.batch_size, 2);
    assert_eq!(config.service.batch_timeout_ms, 100);
    assert_eq!(config.context.capacity, 10);
}

#[test]
fn test_missing_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = Config::load_from_path(&temp_dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "[service\nbatch_size = ");

    let err = Config::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config"));
}

#[test]
fn test_invalid_values_rejected() {
    let cases = [
        "[core]\nlog_level = \"loud\"\n",
        "[service]\nbatch_size = 0\n",
        "[service]\ninference_timeout_ms = 0\n",
        "[context]\ncapacity = 0\n",
        "[context]\nmax_length = 100\nlow_memory_max_length = 200\n",
        "[maintenance]\nmemory_check_secs = 0\n",
        "[backend]\nkind = \"command\"\n",
    ];

    for case in cases {
        let err = Config::from_toml_str(case).unwrap_err();
        assert!(
            matches!(err, EngineError::Config(_)),
            "expected config error for {:?}",
            case
        );
    }
}

#[test]
fn test_backend_program_tilde_expansion() {
    let config = Config::from_toml_str(
        "[backend]\nkind = \"command\"\nprogram = \"~/bin/generate\"\n",
    )
    .unwrap();

    let program = config.backend.program.unwrap();
    assert!(!program.to_string_lossy().starts_with('~'));
    assert!(program.ends_with("bin/generate"));
}

#[test]
fn test_rendered_config_loads_back() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.service.batch_size = 6;
    config.context.ttl_secs = 42;

    let path = write_config(&temp_dir, &toml::to_string_pretty(&config).unwrap());
    let loaded = Config::load_from_path(&path).unwrap();

    assert_eq!(loaded.service.batch_size, 6);
    assert_eq!(loaded.context.ttl_secs, 42);
}

#[test]
fn test_default_config_path_is_under_home() {
    let path = Config::default_config_path().unwrap();
    assert!(path.ends_with(".ember/config.toml"));
}
