//! Configuration management
//!
//! This module handles loading, validation, and management of the Ember configuration.
//! Configuration is stored in TOML format at ~/.ember/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **service**: Batching and request timeout settings
//! - **context**: Conversation context store limits
//! - **memory**: Low-memory detection thresholds
//! - **maintenance**: Background task intervals
//! - **backend**: Which backend the CLI drives and how
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! # Examples
//!
//! ```no_run
//! use ember_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! println!("Batch size: {}", config.service.batch_size);
//! println!("Context capacity: {}", config.context.capacity);
//! # Ok(())
//! # }
//! ```

use ember_sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Request batching and timeouts
    #[serde(default)]
    pub service: ServiceConfig,

    /// Conversation context store
    #[serde(default)]
    pub context: ContextConfig,

    /// Memory pressure detection
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Background maintenance intervals
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Backend selection
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Request batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Maximum requests drained per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a started batch waits for more requests (milliseconds)
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Deadline applied to every request at submission (milliseconds)
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
}

/// Conversation context store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum number of live contexts
    #[serde(default = "default_context_capacity")]
    pub capacity: usize,

    /// Idle time after which a context expires (seconds)
    #[serde(default = "default_context_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum history length in characters
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Maximum history length for contexts created in low-memory mode
    #[serde(default = "default_low_memory_max_length")]
    pub low_memory_max_length: usize,
}

/// Memory pressure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Low-memory mode is entered when available memory drops below this (MB)
    #[serde(default = "default_threshold_mb")]
    pub threshold_mb: u64,

    /// Extra headroom required above the threshold before leaving low-memory mode (MB)
    #[serde(default)]
    pub hysteresis_mb: u64,
}

/// Background maintenance intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Expired context cleanup interval (seconds)
    #[serde(default = "default_context_cleanup_secs")]
    pub context_cleanup_secs: u64,

    /// Memory sampling interval (seconds)
    #[serde(default = "default_memory_check_secs")]
    pub memory_check_secs: u64,

    /// Statistics logging interval (seconds)
    #[serde(default = "default_stats_log_secs")]
    pub stats_log_secs: u64,

    /// Lapsed queued request purge interval (seconds)
    #[serde(default = "default_queue_purge_secs")]
    pub queue_purge_secs: u64,
}

/// Backend kinds the CLI knows how to build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Deterministic echo backend
    Echo,
    /// External generation program
    Command,
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend kind (echo, command)
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,

    /// Program to run for the command backend (supports ~ expansion)
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Argument template; `{model}` is replaced with the loaded model path
    #[serde(default)]
    pub args: Vec<String>,

    /// Per-inference process timeout (seconds)
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,

    /// Model loaded by the CLI at startup
    #[serde(default)]
    pub model: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_size() -> usize {
    4
}

fn default_batch_timeout_ms() -> u64 {
    100
}

fn default_inference_timeout_ms() -> u64 {
    30_000
}

fn default_context_capacity() -> usize {
    10
}

fn default_context_ttl_secs() -> u64 {
    900
}

fn default_max_length() -> usize {
    2048
}

fn default_low_memory_max_length() -> usize {
    1024
}

fn default_threshold_mb() -> u64 {
    2048
}

fn default_context_cleanup_secs() -> u64 {
    300
}

fn default_memory_check_secs() -> u64 {
    60
}

fn default_stats_log_secs() -> u64 {
    600
}

fn default_queue_purge_secs() -> u64 {
    30
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Echo
}

fn default_backend_timeout_secs() -> u64 {
    120
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            inference_timeout_ms: default_inference_timeout_ms(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            capacity: default_context_capacity(),
            ttl_secs: default_context_ttl_secs(),
            max_length: default_max_length(),
            low_memory_max_length: default_low_memory_max_length(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            threshold_mb: default_threshold_mb(),
            hysteresis_mb: 0,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            context_cleanup_secs: default_context_cleanup_secs(),
            memory_check_secs: default_memory_check_secs(),
            stats_log_secs: default_stats_log_secs(),
            queue_purge_secs: default_queue_purge_secs(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            program: None,
            args: Vec::new(),
            timeout_secs: default_backend_timeout_secs(),
            model: None,
        }
    }
}

impl ServiceConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

impl ContextConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Config {
    /// Load configuration from the default location (~/.ember/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.ember/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".ember").join("config.toml"))
    }

    /// Validate and process configuration
    ///
    /// Rejects values that would make the service unable to make progress
    /// (zero batch size, zero capacity, zero timeouts) and expands `~` in
    /// the backend program path.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.service.batch_size == 0 {
            return Err(EngineError::Config(
                "service.batch_size must be at least 1".to_string(),
            ));
        }
        if self.service.inference_timeout_ms == 0 {
            return Err(EngineError::Config(
                "service.inference_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.context.capacity == 0 {
            return Err(EngineError::Config(
                "context.capacity must be at least 1".to_string(),
            ));
        }
        if self.context.max_length == 0 || self.context.low_memory_max_length == 0 {
            return Err(EngineError::Config(
                "context max lengths must be greater than 0".to_string(),
            ));
        }
        if self.context.low_memory_max_length > self.context.max_length {
            return Err(EngineError::Config(
                "context.low_memory_max_length must not exceed context.max_length".to_string(),
            ));
        }

        let intervals = [
            self.maintenance.context_cleanup_secs,
            self.maintenance.memory_check_secs,
            self.maintenance.stats_log_secs,
            self.maintenance.queue_purge_secs,
        ];
        if intervals.contains(&0) {
            return Err(EngineError::Config(
                "maintenance intervals must be greater than 0".to_string(),
            ));
        }

        if let Some(program) = &self.backend.program {
            self.backend.program = Some(expand_path(program)?);
        }
        if self.backend.kind == BackendKind::Command && self.backend.program.is_none() {
            return Err(EngineError::Config(
                "backend.program is required when backend.kind = \"command\"".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.service.batch_size, 4);
        assert_eq!(config.service.batch_timeout(), Duration::from_millis(100));
        assert_eq!(config.service.inference_timeout(), Duration::from_secs(30));
        assert_eq!(config.context.capacity, 10);
        assert_eq!(config.context.ttl(), Duration::from_secs(900));
        assert_eq!(config.memory.threshold_mb, 2048);
        assert_eq!(config.memory.hysteresis_mb, 0);
        assert_eq!(config.backend.kind, BackendKind::Echo);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.context.max_length, 2048);
        assert_eq!(config.maintenance.memory_check_secs, 60);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
[service]
batch_size = 8
"#,
        )
        .unwrap();
        assert_eq!(config.service.batch_size, 8);
        assert_eq!(config.service.batch_timeout_ms, 100);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = Config::from_toml_str("[service]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("batch_size")));
    }

    #[test]
    fn test_rejects_invalid_log_level() {
        let err = Config::from_toml_str("[core]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("loud")));
    }

    #[test]
    fn test_rejects_inverted_context_lengths() {
        let err = Config::from_toml_str(
            "[context]\nmax_length = 512\nlow_memory_max_length = 1024\n",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_command_backend_requires_program() {
        let err = Config::from_toml_str("[backend]\nkind = \"command\"\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("backend.program")));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/bin/llama-cli");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("bin/llama-cli"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/usr/local/bin/llama-cli");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.service.batch_size, deserialized.service.batch_size);
        assert_eq!(config.backend.kind, deserialized.backend.kind);
    }
}
