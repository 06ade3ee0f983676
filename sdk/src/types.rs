//! Option bag forwarded to backends
//!
//! The engine never interprets option values beyond filling load-time
//! defaults; backends read the keys they understand.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Context window requested from the backend (int)
pub const CONTEXT_LENGTH: &str = "context_length";

/// Backend-side batch size (int)
pub const BATCH_SIZE: &str = "batch_size";

/// Worker threads used by the backend (int)
pub const THREADS: &str = "threads";

/// Memory-map model weights (bool)
pub const MMAP: &str = "mmap";

/// Lock model weights in RAM (bool)
pub const MLOCK: &str = "mlock";

/// Keys every backend is expected to recognize
pub const RECOGNIZED_KEYS: [&str; 5] = [CONTEXT_LENGTH, BATCH_SIZE, THREADS, MMAP, MLOCK];

/// Opaque key/value options attached to a load or inference call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options {
    values: BTreeMap<String, serde_json::Value>,
}

impl Options {
    /// Create an empty option bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option, replacing any previous value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set an option, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Set an option only if the caller has not provided it
    pub fn set_default(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.values
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }

    /// Get a raw option value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Get an integer option
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    /// Get a boolean option
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    /// Get a string option
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over options in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }
}
