//! Ember SDK
//!
//! Shared contract between the Ember engine and the text-generation backends
//! it drives. Backend authors depend on this crate only.

/// Backend collaborator trait
pub mod backend;

/// Error types and handling
pub mod errors;

/// Option bag forwarded to backends
pub mod types;

// Re-export commonly used types
pub use backend::InferenceBackend;
pub use errors::{EmberErrorExt, EngineError, Result};
pub use types::Options;
