//! Shipped inference backends
//!
//! The service talks to backends only through
//! [`ember_sdk::backend::InferenceBackend`]. Two implementations ship with
//! the engine:
//! - `EchoBackend` - deterministic, in-process; used for smoke tests and the
//!   CLI demo
//! - `CommandBackend` - runs a local generation program once per inference

mod command;
mod echo;

pub use command::CommandBackend;
pub use echo::EchoBackend;

use crate::config::{BackendConfig, BackendKind};
use ember_sdk::backend::InferenceBackend;
use ember_sdk::errors::Result;
use std::sync::Arc;

/// Build the backend selected by configuration
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn InferenceBackend>> {
    match config.kind {
        BackendKind::Echo => Ok(Arc::new(EchoBackend::new())),
        BackendKind::Command => Ok(Arc::new(CommandBackend::from_config(config)?)),
    }
}
