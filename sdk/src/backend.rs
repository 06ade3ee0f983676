//! Backend collaborator trait
//!
//! The backend is the single scarce text-generation capability the engine
//! fronts. The engine guarantees that at most one call into a backend is in
//! flight at any time, so implementations do not need internal locking to
//! protect the model itself.

use crate::errors::Result;
use crate::types::Options;
use async_trait::async_trait;

/// Text-generation backend that all model runners must implement
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Returns the name of the backend (e.g., "echo", "command")
    fn name(&self) -> &str;

    /// Load the model at `path`
    ///
    /// When a model is already loaded this is a hot-swap: the implementation
    /// must keep the previous model usable until the new one is confirmed
    /// loaded, and only then release it. On error the previous model stays
    /// active.
    async fn load_model(&self, path: &str, options: &Options) -> Result<()>;

    /// Generate a completion for `prompt`
    ///
    /// # Returns
    /// * `Ok(String)` - Raw model output (the engine trims it)
    /// * `Err(EngineError::Backend)` - If generation fails
    async fn infer(&self, prompt: &str, options: &Options) -> Result<String>;

    /// Release the loaded model
    async fn unload_model(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use std::sync::Mutex;

    struct Reverse {
        loaded: Mutex<Option<String>>,
    }

    #[async_trait]
    impl InferenceBackend for Reverse {
        fn name(&self) -> &str {
            "reverse"
        }

        async fn load_model(&self, path: &str, _options: &Options) -> Result<()> {
            *self.loaded.lock().unwrap() = Some(path.to_string());
            Ok(())
        }

        async fn infer(&self, prompt: &str, _options: &Options) -> Result<String> {
            if self.loaded.lock().unwrap().is_none() {
                return Err(EngineError::Backend("not loaded".into()));
            }
            Ok(prompt.chars().rev().collect())
        }

        async fn unload_model(&self) -> Result<()> {
            self.loaded.lock().unwrap().take();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_trait_object_round_trip() {
        let backend: Box<dyn InferenceBackend> = Box::new(Reverse {
            loaded: Mutex::new(None),
        });
        let options = Options::new();

        assert!(backend.infer("abc", &options).await.is_err());
        backend.load_model("model.gguf", &options).await.unwrap();
        assert_eq!(backend.infer("abc", &options).await.unwrap(), "cba");
        backend.unload_model().await.unwrap();
        assert!(backend.infer("abc", &options).await.is_err());
        assert_eq!(backend.name(), "reverse");
    }
}
