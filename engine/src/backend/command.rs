//! Command backend
//!
//! Runs a local generation program (for example a llama.cpp CLI) once per
//! inference. The argument template is expanded per call: `{model}` becomes
//! the loaded model path and `{<option>}` becomes the value of that request
//! option (`{threads}`, `{context_length}`, ...). The prompt is written to
//! the program's stdin and its stdout is the completion.
//!
//! Programs are spawned directly (no shell) and killed if they outlive the
//! configured timeout.

use async_trait::async_trait;
use ember_sdk::backend::InferenceBackend;
use ember_sdk::errors::{EngineError, Result};
use ember_sdk::types::Options;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;

const MODEL_PLACEHOLDER: &str = "{model}";

#[derive(Debug)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    model: RwLock<Option<String>>,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            model: RwLock::new(None),
        }
    }

    /// Build from the `[backend]` config section
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let program = config.program.clone().ok_or_else(|| {
            EngineError::Config("backend.program is required for the command backend".to_string())
        })?;
        Ok(Self::new(
            program,
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    fn expand_args(&self, model: &str, options: &Options) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                let mut arg = arg.replace(MODEL_PLACEHOLDER, model);
                for (key, value) in options.iter() {
                    let placeholder = format!("{{{}}}", key);
                    if arg.contains(&placeholder) {
                        let rendered = match value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        arg = arg.replace(&placeholder, &rendered);
                    }
                }
                arg
            })
            .collect()
    }

    async fn run(&self, args: Vec<String>, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Backend(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        // Output is read while the prompt is still being written so neither pipe can fill up
        let stdin = child.stdin.take();
        let write_prompt = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            // A program may exit without reading its input; its status decides the outcome
            match stdin.write_all(prompt.as_bytes()).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(EngineError::Backend(
                    format!("failed to write prompt: {}", e),
                )),
                // Dropping stdin here closes it and ends the prompt
                _ => Ok(()),
            }
        };

        let (written, output) = tokio::join!(write_prompt, child.wait_with_output());
        written?;
        let output = output?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EngineError::Backend(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl InferenceBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    async fn load_model(&self, path: &str, _options: &Options) -> Result<()> {
        if !Path::new(path).exists() {
            return Err(EngineError::Backend(format!("model file not found: {}", path)));
        }
        info!(model = %path, program = %self.program.display(), "Command backend model set");
        *self.model.write() = Some(path.to_string());
        Ok(())
    }

    async fn infer(&self, prompt: &str, options: &Options) -> Result<String> {
        let model = self.model.read().clone().ok_or_else(EngineError::no_model)?;
        let args = self.expand_args(&model, options);
        debug!(program = %self.program.display(), args = ?args, "Spawning generation program");

        match tokio::time::timeout(self.timeout, self.run(args, prompt)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Generation program timed out after {:?}", self.timeout);
                Err(EngineError::Backend(format!(
                    "generation program timed out after {} seconds",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    async fn unload_model(&self) -> Result<()> {
        self.model.write().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(program: &str, args: &[&str]) -> CommandBackend {
        CommandBackend::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_expand_args() {
        let backend = backend("llama-cli", &["-m", "{model}", "-t", "{threads}", "--mmap={mmap}"]);
        let options = Options::new().with("threads", 4).with("mmap", true);

        assert_eq!(
            backend.expand_args("/models/a.gguf", &options),
            vec!["-m", "/models/a.gguf", "-t", "4", "--mmap=true"]
        );
    }

    #[tokio::test]
    async fn test_missing_model_file_fails_load() {
        let backend = backend("cat", &[]);
        let err = backend
            .load_model("/definitely/not/here.gguf", &Options::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
    }

    #[tokio::test]
    async fn test_infer_without_model_is_state_error() {
        let backend = backend("cat", &[]);
        let err = backend.infer("hi", &Options::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_goes_through_stdin() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let path = model.path().to_str().unwrap().to_string();

        let backend = backend("cat", &[]);
        backend.load_model(&path, &Options::new()).await.unwrap();
        let reply = backend.infer("User: hi\nAssistant:", &Options::new()).await.unwrap();
        assert_eq!(reply, "User: hi\nAssistant:");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_backend_error() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let path = model.path().to_str().unwrap().to_string();

        let backend = backend("false", &[]);
        backend.load_model(&path, &Options::new()).await.unwrap();
        let err = backend.infer("hi", &Options::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_larger_than_pipe_buffer() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let path = model.path().to_str().unwrap().to_string();

        let backend = CommandBackend::new("cat", vec![], Duration::from_secs(10));
        backend.load_model(&path, &Options::new()).await.unwrap();

        let prompt = "x".repeat(512 * 1024);
        let reply = backend.infer(&prompt, &Options::new()).await.unwrap();
        assert_eq!(reply.len(), prompt.len());
        assert_eq!(reply, prompt);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_program_times_out() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let path = model.path().to_str().unwrap().to_string();

        let backend = CommandBackend::new("sleep", vec!["5".into()], Duration::from_millis(100));
        backend.load_model(&path, &Options::new()).await.unwrap();
        let err = backend.infer("hi", &Options::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Backend(msg) if msg.contains("timed out")));
    }
}
