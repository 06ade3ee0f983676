//! Generation requests and their result handles
//!
//! A `GenerationRequest` owns the sending half of a oneshot channel; every
//! way of finishing a request consumes it, so a result can be set at most
//! once. Dropping an unfinished request resolves its handle with
//! `EngineError::Shutdown`, so callers are never left waiting forever.

use ember_sdk::errors::{EngineError, Result};
use ember_sdk::types::Options;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// A pending generation request
#[derive(Debug)]
pub struct GenerationRequest {
    id: Uuid,
    input: String,
    context_id: Option<String>,
    options: Options,
    created_at: Instant,
    deadline: Instant,
    slot: oneshot::Sender<Result<String>>,
}

impl GenerationRequest {
    /// Build a request that must finish within `timeout` of now.
    ///
    /// Fails with `EngineError::Input` if `input` is blank.
    pub fn new(
        input: &str,
        context_id: Option<&str>,
        options: Options,
        timeout: Duration,
    ) -> Result<(Self, GenerationHandle)> {
        Self::with_deadline(input, context_id, options, Instant::now() + timeout)
    }

    /// Build a request with an explicit absolute deadline
    pub fn with_deadline(
        input: &str,
        context_id: Option<&str>,
        options: Options,
        deadline: Instant,
    ) -> Result<(Self, GenerationHandle)> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EngineError::Input("input text is empty".to_string()));
        }

        let context_id = context_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from);

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let request = Self {
            id,
            input: input.to_string(),
            context_id,
            options,
            created_at: Instant::now(),
            deadline,
            slot: tx,
        };

        Ok((request, GenerationHandle { id, rx }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Trimmed input text
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Whether the caller has dropped its handle
    pub fn is_abandoned(&self) -> bool {
        self.slot.is_closed()
    }

    /// Deliver the outcome. Returns false if nobody is listening any more.
    pub fn fulfill(self, result: Result<String>) -> bool {
        self.slot.send(result).is_ok()
    }

    /// Fail the request with a timeout measured from its creation
    pub fn fail_timeout(self) -> bool {
        let waited = self.created_at.elapsed();
        self.fulfill(Err(EngineError::Timeout { waited }))
    }
}

/// Caller-side handle resolving to the request's outcome
#[derive(Debug)]
pub struct GenerationHandle {
    id: Uuid,
    rx: oneshot::Receiver<Result<String>>,
}

impl GenerationHandle {
    /// Id of the request this handle belongs to
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Non-blocking check for a result
    pub fn try_result(&mut self) -> Option<Result<String>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(EngineError::Shutdown)),
        }
    }
}

impl Future for GenerationHandle {
    type Output = Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(EngineError::Shutdown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_input_is_rejected() {
        let err = GenerationRequest::new("   \n", None, Options::new(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::Input(_)));
    }

    #[test]
    fn test_input_and_context_id_are_trimmed() {
        let (request, handle) =
            GenerationRequest::new("  hello  ", Some(" "), Options::new(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(request.input(), "hello");
        assert_eq!(request.context_id(), None);
        assert_eq!(request.id(), handle.id());
    }

    #[tokio::test]
    async fn test_fulfill_resolves_handle() {
        let (request, handle) =
            GenerationRequest::new("hi", Some("ctx"), Options::new(), Duration::from_secs(1))
                .unwrap();
        assert!(request.fulfill(Ok("there".to_string())));
        assert_eq!(handle.await.unwrap(), "there");
    }

    #[tokio::test]
    async fn test_dropped_request_resolves_as_shutdown() {
        let (request, handle) =
            GenerationRequest::new("hi", None, Options::new(), Duration::from_secs(1)).unwrap();
        drop(request);
        assert_eq!(handle.await.unwrap_err(), EngineError::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_timeout_error() {
        let (request, mut handle) =
            GenerationRequest::new("hi", None, Options::new(), Duration::from_millis(50)).unwrap();
        assert!(!request.is_expired());
        assert!(handle.try_result().is_none());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(request.is_expired());
        request.fail_timeout();

        let result = handle.try_result().unwrap();
        assert!(matches!(result, Err(EngineError::Timeout { waited }) if waited >= Duration::from_millis(50)));
    }

    #[test]
    fn test_abandoned_request() {
        let (request, handle) =
            GenerationRequest::new("hi", None, Options::new(), Duration::from_secs(1)).unwrap();
        drop(handle);
        assert!(request.is_abandoned());
        assert!(!request.fulfill(Ok("late".to_string())));
    }
}
