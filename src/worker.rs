//! The remote worker call, as consumed by the dispatch engine.
//!
//! The runtime never talks to a provider itself. Applications plug their
//! client in through [`Worker`]; [`FnWorker`] adapts a closure for quick setups
//! and tests.

use crate::job::Job;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A failed worker call. `class` carries the provider's error category
/// (authentication, rate limit, invalid request, ...) through untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct WorkerError {
    pub message: String,
    pub class: Option<String>,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: None,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }
}

impl From<crate::Error> for WorkerError {
    fn from(e: crate::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Produces one output for a job on one worker.
///
/// Implementations should honor `cancel`; the runtime only propagates it.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn dispatch(
        &self,
        cancel: CancellationToken,
        job: Arc<Job>,
        worker_id: &str,
    ) -> Result<String, WorkerError>;
}

/// [`Worker`] backed by an async closure `(worker_id, job, cancel) -> Result<String, WorkerError>`.
pub struct FnWorker<F> {
    f: F,
}

impl<F, Fut> FnWorker<F>
where
    F: Fn(String, Arc<Job>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, WorkerError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(String, Arc<Job>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, WorkerError>> + Send,
{
    async fn dispatch(
        &self,
        cancel: CancellationToken,
        job: Arc<Job>,
        worker_id: &str,
    ) -> Result<String, WorkerError> {
        (self.f)(worker_id.to_string(), job, cancel).await
    }
}
