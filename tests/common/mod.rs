//! Shared fixtures for integration tests.

#![allow(dead_code)]

use ai_lib_dispatch::{Job, Result, TokenEstimator, Worker, WorkerError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Route test logs through the test writer; `RUST_LOG` filters as usual.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Reports the same count for every payload and worker.
pub struct FixedEstimator(pub usize);

impl TokenEstimator for FixedEstimator {
    fn count_tokens(&self, _payload: &str) -> Result<usize> {
        Ok(self.0)
    }

    fn count_tokens_for_worker(&self, _payload: &str, _worker_id: &str) -> Result<usize> {
        Ok(self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub worker_id: String,
    pub payload: String,
}

/// Worker double: echoes, fails selected ids, records every call.
#[derive(Default)]
pub struct ScriptedWorker {
    failing: HashSet<String>,
    fail_reduction: bool,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, worker_id: &str) -> Self {
        self.failing.insert(worker_id.to_string());
        self
    }

    /// Fail any call whose content is a combined reduction payload.
    pub fn failing_reduction(mut self) -> Self {
        self.fail_reduction = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, worker_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.worker_id == worker_id)
            .count()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn dispatch(
        &self,
        cancel: CancellationToken,
        job: Arc<Job>,
        worker_id: &str,
    ) -> std::result::Result<String, WorkerError> {
        self.calls.lock().unwrap().push(Call {
            worker_id: worker_id.to_string(),
            payload: job.payload().to_string(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let is_reduction = job.content().starts_with("=== ");
        if cancel.is_cancelled() {
            return Err(WorkerError::new("cancelled").with_class("cancelled"));
        }
        if self.failing.contains(worker_id) && !is_reduction {
            return Err(WorkerError::new(format!("{} unavailable", worker_id)).with_class("server_error"));
        }
        if self.fail_reduction && is_reduction {
            return Err(WorkerError::new("reduction overloaded").with_class("overloaded"));
        }
        Ok(format!("answer from {}", worker_id))
    }
}
