//! Concurrent fan-out of one job across admitted workers.

use super::aggregate::classify;
use super::outcome::{RunOutcome, TaskResult};
use crate::admission::{AdmissionReport, CompatibilityFilter};
use crate::catalog::WorkerDescriptor;
use crate::error::{DispatchError, WorkerFailure};
use crate::error_code::ErrorKind;
use crate::job::Job;
use crate::resilience::LimiterRegistry;
use crate::telemetry::{emit, noop_sink, DispatchEvent, EventSink, Operation};
use crate::tokens::TokenEstimator;
use crate::worker::Worker;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Admission plus map-stage result of [`DispatchEngine::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub admission: AdmissionReport,
    pub outcome: RunOutcome,
    /// `PartialFailure` or `TotalFailure`, if any worker failed.
    pub error: Option<DispatchError>,
}

/// Runs one task per worker, each gated by that worker's rate limiter.
///
/// Cloning is cheap; clones share the worker, registry and event sink.
#[derive(Clone)]
pub struct DispatchEngine {
    worker: Arc<dyn Worker>,
    registry: Arc<LimiterRegistry>,
    estimator: Arc<dyn TokenEstimator>,
    admission: Arc<CompatibilityFilter>,
    events: Arc<dyn EventSink>,
    run_id: String,
}

impl DispatchEngine {
    pub fn new(
        worker: Arc<dyn Worker>,
        registry: Arc<LimiterRegistry>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        let admission = Arc::new(CompatibilityFilter::new(
            estimator.clone(),
            registry.catalog().clone(),
        ));
        Self {
            worker,
            registry,
            estimator,
            admission,
            events: noop_sink(),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    pub fn estimator(&self) -> &Arc<dyn TokenEstimator> {
        &self.estimator
    }

    pub fn admission(&self) -> &CompatibilityFilter {
        &self.admission
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Admit, dispatch and classify.
    ///
    /// Returns `Err` only with `NoCompatibleWorkers`, in which case no limiter
    /// was touched. Worker failures are reported in [`RunReport::error`].
    pub async fn run<I, S>(
        &self,
        cancel: &CancellationToken,
        job: Arc<Job>,
        worker_ids: I,
        safety_margin_pct: f64,
    ) -> Result<RunReport, DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let admission = self.admission.filter(&job, worker_ids, safety_margin_pct);
        if let Err(e) = admission.ensure_admitted() {
            warn!(run_id = self.run_id.as_str(), error = %e, "no worker admitted");
            emit(
                self.events.as_ref(),
                DispatchEvent::failure(&self.run_id, Operation::Admission, e.kind, &e.message),
            )
            .await;
            return Err(e);
        }
        emit(
            self.events.as_ref(),
            DispatchEvent::success(&self.run_id, Operation::Admission),
        )
        .await;

        let outcome = self.run_admitted(cancel, job, &admission.admitted).await;
        let error = classify(outcome.requested, &outcome);

        let event = match &error {
            Some(e) => DispatchEvent::failure(&self.run_id, Operation::Aggregate, e.kind, &e.message),
            None => DispatchEvent::success(&self.run_id, Operation::Aggregate),
        };
        emit(self.events.as_ref(), event.with_duration(outcome.elapsed)).await;

        Ok(RunReport {
            admission,
            outcome,
            error,
        })
    }

    /// Dispatch `job` to every worker in `admitted` and wait for all of them.
    ///
    /// Duplicate descriptors (by id) are dispatched once.
    pub async fn run_admitted(
        &self,
        cancel: &CancellationToken,
        job: Arc<Job>,
        admitted: &[WorkerDescriptor],
    ) -> RunOutcome {
        self.run_stage(cancel, job, admitted, Operation::Dispatch).await
    }

    pub(crate) async fn run_stage(
        &self,
        cancel: &CancellationToken,
        job: Arc<Job>,
        workers: &[WorkerDescriptor],
        operation: Operation,
    ) -> RunOutcome {
        let unique: BTreeMap<&str, &WorkerDescriptor> =
            workers.iter().map(|d| (d.id.as_str(), d)).collect();
        let start = Instant::now();

        info!(
            run_id = self.run_id.as_str(),
            operation = operation.as_str(),
            workers = unique.len(),
            total_tokens = job.total_tokens(),
            "dispatch started"
        );

        let mut tasks: FuturesUnordered<_> = unique
            .values()
            .map(|d| {
                let engine = self.clone();
                let cancel = cancel.clone();
                let job = job.clone();
                let descriptor = (*d).clone();
                let worker_id = descriptor.id.clone();
                let handle = tokio::spawn(async move {
                    engine.dispatch_one(&cancel, job, &descriptor, operation).await
                });
                async move { (worker_id, handle.await) }
            })
            .collect();

        let mut results = Vec::with_capacity(unique.len());
        while let Some((worker_id, joined)) = tasks.next().await {
            let result = match joined {
                Ok(r) => r,
                Err(e) => {
                    warn!(worker_id = worker_id.as_str(), error = %e, "dispatch task aborted");
                    TaskResult::failure(WorkerFailure::new(
                        worker_id,
                        ErrorKind::WorkerFailed,
                        format!("dispatch task aborted: {}", e),
                    ))
                }
            };
            results.push(result);
        }

        let outcome = RunOutcome::from_results(unique.len(), results, start.elapsed());
        info!(
            run_id = self.run_id.as_str(),
            operation = operation.as_str(),
            succeeded = outcome.success_count(),
            failed = outcome.failure_count(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "dispatch finished"
        );
        outcome
    }

    /// One task: acquire the worker's limiter, call the worker, release.
    async fn dispatch_one(
        &self,
        cancel: &CancellationToken,
        job: Arc<Job>,
        descriptor: &WorkerDescriptor,
        operation: Operation,
    ) -> TaskResult {
        let worker_id = descriptor.id.as_str();
        let start = Instant::now();
        let limiter = self.registry.get(worker_id, descriptor);

        let permit = match limiter.acquire(cancel).await {
            Ok(p) => p,
            Err(e) => {
                let failure = WorkerFailure::new(
                    worker_id,
                    ErrorKind::AcquireFailed,
                    e.to_string(),
                )
                .with_duration(start.elapsed());
                self.report(operation, &failure).await;
                return TaskResult::failure(failure);
            }
        };

        debug!(
            run_id = self.run_id.as_str(),
            worker_id,
            waited_ms = start.elapsed().as_millis() as u64,
            "limiter acquired"
        );
        let result = self.worker.dispatch(cancel.clone(), job, worker_id).await;
        permit.release();
        let duration = start.elapsed();

        match result {
            Ok(output) => {
                debug!(
                    run_id = self.run_id.as_str(),
                    worker_id,
                    duration_ms = duration.as_millis() as u64,
                    output_len = output.len(),
                    "worker succeeded"
                );
                emit(
                    self.events.as_ref(),
                    DispatchEvent::success(&self.run_id, operation)
                        .with_worker(worker_id)
                        .with_duration(duration),
                )
                .await;
                TaskResult::success(worker_id, output, duration)
            }
            Err(e) => {
                let mut failure = WorkerFailure::new(worker_id, ErrorKind::WorkerFailed, e.message)
                    .with_duration(duration);
                failure.class = e.class;
                self.report(operation, &failure).await;
                TaskResult::failure(failure)
            }
        }
    }

    async fn report(&self, operation: Operation, failure: &WorkerFailure) {
        warn!(
            run_id = self.run_id.as_str(),
            worker_id = failure.worker_id.as_str(),
            code = failure.kind.code(),
            class = failure.class.as_deref().unwrap_or(""),
            error = failure.message.as_str(),
            "worker failed"
        );
        emit(
            self.events.as_ref(),
            DispatchEvent::failure(&self.run_id, operation, failure.kind, &failure.message)
                .with_worker(&failure.worker_id)
                .with_duration(failure.duration),
        )
        .await;
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("run_id", &self.run_id)
            .field("registry", &self.registry)
            .finish()
    }
}
