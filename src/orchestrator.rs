//! 编排模块：准入 → 并发调度 → 分类 → 持久化 → 归约。
//!
//! The orchestrating caller around the dispatch core. One [`Orchestrator::run`]
//! admits workers, fans the job out, classifies failures, persists every
//! successful output, then (optionally) reduces and persists the synthesis.
//!
//! Map-stage and reduction errors are reported in separate fields of
//! [`PipelineReport`]; a failed reduction never alters the map-stage result.

use crate::admission::AdmissionReport;
use crate::catalog::WorkerCatalog;
use crate::config::DispatchConfig;
use crate::dispatch::{DispatchEngine, Reducer, RunOutcome, RunStats};
use crate::error::DispatchError;
use crate::error_code::ErrorKind;
use crate::job::Job;
use crate::persist::{ArtifactStore, FsArtifactStore};
use crate::resilience::{LimiterRegistry, RateLimiterSnapshot};
use crate::telemetry::{emit, noop_sink, DispatchEvent, EventSink, EventStatus, Operation};
use crate::tokens::{HeuristicEstimator, TokenEstimator};
use crate::worker::Worker;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_REDUCE_INSTRUCTIONS: &str = "Synthesize the following responses into a single, \
coherent answer. Reconcile disagreements and keep every distinct insight.";

/// Everything one pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: String,
    /// `None` when the run was aborted by admission.
    pub admission: Option<AdmissionReport>,
    pub outcome: RunOutcome,
    /// Saved artifacts keyed by logical name.
    pub saved: BTreeMap<String, PathBuf>,
    pub reduced: Option<String>,
    /// Map-stage error: `NoCompatibleWorkers`, `TotalFailure` or `PartialFailure`.
    pub run_error: Option<DispatchError>,
    pub reduction_error: Option<DispatchError>,
    /// One `SaveFailed` per artifact that could not be written.
    pub save_errors: Vec<DispatchError>,
    pub stats: RunStats,
}

impl PipelineReport {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            admission: None,
            outcome: RunOutcome::default(),
            saved: BTreeMap::new(),
            reduced: None,
            run_error: None,
            reduction_error: None,
            save_errors: Vec::new(),
            stats: RunStats::new(),
        }
    }

    /// True when no stage reported any error.
    pub fn is_success(&self) -> bool {
        self.run_error.is_none() && self.reduction_error.is_none() && self.save_errors.is_empty()
    }

    /// True when the map stage aborted the pipeline.
    pub fn aborted(&self) -> bool {
        self.run_error
            .as_ref()
            .map(|e| e.kind.aborts_pipeline())
            .unwrap_or(false)
    }

    /// End-of-run signal: the map-stage error first, then the reduction error,
    /// then the first save error.
    pub fn first_error(&self) -> Option<&DispatchError> {
        self.run_error
            .as_ref()
            .or(self.reduction_error.as_ref())
            .or(self.save_errors.first())
    }

    pub fn into_result(self) -> Result<Self> {
        match self.first_error() {
            Some(e) => Err(Error::Dispatch(e.clone())),
            None => Ok(self),
        }
    }
}

/// Drives admission, map, persistence and reduction for one job at a time.
pub struct Orchestrator {
    worker: Arc<dyn Worker>,
    registry: Arc<LimiterRegistry>,
    estimator: Arc<dyn TokenEstimator>,
    store: Option<Arc<dyn ArtifactStore>>,
    events: Arc<dyn EventSink>,
    workers: Vec<String>,
    reducer: Option<String>,
    reduce_instructions: String,
    safety_margin_pct: f64,
}

impl Orchestrator {
    pub fn new(
        worker: Arc<dyn Worker>,
        registry: Arc<LimiterRegistry>,
        workers: Vec<String>,
    ) -> Self {
        Self {
            worker,
            registry,
            estimator: Arc::new(HeuristicEstimator::new()),
            store: None,
            events: noop_sink(),
            workers,
            reducer: None,
            reduce_instructions: DEFAULT_REDUCE_INSTRUCTIONS.to_string(),
            safety_margin_pct: 20.0,
        }
    }

    /// Validate `config` and build the registry, catalog and artifact store it describes.
    pub fn from_config(config: &DispatchConfig, worker: Arc<dyn Worker>) -> Result<Self> {
        config.validate()?;
        let catalog: Arc<dyn WorkerCatalog> = Arc::new(config.catalog());
        let registry = Arc::new(LimiterRegistry::new(config.limiter_defaults(), catalog));

        let mut orchestrator = Self::new(worker, registry, config.workers.clone())
            .with_safety_margin(config.safety_margin_pct);
        if let Some(reducer) = &config.reducer {
            orchestrator = orchestrator.with_reducer(reducer.clone());
        }
        if let Some(dir) = &config.output_dir {
            orchestrator = orchestrator.with_store(Arc::new(FsArtifactStore::new(dir.clone())));
        }
        info!(
            workers = config.workers.len(),
            reducer = config.reducer.as_deref().unwrap_or(""),
            safety_margin_pct = config.safety_margin_pct,
            "orchestrator configured"
        );
        Ok(orchestrator)
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_reducer(mut self, reducer: impl Into<String>) -> Self {
        self.reducer = Some(reducer.into());
        self
    }

    pub fn with_reduce_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.reduce_instructions = instructions.into();
        self
    }

    pub fn with_safety_margin(mut self, pct: f64) -> Self {
        self.safety_margin_pct = pct;
        self
    }

    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    /// Current state of every limiter; the shared default is keyed `"*"`.
    pub async fn limiter_snapshots(&self) -> Vec<(String, RateLimiterSnapshot)> {
        self.registry.snapshots().await
    }

    /// Run the whole pipeline for one job.
    ///
    /// `Err` only when the job itself cannot be built (token estimation failed).
    /// Every stage failure is reported in the returned [`PipelineReport`].
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        instructions: &str,
        content: &str,
    ) -> Result<PipelineReport> {
        let job = Arc::new(Job::new(instructions, content, self.estimator.as_ref())?);
        let run_id = uuid::Uuid::new_v4().to_string();
        let engine = DispatchEngine::new(
            self.worker.clone(),
            self.registry.clone(),
            self.estimator.clone(),
        )
        .with_event_sink(self.events.clone())
        .with_run_id(run_id.clone());

        let mut report = PipelineReport::new(run_id);
        let started = Instant::now();

        let map = match engine
            .run(cancel, job, &self.workers, self.safety_margin_pct)
            .await
        {
            Ok(map) => map,
            Err(e) => {
                warn!(run_id = report.run_id.as_str(), error = %e, "pipeline aborted at admission");
                report.run_error = Some(e);
                return Ok(report);
            }
        };

        report.stats.record_admission(&map.admission);
        report.stats.record_map(&map.outcome);
        report.admission = Some(map.admission);
        report.outcome = map.outcome;
        report.run_error = map.error;

        if report.aborted() {
            warn!(
                run_id = report.run_id.as_str(),
                failed = report.stats.failed,
                "every worker failed; skipping persistence and reduction"
            );
            if self.reducer.is_some() {
                self.skip(&report.run_id, Operation::Reduce).await;
            }
            return Ok(report);
        }

        let outputs = report.outcome.outputs.clone();
        for (worker_id, output) in &outputs {
            let name = artifact_name(&report.run_id, worker_id);
            self.persist(&mut report, output, &name).await;
        }

        if let Some(reducer_id) = &self.reducer {
            let reduce_start = Instant::now();
            let reducer = Reducer::new(engine.clone());
            let result = reducer
                .reduce(cancel, &self.reduce_instructions, &outputs, reducer_id)
                .await;
            report.stats.record_reduce(reduce_start.elapsed());
            match result {
                Ok(text) => {
                    let name = artifact_name(&report.run_id, &format!("reduced_{}", reducer_id));
                    self.persist(&mut report, &text, &name).await;
                    report.reduced = Some(text);
                }
                Err(e) => report.reduction_error = Some(e),
            }
        }

        info!(
            run_id = report.run_id.as_str(),
            admitted = report.stats.admitted,
            succeeded = report.stats.succeeded,
            failed = report.stats.failed,
            saved = report.stats.saved,
            reduced = report.reduced.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline finished"
        );
        Ok(report)
    }

    async fn persist(&self, report: &mut PipelineReport, content: &str, logical_name: &str) {
        let Some(store) = &self.store else {
            return;
        };
        match store.save(content, logical_name).await {
            Ok(path) => {
                report.stats.record_save(true);
                emit(
                    self.events.as_ref(),
                    DispatchEvent::success(&report.run_id, Operation::Save).with_worker(logical_name),
                )
                .await;
                report.saved.insert(logical_name.to_string(), path);
            }
            Err(e) => {
                warn!(
                    run_id = report.run_id.as_str(),
                    store = store.name(),
                    logical_name,
                    error = %e,
                    "artifact save failed"
                );
                let err = DispatchError::new(
                    ErrorKind::SaveFailed,
                    format!("saving {} failed: {}", logical_name, e),
                );
                report.stats.record_save(false);
                emit(
                    self.events.as_ref(),
                    DispatchEvent::failure(&report.run_id, Operation::Save, err.kind, &err.message)
                        .with_worker(logical_name),
                )
                .await;
                report.save_errors.push(err);
            }
        }
    }

    async fn skip(&self, run_id: &str, operation: Operation) {
        emit(
            self.events.as_ref(),
            DispatchEvent::new(run_id, operation, EventStatus::Skipped),
        )
        .await;
    }
}

fn artifact_name(run_id: &str, label: &str) -> String {
    let short: String = run_id.chars().take(8).collect();
    format!("{}_{}", short, label)
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.workers)
            .field("reducer", &self.reducer)
            .field("safety_margin_pct", &self.safety_margin_pct)
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::WorkerDescriptor;
    use crate::persist::MemoryArtifactStore;
    use crate::telemetry::InMemoryEventSink;
    use crate::worker::{FnWorker, WorkerError};

    fn config() -> DispatchConfig {
        DispatchConfig::new()
            .with_workers(["p/a", "p/b"])
            .with_worker_descriptor(WorkerDescriptor::new("p/a", "p", 10_000))
            .with_worker_descriptor(WorkerDescriptor::new("p/b", "p", 10_000))
            .with_worker_descriptor(WorkerDescriptor::new("p/r", "p", 10_000))
            .with_reducer("p/r")
    }

    fn echo() -> Arc<dyn Worker> {
        Arc::new(FnWorker::new(
            |id: String, _job: Arc<Job>, _cancel: CancellationToken| async move {
                Ok::<_, WorkerError>(format!("from {}", id))
            },
        ))
    }

    #[tokio::test]
    async fn test_full_pipeline_saves_and_reduces() {
        let store = Arc::new(MemoryArtifactStore::new());
        let sink = Arc::new(InMemoryEventSink::new(100));
        let orchestrator = Orchestrator::from_config(&config(), echo())
            .unwrap()
            .with_store(store.clone())
            .with_event_sink(sink.clone());

        let report = orchestrator
            .run(&CancellationToken::new(), "explain", "some text")
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.outcome.outputs.len(), 2);
        assert_eq!(report.reduced.as_deref(), Some("from p/r"));
        assert_eq!(report.saved.len(), 3);
        assert_eq!(store.len(), 3);
        assert_eq!(report.stats.admitted, 2);
        assert_eq!(report.stats.saved, 3);
        assert!(report.stats.reduce_duration.is_some());
        assert!(!sink.get_events_by_operation(Operation::Save).is_empty());
    }

    #[tokio::test]
    async fn test_total_failure_skips_reduction() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let worker = Arc::new(FnWorker::new(
            move |id: String, _job: Arc<Job>, _cancel: CancellationToken| {
                let counter = counter.clone();
                async move {
                    if id == "p/r" {
                        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    Err::<String, _>(WorkerError::new("down"))
                }
            },
        ));
        let report = Orchestrator::from_config(&config(), worker)
            .unwrap()
            .run(&CancellationToken::new(), "explain", "text")
            .await
            .unwrap();

        assert!(report.aborted());
        assert!(report.run_error.as_ref().unwrap().is_total_failure());
        assert!(report.reduced.is_none());
        assert!(report.reduction_error.is_none());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_total_failure_without_reducer_emits_no_reduce_event() {
        let worker = Arc::new(FnWorker::new(
            |_id: String, _job: Arc<Job>, _cancel: CancellationToken| async move {
                Err::<String, _>(WorkerError::new("down"))
            },
        ));
        let mut cfg = config();
        cfg.reducer = None;
        let sink = Arc::new(InMemoryEventSink::new(50));
        let report = Orchestrator::from_config(&cfg, worker.clone())
            .unwrap()
            .with_event_sink(sink.clone())
            .run(&CancellationToken::new(), "explain", "text")
            .await
            .unwrap();
        assert!(report.aborted());
        assert!(sink.get_events_by_operation(Operation::Reduce).is_empty());

        let sink = Arc::new(InMemoryEventSink::new(50));
        Orchestrator::from_config(&config(), worker)
            .unwrap()
            .with_event_sink(sink.clone())
            .run(&CancellationToken::new(), "explain", "text")
            .await
            .unwrap();
        let reduce = sink.get_events_by_operation(Operation::Reduce);
        assert_eq!(reduce.len(), 1);
        assert_eq!(reduce[0].status, EventStatus::Skipped);
    }

    #[tokio::test]
    async fn test_no_compatible_workers_aborts() {
        let cfg = DispatchConfig::new()
            .with_workers(["p/tiny"])
            .with_worker_descriptor(WorkerDescriptor::new("p/tiny", "p", 1));
        let orchestrator = Orchestrator::from_config(&cfg, echo()).unwrap();
        let report = orchestrator
            .run(&CancellationToken::new(), "explain", "a long enough payload")
            .await
            .unwrap();
        assert_eq!(
            report.run_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::NoCompatibleWorkers)
        );
        assert!(report.admission.is_none());
        assert_eq!(orchestrator.registry().default_limiter().total_acquired(), 0);
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let err = Orchestrator::from_config(&DispatchConfig::new(), echo()).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
