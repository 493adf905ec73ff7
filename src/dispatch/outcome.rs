//! Per-task results and the partitioned run outcome.

use crate::admission::AdmissionReport;
use crate::error::WorkerFailure;
use std::collections::BTreeMap;
use std::time::Duration;

/// What one dispatch task produced. Exactly one per admitted worker per stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub worker_id: String,
    pub output: Result<String, WorkerFailure>,
    pub duration: Duration,
}

impl TaskResult {
    pub fn success(worker_id: impl Into<String>, output: String, duration: Duration) -> Self {
        Self {
            worker_id: worker_id.into(),
            output: Ok(output),
            duration,
        }
    }

    pub fn failure(failure: WorkerFailure) -> Self {
        Self {
            worker_id: failure.worker_id.clone(),
            duration: failure.duration,
            output: Err(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_ok()
    }
}

/// Successful outputs and failures of one stage.
///
/// Every requested worker lands in exactly one of `outputs` and `failures`;
/// a failed worker has no entry in `outputs`, not even an empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub requested: usize,
    pub outputs: BTreeMap<String, String>,
    /// Sorted by worker id.
    pub failures: Vec<WorkerFailure>,
    pub durations: BTreeMap<String, Duration>,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Partition task results. Called once, after every task has finished.
    pub fn from_results(requested: usize, results: Vec<TaskResult>, elapsed: Duration) -> Self {
        let mut outcome = Self {
            requested,
            elapsed,
            ..Self::default()
        };
        for r in results {
            outcome.durations.insert(r.worker_id.clone(), r.duration);
            match r.output {
                Ok(output) => {
                    outcome.outputs.insert(r.worker_id, output);
                }
                Err(failure) => outcome.failures.push(failure),
            }
        }
        outcome.failures.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        outcome
    }

    pub fn success_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn success_rate(&self) -> f64 {
        if self.requested == 0 {
            0.0
        } else {
            self.outputs.len() as f64 / self.requested as f64
        }
    }

    pub fn output(&self, worker_id: &str) -> Option<&str> {
        self.outputs.get(worker_id).map(String::as_str)
    }

    pub fn failure(&self, worker_id: &str) -> Option<&WorkerFailure> {
        self.failures.iter().find(|f| f.worker_id == worker_id)
    }

    /// True when outputs and failures account for every requested worker exactly once.
    pub fn is_partitioned(&self) -> bool {
        self.outputs.len() + self.failures.len() == self.requested
            && self
                .failures
                .iter()
                .all(|f| !self.outputs.contains_key(&f.worker_id))
    }
}

/// Counters threaded through one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub candidates: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub total_tokens: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub map_duration: Duration,
    pub reduce_duration: Option<Duration>,
    pub saved: usize,
    pub save_failures: usize,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admission(&mut self, report: &AdmissionReport) {
        self.candidates = report.analysis.len();
        self.admitted = report.admitted.len();
        self.rejected = self.candidates - self.admitted;
        self.total_tokens = report.total_tokens;
    }

    pub fn record_map(&mut self, outcome: &RunOutcome) {
        self.succeeded = outcome.success_count();
        self.failed = outcome.failure_count();
        self.map_duration = outcome.elapsed;
    }

    pub fn record_reduce(&mut self, duration: Duration) {
        self.reduce_duration = Some(duration);
    }

    pub fn record_save(&mut self, ok: bool) {
        if ok {
            self.saved += 1;
        } else {
            self.save_failures += 1;
        }
    }
}
