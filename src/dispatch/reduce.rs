//! Reduction stage: synthesize successful map outputs with one more worker call.

use super::engine::DispatchEngine;
use super::outcome::RunOutcome;
use crate::error::{DispatchError, WorkerFailure};
use crate::error_code::ErrorKind;
use crate::job::Job;
use crate::telemetry::{emit, DispatchEvent, EventStatus, Operation};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Combined map outputs in worker-id order, each under a `=== <worker-id> ===` header.
pub fn build_reduction_content(outputs: &BTreeMap<String, String>) -> String {
    outputs
        .iter()
        .map(|(id, out)| format!("=== {} ===\n{}", id, out.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Runs the reduction task through the same engine (and the same limiters)
/// as the map stage.
#[derive(Debug, Clone)]
pub struct Reducer {
    engine: DispatchEngine,
}

impl Reducer {
    pub fn new(engine: DispatchEngine) -> Self {
        Self { engine }
    }

    /// Synthesize `outputs` with `reducer_id`.
    ///
    /// Empty `outputs` returns an empty string without any dispatch. Failures
    /// come back as `ReductionFailed`, carrying the worker failure as cause.
    pub async fn reduce(
        &self,
        cancel: &CancellationToken,
        instructions: &str,
        outputs: &BTreeMap<String, String>,
        reducer_id: &str,
    ) -> Result<String, DispatchError> {
        let run_id = self.engine.run_id().to_string();
        if outputs.is_empty() {
            info!(run_id = run_id.as_str(), "nothing to reduce");
            emit(
                self.engine.events().as_ref(),
                DispatchEvent::new(&run_id, Operation::Reduce, EventStatus::Skipped),
            )
            .await;
            return Ok(String::new());
        }

        let descriptor = match self.engine.registry().catalog().describe(reducer_id) {
            Ok(d) => d.keyed_as(reducer_id),
            Err(e) => {
                return Err(self
                    .fail(WorkerFailure::new(reducer_id, ErrorKind::WorkerFailed, e.to_string()))
                    .await)
            }
        };

        let content = build_reduction_content(outputs);
        let job = match Job::new(instructions, content, self.engine.estimator().as_ref()) {
            Ok(job) => job,
            Err(e) => {
                return Err(self
                    .fail(WorkerFailure::new(reducer_id, ErrorKind::WorkerFailed, e.to_string()))
                    .await)
            }
        };

        info!(
            run_id = run_id.as_str(),
            reducer_id,
            inputs = outputs.len(),
            total_tokens = job.total_tokens(),
            "reduction started"
        );

        // A single-task stage: its one result is the reduction, whatever its key.
        let RunOutcome {
            outputs,
            mut failures,
            ..
        } = self
            .engine
            .run_stage(cancel, Arc::new(job), &[descriptor], Operation::Reduce)
            .await;

        if let Some(output) = outputs.into_values().next() {
            return Ok(output);
        }
        let failure = failures.pop().unwrap_or_else(|| {
            WorkerFailure::new(reducer_id, ErrorKind::WorkerFailed, "reducer produced no result")
        });
        Err(self.fail(failure).await)
    }

    async fn fail(&self, failure: WorkerFailure) -> DispatchError {
        let err = DispatchError::new(
            ErrorKind::ReductionFailed,
            format!("reduction by {} failed: {}", failure.worker_id, failure.message),
        )
        .with_causes(vec![failure]);
        warn!(run_id = self.engine.run_id(), error = %err, "reduction failed");
        emit(
            self.engine.events().as_ref(),
            DispatchEvent::failure(self.engine.run_id(), Operation::Reduce, err.kind, &err.message),
        )
        .await;
        err
    }
}
