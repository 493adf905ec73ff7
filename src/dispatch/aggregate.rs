//! Run-level classification of a stage's outcome.

use super::outcome::RunOutcome;
use crate::error::{DispatchError, WorkerFailure};
use crate::error_code::ErrorKind;

/// Classify a stage outcome.
///
/// - no failures: `None`
/// - every worker failed: [`ErrorKind::TotalFailure`]
/// - some failed: [`ErrorKind::PartialFailure`] with
///   `"processed S/T successfully; F failed: ..."`
///
/// Failure messages are joined in worker-id order.
pub fn classify(requested: usize, outcome: &RunOutcome) -> Option<DispatchError> {
    if outcome.failures.is_empty() {
        return None;
    }

    let joined = join_failures(&outcome.failures);
    let failed = outcome.failures.len();

    let err = if outcome.outputs.is_empty() {
        DispatchError::new(
            ErrorKind::TotalFailure,
            format!("all {} workers failed: {}", failed, joined),
        )
    } else {
        DispatchError::new(
            ErrorKind::PartialFailure,
            format!(
                "processed {}/{} successfully; {} failed: {}",
                outcome.outputs.len(),
                requested,
                failed,
                joined
            ),
        )
    };
    Some(err.with_causes(outcome.failures.clone()))
}

fn join_failures(failures: &[WorkerFailure]) -> String {
    let mut sorted: Vec<&WorkerFailure> = failures.iter().collect();
    sorted.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
    sorted
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::outcome::TaskResult;
    use std::time::Duration;

    fn outcome(ok: &[&str], failed: &[&str]) -> RunOutcome {
        let mut results: Vec<TaskResult> = ok
            .iter()
            .map(|id| TaskResult::success(*id, format!("out-{}", id), Duration::ZERO))
            .collect();
        results.extend(failed.iter().map(|id| {
            TaskResult::failure(WorkerFailure::new(*id, ErrorKind::WorkerFailed, format!("{} broke", id)))
        }));
        RunOutcome::from_results(ok.len() + failed.len(), results, Duration::ZERO)
    }

    #[test]
    fn test_all_success_is_none() {
        assert!(classify(2, &outcome(&["a", "b"], &[])).is_none());
    }

    #[test]
    fn test_partial_failure_message() {
        let err = classify(3, &outcome(&["w1", "w3"], &["w2"])).unwrap();
        assert_eq!(err.kind, ErrorKind::PartialFailure);
        assert!(!err.kind.aborts_pipeline());
        assert_eq!(
            err.message,
            "processed 2/3 successfully; 1 failed: w2: w2 broke"
        );
        assert_eq!(err.failed_workers(), vec!["w2"]);
    }

    #[test]
    fn test_total_failure_lists_every_cause_in_order() {
        let err = classify(3, &outcome(&[], &["w3", "w1", "w2"])).unwrap();
        assert_eq!(err.kind, ErrorKind::TotalFailure);
        assert_eq!(
            err.message,
            "all 3 workers failed: w1: w1 broke; w2: w2 broke; w3: w3 broke"
        );
        assert_eq!(err.causes.len(), 3);
    }

    #[test]
    fn test_nothing_requested_is_none() {
        assert!(classify(0, &RunOutcome::default()).is_none());
    }
}
