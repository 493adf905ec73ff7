//! Pre-dispatch admission control based on token-budget utilization.
//!
//! A worker is admitted when the job fits inside its context window with the
//! configured safety margin to spare. Any missing information (unknown worker,
//! tokenizer failure, zero-sized window) rejects the worker: admission fails
//! closed.

use crate::catalog::{WorkerCatalog, WorkerDescriptor};
use crate::error::DispatchError;
use crate::error_code::ErrorKind;
use crate::job::Job;
use crate::tokens::TokenEstimator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Why a worker was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncompatibleReason {
    /// Utilization exceeds the allowed threshold.
    TooLarge,
    /// The catalog could not describe the worker or reported no context window.
    InfoUnavailable,
    /// The worker's token count could not be computed.
    CountUnavailable,
}

impl IncompatibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooLarge => "too-large",
            Self::InfoUnavailable => "info-unavailable",
            Self::CountUnavailable => "count-unavailable",
        }
    }
}

impl fmt::Display for IncompatibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission verdict for one worker. Computed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub worker_id: String,
    pub token_count: Option<usize>,
    pub context_window: Option<u32>,
    pub utilization_pct: f64,
    pub compatible: bool,
    pub reason: Option<IncompatibleReason>,
    /// Collaborator error text behind an `*-unavailable` reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CompatibilityResult {
    fn rejected(worker_id: &str, reason: IncompatibleReason, detail: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            token_count: None,
            context_window: None,
            utilization_pct: 0.0,
            compatible: false,
            reason: Some(reason),
            detail: Some(detail.into()),
        }
    }
}

/// Output of [`CompatibilityFilter::filter`]. Both lists are sorted by worker id.
#[derive(Debug, Clone)]
pub struct AdmissionReport {
    pub admitted: Vec<WorkerDescriptor>,
    pub analysis: Vec<CompatibilityResult>,
    pub total_tokens: usize,
    pub safety_margin_pct: f64,
}

impl AdmissionReport {
    pub fn admitted_ids(&self) -> Vec<&str> {
        self.admitted.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn rejected(&self) -> impl Iterator<Item = &CompatibilityResult> {
        self.analysis.iter().filter(|r| !r.compatible)
    }

    pub fn result_for(&self, worker_id: &str) -> Option<&CompatibilityResult> {
        self.analysis.iter().find(|r| r.worker_id == worker_id)
    }

    /// `NoCompatibleWorkers` when nothing was admitted.
    pub fn ensure_admitted(&self) -> Result<(), DispatchError> {
        if !self.admitted.is_empty() {
            return Ok(());
        }
        let reasons: Vec<String> = self
            .analysis
            .iter()
            .map(|r| match r.reason {
                Some(reason) => format!("{} ({})", r.worker_id, reason),
                None => r.worker_id.clone(),
            })
            .collect();
        let mut message = format!(
            "no compatible workers for job of {} tokens",
            self.total_tokens
        );
        if !reasons.is_empty() {
            message.push_str(&format!(": {}", reasons.join(", ")));
        }
        Err(DispatchError::new(ErrorKind::NoCompatibleWorkers, message))
    }
}

/// Narrows a worker set to the ones whose context window fits the job.
pub struct CompatibilityFilter {
    estimator: Arc<dyn TokenEstimator>,
    catalog: Arc<dyn WorkerCatalog>,
}

impl CompatibilityFilter {
    pub fn new(estimator: Arc<dyn TokenEstimator>, catalog: Arc<dyn WorkerCatalog>) -> Self {
        Self { estimator, catalog }
    }

    /// Evaluate every candidate. Duplicate ids are evaluated once.
    ///
    /// `safety_margin_pct` is clamped to `0..=100`; a worker is admitted iff
    /// `utilization_pct <= 100 - safety_margin_pct`.
    pub fn filter<I, S>(&self, job: &Job, worker_ids: I, safety_margin_pct: f64) -> AdmissionReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let margin = clamp_margin(safety_margin_pct);
        let threshold = 100.0 - margin;
        let ids: BTreeSet<String> = worker_ids
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();

        let mut admitted = Vec::new();
        let mut analysis = Vec::with_capacity(ids.len());

        for id in &ids {
            let (result, descriptor) = self.evaluate(job, id, threshold);
            debug!(
                worker_id = id.as_str(),
                token_count = result.token_count.unwrap_or(0),
                utilization_pct = result.utilization_pct,
                compatible = result.compatible,
                reason = result.reason.map(|r| r.as_str()).unwrap_or(""),
                "admission decision"
            );
            if let (true, Some(d)) = (result.compatible, descriptor) {
                admitted.push(d);
            }
            analysis.push(result);
        }

        info!(
            candidates = ids.len(),
            admitted = admitted.len(),
            total_tokens = job.total_tokens(),
            safety_margin_pct = margin,
            "admission complete"
        );

        AdmissionReport {
            admitted,
            analysis,
            total_tokens: job.total_tokens(),
            safety_margin_pct: margin,
        }
    }

    fn evaluate(
        &self,
        job: &Job,
        worker_id: &str,
        threshold: f64,
    ) -> (CompatibilityResult, Option<WorkerDescriptor>) {
        let descriptor = match self.catalog.describe(worker_id) {
            Ok(d) => d.keyed_as(worker_id),
            Err(e) => {
                return (
                    CompatibilityResult::rejected(
                        worker_id,
                        IncompatibleReason::InfoUnavailable,
                        e.to_string(),
                    ),
                    None,
                )
            }
        };
        if descriptor.context_window == 0 {
            return (
                CompatibilityResult::rejected(
                    worker_id,
                    IncompatibleReason::InfoUnavailable,
                    "context window not reported",
                ),
                None,
            );
        }

        let token_count = match self.estimator.count_tokens_for_worker(job.payload(), worker_id) {
            Ok(n) => n,
            Err(e) => {
                let mut r = CompatibilityResult::rejected(
                    worker_id,
                    IncompatibleReason::CountUnavailable,
                    e.to_string(),
                );
                r.context_window = Some(descriptor.context_window);
                return (r, None);
            }
        };

        let utilization_pct = token_count as f64 / descriptor.context_window as f64 * 100.0;
        let compatible = utilization_pct <= threshold;
        let result = CompatibilityResult {
            worker_id: worker_id.to_string(),
            token_count: Some(token_count),
            context_window: Some(descriptor.context_window),
            utilization_pct,
            compatible,
            reason: (!compatible).then_some(IncompatibleReason::TooLarge),
            detail: None,
        };
        (result, Some(descriptor))
    }
}

fn clamp_margin(pct: f64) -> f64 {
    if pct.is_finite() {
        pct.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::{Error, ErrorContext, Result};

    /// Reports a fixed count for every worker except the ones listed as broken.
    struct FixedEstimator {
        tokens: usize,
        broken: Vec<&'static str>,
    }

    impl TokenEstimator for FixedEstimator {
        fn count_tokens(&self, _payload: &str) -> Result<usize> {
            Ok(self.tokens)
        }
        fn count_tokens_for_worker(&self, _payload: &str, worker_id: &str) -> Result<usize> {
            if self.broken.contains(&worker_id) {
                return Err(Error::runtime_with_context(
                    "tokenizer offline",
                    ErrorContext::new().with_source("test"),
                ));
            }
            Ok(self.tokens)
        }
    }

    fn filter(broken: Vec<&'static str>) -> CompatibilityFilter {
        let catalog = StaticCatalog::new()
            .with_worker(WorkerDescriptor::new("big", "p", 2000))
            .with_worker(WorkerDescriptor::new("small", "p", 1500))
            .with_worker(WorkerDescriptor::new("zero", "p", 0));
        CompatibilityFilter::new(
            Arc::new(FixedEstimator {
                tokens: 1500,
                broken,
            }),
            Arc::new(catalog),
        )
    }

    fn job() -> Job {
        Job::with_token_estimate("analyze", "content", 1500)
    }

    #[test]
    fn test_admission_threshold() {
        let report = filter(vec![]).filter(&job(), ["big", "small"], 20.0);
        assert_eq!(report.admitted_ids(), vec!["big"]);

        let big = report.result_for("big").unwrap();
        assert!(big.compatible);
        assert_eq!(big.utilization_pct, 75.0);

        let small = report.result_for("small").unwrap();
        assert!(!small.compatible);
        assert_eq!(small.utilization_pct, 100.0);
        assert_eq!(small.reason, Some(IncompatibleReason::TooLarge));
    }

    #[test]
    fn test_exact_threshold_is_admitted() {
        let report = filter(vec![]).filter(&job(), ["small"], 0.0);
        assert_eq!(report.admitted_ids(), vec!["small"]);
    }

    #[test]
    fn test_fails_closed_on_missing_information() {
        let report = filter(vec!["big"]).filter(&job(), ["big", "unknown", "zero"], 20.0);
        assert!(report.admitted.is_empty());
        assert_eq!(
            report.result_for("big").unwrap().reason,
            Some(IncompatibleReason::CountUnavailable)
        );
        assert_eq!(
            report.result_for("unknown").unwrap().reason,
            Some(IncompatibleReason::InfoUnavailable)
        );
        assert_eq!(
            report.result_for("zero").unwrap().reason,
            Some(IncompatibleReason::InfoUnavailable)
        );
    }

    #[test]
    fn test_order_is_deterministic_and_deduplicated() {
        let report = filter(vec![]).filter(&job(), ["small", "big", "small"], 50.0);
        let ids: Vec<&str> = report.analysis.iter().map(|r| r.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["big", "small"]);
    }

    #[test]
    fn test_no_compatible_workers_names_total_tokens() {
        let report = filter(vec![]).filter(&job(), ["small"], 20.0);
        let err = report.ensure_admitted().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoCompatibleWorkers);
        assert!(err.message.contains("1500 tokens"), "{}", err.message);
        assert!(err.message.contains("small (too-large)"), "{}", err.message);
    }

    #[test]
    fn test_margin_is_clamped() {
        let report = filter(vec![]).filter(&job(), ["big"], 250.0);
        assert_eq!(report.safety_margin_pct, 100.0);
        assert!(report.admitted.is_empty());
        let report = filter(vec![]).filter(&job(), ["big"], f64::NAN);
        assert_eq!(report.safety_margin_pct, 0.0);
    }

    /// Resolves short aliases to canonical `provider/model` ids.
    struct AliasCatalog(StaticCatalog);

    impl WorkerCatalog for AliasCatalog {
        fn describe(&self, worker_id: &str) -> Result<WorkerDescriptor> {
            match worker_id {
                "sonnet" => self.0.describe("anthropic/sonnet"),
                other => self.0.describe(other),
            }
        }
        fn provider_default_rate(&self, provider: &str) -> Option<u32> {
            self.0.provider_default_rate(provider)
        }
    }

    #[test]
    fn test_admitted_descriptor_keeps_requested_id() {
        let catalog = AliasCatalog(
            StaticCatalog::new().with_worker(WorkerDescriptor::new("anthropic/sonnet", "anthropic", 200_000)),
        );
        let filter = CompatibilityFilter::new(
            Arc::new(FixedEstimator {
                tokens: 100,
                broken: vec![],
            }),
            Arc::new(catalog),
        );
        let report = filter.filter(&job(), ["sonnet"], 20.0);
        assert_eq!(report.admitted_ids(), vec!["sonnet"]);
        assert_eq!(report.admitted[0].provider, "anthropic");
        assert!(report.result_for("sonnet").unwrap().compatible);
    }
}
