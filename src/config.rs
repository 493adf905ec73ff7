//! Run configuration, loaded from YAML and adjusted through `AI_LIB_DISPATCH_*` env vars.

use crate::catalog::{StaticCatalog, WorkerDescriptor};
use crate::resilience::LimiterDefaults;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const ENV_SAFETY_MARGIN: &str = "AI_LIB_DISPATCH_SAFETY_MARGIN";
pub const ENV_MAX_CONCURRENT: &str = "AI_LIB_DISPATCH_MAX_CONCURRENT";
pub const ENV_RPM: &str = "AI_LIB_DISPATCH_RPM";
pub const ENV_REDUCER: &str = "AI_LIB_DISPATCH_REDUCER";

fn default_safety_margin() -> f64 {
    20.0
}

fn default_max_concurrent() -> usize {
    4
}

/// Everything one pipeline run needs besides the worker and tokenizer implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Share of each context window held back from the job, in percent.
    #[serde(default = "default_safety_margin")]
    pub safety_margin_pct: f64,
    /// Concurrency of the shared default limiter (0 = unconstrained).
    #[serde(default = "default_max_concurrent")]
    pub default_max_concurrent: usize,
    /// Requests per minute of the shared default limiter (0 = unconstrained).
    #[serde(default)]
    pub default_rate_per_minute: u32,
    /// Requests per minute per provider, applied to workers with their own limiter.
    #[serde(default)]
    pub provider_rates: HashMap<String, u32>,
    /// Candidate worker ids for the map stage.
    #[serde(default)]
    pub workers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reducer: Option<String>,
    /// Where artifacts are written; nothing is persisted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub workers_catalog: Vec<WorkerDescriptor>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            safety_margin_pct: default_safety_margin(),
            default_max_concurrent: default_max_concurrent(),
            default_rate_per_minute: 0,
            provider_rates: HashMap::new(),
            workers: Vec::new(),
            reducer: None,
            output_dir: None,
            workers_catalog: Vec::new(),
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read dispatch config: {}", e),
                ErrorContext::new().with_source(path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn with_workers<I, S>(mut self, workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workers = workers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reducer(mut self, reducer: impl Into<String>) -> Self {
        self.reducer = Some(reducer.into());
        self
    }

    pub fn with_safety_margin(mut self, pct: f64) -> Self {
        self.safety_margin_pct = pct;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_worker_descriptor(mut self, descriptor: WorkerDescriptor) -> Self {
        self.workers_catalog.push(descriptor);
        self
    }

    /// Apply overrides from the process environment:
    /// - `AI_LIB_DISPATCH_SAFETY_MARGIN` (percent)
    /// - `AI_LIB_DISPATCH_MAX_CONCURRENT`
    /// - `AI_LIB_DISPATCH_RPM`
    /// - `AI_LIB_DISPATCH_REDUCER`
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with a custom lookup.
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_SAFETY_MARGIN).and_then(|s| s.trim().parse::<f64>().ok()) {
            self.safety_margin_pct = v;
        }
        if let Some(v) = lookup(ENV_MAX_CONCURRENT).and_then(|s| s.trim().parse::<usize>().ok()) {
            self.default_max_concurrent = v;
        }
        if let Some(v) = lookup(ENV_RPM).and_then(|s| s.trim().parse::<u32>().ok()) {
            self.default_rate_per_minute = v;
        }
        if let Some(v) = lookup(ENV_REDUCER).filter(|s| !s.trim().is_empty()) {
            self.reducer = Some(v.trim().to_string());
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.safety_margin_pct.is_finite() || !(0.0..=100.0).contains(&self.safety_margin_pct) {
            return Err(Error::validation_with_context(
                format!("safety margin must be within 0..=100, got {}", self.safety_margin_pct),
                ErrorContext::new().with_field_path("safety_margin_pct"),
            ));
        }
        if self.workers.is_empty() {
            return Err(Error::validation_with_context(
                "at least one worker is required",
                ErrorContext::new().with_field_path("workers"),
            ));
        }
        let mut seen = HashSet::new();
        for (i, id) in self.workers.iter().enumerate() {
            if id.trim().is_empty() {
                return Err(Error::validation_with_context(
                    "worker id must not be empty",
                    ErrorContext::new().with_field_path(format!("workers[{}]", i)),
                ));
            }
            if !seen.insert(id.as_str()) {
                return Err(Error::validation_with_context(
                    format!("duplicate worker id: {}", id),
                    ErrorContext::new().with_field_path(format!("workers[{}]", i)),
                ));
            }
        }
        if matches!(self.reducer.as_deref(), Some(r) if r.trim().is_empty()) {
            return Err(Error::validation_with_context(
                "reducer id must not be empty",
                ErrorContext::new().with_field_path("reducer"),
            ));
        }
        Ok(())
    }

    pub fn limiter_defaults(&self) -> LimiterDefaults {
        let mut defaults = LimiterDefaults::new(self.default_max_concurrent, self.default_rate_per_minute);
        for (provider, rpm) in &self.provider_rates {
            defaults = defaults.with_provider_rate(provider.clone(), *rpm);
        }
        defaults
    }

    /// Catalog built from `workers_catalog`.
    pub fn catalog(&self) -> StaticCatalog {
        StaticCatalog::from_descriptors(self.workers_catalog.iter().cloned())
    }
}
