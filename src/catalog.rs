//! Worker catalog: the read-only description of every addressable worker.
//!
//! The catalog is pure lookup: it performs no network calls. Applications that
//! discover models dynamically implement [`WorkerCatalog`] themselves; the
//! in-memory [`StaticCatalog`] covers configuration-driven setups and tests.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identity and admission constraints of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Worker identifier, conventionally `"provider/model-name"`.
    pub id: String,
    /// Provider key used to select default rates.
    pub provider: String,
    /// Context window in tokens.
    pub context_window: u32,
    /// Per-worker concurrency override (`None` = shared default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    /// Per-worker throughput override in starts per minute (`None` = provider or shared default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_per_minute: Option<u32>,
}

impl WorkerDescriptor {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, context_window: u32) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            context_window,
            max_concurrent: None,
            rate_per_minute: None,
        }
    }

    /// Build a descriptor whose provider is the prefix of a `"provider/model"` id.
    pub fn from_model_id(id: impl Into<String>, context_window: u32) -> Self {
        let id = id.into();
        let provider = provider_of(&id).to_string();
        Self::new(id, provider, context_window)
    }

    /// Re-key a descriptor under the id the caller used, which may be an
    /// alias the catalog resolved.
    pub fn keyed_as(mut self, worker_id: &str) -> Self {
        if self.id != worker_id {
            self.id = worker_id.to_string();
        }
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    pub fn with_rate_per_minute(mut self, rpm: u32) -> Self {
        self.rate_per_minute = Some(rpm);
        self
    }

    /// True when the worker needs its own limiter rather than the shared default.
    pub fn has_overrides(&self) -> bool {
        self.max_concurrent.is_some() || self.rate_per_minute.is_some()
    }
}

/// Provider prefix of a `"provider/model"` id; the whole id when there is no slash.
pub fn provider_of(worker_id: &str) -> &str {
    worker_id.split('/').next().unwrap_or(worker_id)
}

/// Lookup of worker descriptors and provider-level defaults.
pub trait WorkerCatalog: Send + Sync {
    /// Describe a worker. Unknown workers are an error, never a default descriptor.
    fn describe(&self, worker_id: &str) -> Result<WorkerDescriptor>;

    /// Provider default throughput in starts per minute, if the provider has one.
    fn provider_default_rate(&self, provider: &str) -> Option<u32>;
}

/// In-memory catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    workers: HashMap<String, WorkerDescriptor>,
    #[serde(default)]
    provider_defaults: HashMap<String, u32>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = WorkerDescriptor>) -> Self {
        descriptors
            .into_iter()
            .fold(Self::new(), |catalog, d| catalog.with_worker(d))
    }

    pub fn with_worker(mut self, descriptor: WorkerDescriptor) -> Self {
        self.workers.insert(descriptor.id.clone(), descriptor);
        self
    }

    pub fn with_provider_default(mut self, provider: impl Into<String>, rpm: u32) -> Self {
        self.provider_defaults.insert(provider.into(), rpm);
        self
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Worker ids in lexicographic order.
    pub fn worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl WorkerCatalog for StaticCatalog {
    fn describe(&self, worker_id: &str) -> Result<WorkerDescriptor> {
        self.workers.get(worker_id).cloned().ok_or_else(|| {
            Error::validation_with_context(
                format!("unknown worker '{}'", worker_id),
                ErrorContext::new()
                    .with_field_path("worker_id")
                    .with_source("static_catalog"),
            )
        })
    }

    fn provider_default_rate(&self, provider: &str) -> Option<u32> {
        self.provider_defaults.get(provider).copied()
    }
}
