//! Per-worker limiter cache.

use super::rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot, DEFAULT_WINDOW};
use crate::catalog::{WorkerCatalog, WorkerDescriptor};
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Shared defaults applied when a worker declares no override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterDefaults {
    /// Concurrency of the shared default limiter (0 = unconstrained).
    pub max_concurrent: usize,
    /// Throughput of the shared default limiter (0 = unconstrained).
    pub rate_per_minute: u32,
    /// Provider-level configured rates, consulted before the catalog's provider default.
    pub provider_rates: HashMap<String, u32>,
    pub window: Duration,
}

impl LimiterDefaults {
    pub fn new(max_concurrent: usize, rate_per_minute: u32) -> Self {
        Self {
            max_concurrent,
            rate_per_minute,
            provider_rates: HashMap::new(),
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_provider_rate(mut self, provider: impl Into<String>, rpm: u32) -> Self {
        self.provider_rates.insert(provider.into(), rpm);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

impl Default for LimiterDefaults {
    fn default() -> Self {
        Self::new(4, 0)
    }
}

/// Lazily creates and caches one [`RateLimiter`] per worker with overrides.
///
/// Workers without overrides share the default limiter. Entries are never
/// evicted, and at most one limiter is ever built per worker id, even when
/// many tasks ask for the same worker at once.
pub struct LimiterRegistry {
    defaults: LimiterDefaults,
    catalog: Arc<dyn WorkerCatalog>,
    default_limiter: Arc<RateLimiter>,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    constructed: AtomicUsize,
}

impl LimiterRegistry {
    pub fn new(defaults: LimiterDefaults, catalog: Arc<dyn WorkerCatalog>) -> Self {
        let default_limiter = Arc::new(RateLimiter::new(
            RateLimiterConfig::new(defaults.max_concurrent, defaults.rate_per_minute)
                .with_window(defaults.window),
        ));
        Self {
            defaults,
            catalog,
            default_limiter,
            limiters: RwLock::new(HashMap::new()),
            constructed: AtomicUsize::new(0),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn WorkerCatalog> {
        &self.catalog
    }

    pub fn default_limiter(&self) -> &Arc<RateLimiter> {
        &self.default_limiter
    }

    /// Limiter for `worker_id`, creating it on first use.
    pub fn get(&self, worker_id: &str, descriptor: &WorkerDescriptor) -> Arc<RateLimiter> {
        if !descriptor.has_overrides() {
            return self.default_limiter.clone();
        }

        {
            let limiters = self.limiters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(l) = limiters.get(worker_id) {
                return l.clone();
            }
        }

        let mut limiters = self.limiters.write().unwrap_or_else(|e| e.into_inner());
        if let Some(l) = limiters.get(worker_id) {
            return l.clone();
        }

        let cfg = self.effective_config(descriptor);
        debug!(
            worker_id,
            max_concurrent = cfg.max_concurrent,
            max_per_minute = cfg.max_per_minute,
            "creating worker rate limiter"
        );
        let limiter = Arc::new(RateLimiter::new(cfg));
        self.constructed.fetch_add(1, Ordering::SeqCst);
        limiters.insert(worker_id.to_string(), limiter.clone());
        limiter
    }

    /// Describe `worker_id` through the catalog, then [`get`](Self::get) its limiter.
    pub fn resolve(&self, worker_id: &str) -> Result<Arc<RateLimiter>> {
        let descriptor = self.catalog.describe(worker_id)?;
        Ok(self.get(worker_id, &descriptor))
    }

    /// Limits a worker would get: worker override, then provider configured rate,
    /// then provider default from the catalog, then the shared default.
    pub fn effective_config(&self, descriptor: &WorkerDescriptor) -> RateLimiterConfig {
        let rate = descriptor
            .rate_per_minute
            .or_else(|| self.defaults.provider_rates.get(&descriptor.provider).copied())
            .or_else(|| self.catalog.provider_default_rate(&descriptor.provider))
            .unwrap_or(self.defaults.rate_per_minute);
        let concurrency = descriptor
            .max_concurrent
            .unwrap_or(self.defaults.max_concurrent);
        RateLimiterConfig::new(concurrency, rate).with_window(self.defaults.window)
    }

    /// Number of per-worker limiters built so far (the shared default is not counted).
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.limiters.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every cached limiter plus the default (keyed `"*"`), sorted by key.
    pub async fn snapshots(&self) -> Vec<(String, RateLimiterSnapshot)> {
        let limiters: Vec<(String, Arc<RateLimiter>)> = {
            let map = self.limiters.read().unwrap_or_else(|e| e.into_inner());
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut out = Vec::with_capacity(limiters.len() + 1);
        out.push(("*".to_string(), self.default_limiter.snapshot().await));
        for (id, limiter) in limiters {
            out.push((id, limiter.snapshot().await));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("defaults", &self.defaults)
            .field("cached", &self.len())
            .finish()
    }
}
