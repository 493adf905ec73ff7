//! Token counter implementations.

use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Payload counts kept per tokenizer family by [`HeuristicEstimator`].
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Token counts consumed by admission control.
pub trait TokenEstimator: Send + Sync {
    /// Total token estimate for a job payload.
    fn count_tokens(&self, payload: &str) -> Result<usize>;

    /// Token count of a payload under a specific worker's tokenizer.
    fn count_tokens_for_worker(&self, payload: &str, worker_id: &str) -> Result<usize>;
}

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}
impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }
    pub fn with_ratio(r: f64) -> Self {
        Self { chars_per_token: r }
    }
}
impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}
impl TokenCounter for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicEstimator {
    chars_per_token: f64,
}
impl AnthropicEstimator {
    pub fn new() -> Self {
        Self {
            chars_per_token: 3.5,
        }
    }
}
impl Default for AnthropicEstimator {
    fn default() -> Self {
        Self::new()
    }
}
impl TokenCounter for AnthropicEstimator {
    fn count(&self, text: &str) -> usize {
        let base = (text.len() as f64 / self.chars_per_token).ceil() as usize;
        let ws = text.chars().filter(|c| c.is_whitespace()).count();
        base + (ws as f64 * 0.1) as usize
    }
}

/// Memoizes counts of an inner counter, keyed by the payload's sha256 digest.
///
/// Admission counts the same payload once per candidate worker, so repeated
/// lookups within a run hit the cache. Once `capacity` entries are held, new
/// payloads are counted but not stored.
pub struct CachingCounter {
    inner: Box<dyn TokenCounter>,
    cache: RwLock<HashMap<[u8; 32], usize>>,
    capacity: usize,
    hits: AtomicU64,
}

impl CachingCounter {
    pub fn new(inner: Box<dyn TokenCounter>, capacity: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            capacity,
            hits: AtomicU64::new(0),
        }
    }

    pub fn clear(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

impl TokenCounter for CachingCounter {
    fn count(&self, text: &str) -> usize {
        let key: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        if let Some(&n) = self.cache.read().unwrap_or_else(|e| e.into_inner()).get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return n;
        }
        let n = self.inner.count(text);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if cache.len() < self.capacity {
            cache.insert(key, n);
        }
        n
    }
}

/// Default [`TokenEstimator`]: chooses a counter from the worker id.
///
/// Counters are created lazily per tokenizer family, wrapped in a
/// [`CachingCounter`], and kept for the estimator's lifetime.
pub struct HeuristicEstimator {
    default: Arc<dyn TokenCounter>,
    counters: RwLock<HashMap<&'static str, Arc<CachingCounter>>>,
    cache_capacity: usize,
}

impl HeuristicEstimator {
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            default: Arc::new(CachingCounter::new(
                Box::new(CharacterEstimator::new()),
                capacity,
            )),
            counters: RwLock::new(HashMap::new()),
            cache_capacity: capacity,
        }
    }

    /// Cache hits across all per-worker counters.
    pub fn cache_hits(&self) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|c| c.hits())
            .sum()
    }

    fn family(worker_id: &str) -> &'static str {
        let ml = worker_id.to_lowercase();
        if ml.contains("claude") || ml.starts_with("anthropic/") {
            "anthropic"
        } else {
            "character"
        }
    }

    fn counter_for(&self, worker_id: &str) -> Arc<CachingCounter> {
        let family = Self::family(worker_id);
        if let Some(c) = self.counters.read().unwrap_or_else(|e| e.into_inner()).get(family) {
            return c.clone();
        }
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        counters
            .entry(family)
            .or_insert_with(|| {
                let inner: Box<dyn TokenCounter> = match family {
                    "anthropic" => Box::new(AnthropicEstimator::new()),
                    _ => Box::new(CharacterEstimator::new()),
                };
                Arc::new(CachingCounter::new(inner, self.cache_capacity))
            })
            .clone()
    }
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn count_tokens(&self, payload: &str) -> Result<usize> {
        Ok(self.default.count(payload))
    }

    fn count_tokens_for_worker(&self, payload: &str, worker_id: &str) -> Result<usize> {
        Ok(self.counter_for(worker_id).count(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_estimator_rounds_up() {
        let c = CharacterEstimator::new();
        assert_eq!(c.count(""), 0);
        assert_eq!(c.count("abcd"), 1);
        assert_eq!(c.count("abcde"), 2);
    }

    #[test]
    fn test_anthropic_estimator_counts_more_than_character() {
        let text = "the quick brown fox jumps over the lazy dog ".repeat(20);
        assert!(AnthropicEstimator::new().count(&text) > CharacterEstimator::new().count(&text));
    }

    #[test]
    fn test_caching_counter_stops_storing_at_capacity() {
        let c = CachingCounter::new(Box::new(CharacterEstimator::new()), 1);
        assert_eq!(c.count("abcd"), 1);
        assert_eq!(c.count("abcdefgh"), 2);
        assert_eq!(c.len(), 1);
        assert_eq!(c.count("abcd"), 1);
        assert_eq!(c.hits(), 1);
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn test_admission_counts_reuse_cached_payloads() {
        let e = HeuristicEstimator::new();
        let payload = "Summarize\n\n".to_string() + &"row ".repeat(500);
        let ids = ["openai/gpt-4o", "mistral/large", "anthropic/claude-sonnet", "openai/gpt-4o"];
        let counts: Vec<usize> = ids
            .iter()
            .map(|id| e.count_tokens_for_worker(&payload, id).unwrap())
            .collect();
        assert_eq!(counts[0], counts[1]);
        assert_eq!(counts[0], counts[3]);
        // two character-family repeats answered from cache
        assert_eq!(e.cache_hits(), 2);
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let e = HeuristicEstimator::with_cache_capacity(0);
        let text = "word ".repeat(10);
        let first = e.count_tokens_for_worker(&text, "openai/gpt-4o").unwrap();
        assert_eq!(e.count_tokens_for_worker(&text, "openai/gpt-4o").unwrap(), first);
        assert_eq!(e.cache_hits(), 0);
    }

    #[test]
    fn test_heuristic_estimator_selects_per_worker() {
        let e = HeuristicEstimator::new();
        let text = "word ".repeat(100);
        let generic = e.count_tokens_for_worker(&text, "openai/gpt-4o").unwrap();
        let claude = e.count_tokens_for_worker(&text, "anthropic/claude-sonnet").unwrap();
        assert_eq!(generic, e.count_tokens(&text).unwrap());
        assert!(claude > generic);
    }
}
