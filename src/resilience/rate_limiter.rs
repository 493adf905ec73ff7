use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Default throughput window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Why an [`RateLimiter::acquire`] call gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("rate limiter acquire cancelled")]
    Cancelled,
    /// The concurrency semaphore was closed. The limiter never closes its own
    /// semaphore; the variant keeps tokio's fallible `acquire_owned` mapped
    /// to an error instead of a panic.
    #[error("rate limiter closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub max_concurrent: usize,
    pub max_per_minute: u32,
    /// Permits currently held and not yet released.
    pub in_flight: usize,
    /// Free concurrency slots; `None` when concurrency is unconstrained.
    pub available_slots: Option<usize>,
    /// Starts recorded inside the current window.
    pub recent_starts: usize,
    /// Successful acquisitions over the limiter's lifetime.
    pub total_acquired: u64,
    /// Estimated wait until the window admits another start (ms), if currently full.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Maximum simultaneous holders (0 = unconstrained).
    pub max_concurrent: usize,
    /// Maximum starts within one window (0 = unconstrained).
    pub max_per_minute: u32,
    /// Length of the rolling throughput window.
    pub window: Duration,
}

impl RateLimiterConfig {
    pub fn new(max_concurrent: usize, max_per_minute: u32) -> Self {
        Self {
            max_concurrent,
            max_per_minute,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_max_per_minute(mut self, rpm: u32) -> Self {
        self.max_per_minute = rpm;
        self
    }

    /// Shrink or stretch the rolling window; mostly useful in tests.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[derive(Debug)]
struct State {
    /// Start instants inside the current window, oldest first.
    starts: VecDeque<Instant>,
}

/// Concurrency + throughput limiter for one resource key.
///
/// - Concurrency is a semaphore: a held [`LimiterPermit`] is one slot.
/// - Throughput is a sliding-window log: at most `max_per_minute` acquisitions
///   may begin within any rolling window.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    slots: Option<Arc<Semaphore>>,
    state: Mutex<State>,
    in_flight: Arc<AtomicUsize>,
    total_acquired: AtomicU64,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let slots = (cfg.max_concurrent > 0).then(|| Arc::new(Semaphore::new(cfg.max_concurrent)));
        Self {
            cfg,
            slots,
            state: Mutex::new(State {
                starts: VecDeque::new(),
            }),
            in_flight: Arc::new(AtomicUsize::new(0)),
            total_acquired: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    /// Wait for a concurrency slot and a throughput start, in that order.
    ///
    /// Returns `Err(AcquireError::Cancelled)` as soon as `cancel` fires. A slot
    /// obtained before cancellation is returned to the pool before the error.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<LimiterPermit, AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        let slot = match &self.slots {
            Some(sem) => {
                let sem = sem.clone();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(AcquireError::Cancelled),
                    permit = sem.acquire_owned() => Some(permit.map_err(|_| AcquireError::Closed)?),
                }
            }
            None => None,
        };

        loop {
            if cancel.is_cancelled() {
                // `slot` drops here
                return Err(AcquireError::Cancelled);
            }

            let wait = {
                let mut st = self.state.lock().await;
                Self::try_start_locked(&self.cfg, &mut st)
            };

            match wait {
                None => break,
                Some(wait) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(AcquireError::Cancelled),
                        () = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }

        Ok(self.grant(slot))
    }

    /// Acquire without waiting; `None` when a slot or a start is not available right now.
    pub async fn try_acquire(&self) -> Option<LimiterPermit> {
        let slot = match &self.slots {
            Some(sem) => Some(sem.clone().try_acquire_owned().ok()?),
            None => None,
        };
        let mut st = self.state.lock().await;
        match Self::try_start_locked(&self.cfg, &mut st) {
            None => Some(self.grant(slot)),
            Some(_) => None,
        }
    }

    /// Record a start if the window allows it, otherwise return the time until it will.
    fn try_start_locked(cfg: &RateLimiterConfig, st: &mut State) -> Option<Duration> {
        if cfg.max_per_minute == 0 {
            return None;
        }

        let now = Instant::now();
        while let Some(&oldest) = st.starts.front() {
            if now.duration_since(oldest) >= cfg.window {
                st.starts.pop_front();
            } else {
                break;
            }
        }

        if st.starts.len() < cfg.max_per_minute as usize {
            st.starts.push_back(now);
            return None;
        }

        let oldest = st.starts.front().copied().unwrap_or(now);
        let wait = (oldest + cfg.window).saturating_duration_since(now);
        Some(wait.max(Duration::from_millis(1)))
    }

    fn grant(&self, slot: Option<OwnedSemaphorePermit>) -> LimiterPermit {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.total_acquired.fetch_add(1, Ordering::SeqCst);
        LimiterPermit {
            slot,
            in_flight: self.in_flight.clone(),
            released: false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn total_acquired(&self) -> u64 {
        self.total_acquired.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let st = self.state.lock().await;
        let now = Instant::now();

        let recent: Vec<Instant> = st
            .starts
            .iter()
            .copied()
            .filter(|t| now.duration_since(*t) < cfg.window)
            .collect();

        let estimated_wait_ms = if cfg.max_per_minute > 0 && recent.len() >= cfg.max_per_minute as usize {
            recent
                .first()
                .map(|oldest| (*oldest + cfg.window).saturating_duration_since(now).as_millis() as u64)
        } else {
            None
        };

        RateLimiterSnapshot {
            max_concurrent: cfg.max_concurrent,
            max_per_minute: cfg.max_per_minute,
            in_flight: self.in_flight(),
            available_slots: self.slots.as_ref().map(|s| s.available_permits()),
            recent_starts: recent.len(),
            total_acquired: self.total_acquired(),
            estimated_wait_ms,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("cfg", &self.cfg)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// One held slot of a [`RateLimiter`]. Dropping the permit releases it.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct LimiterPermit {
    slot: Option<OwnedSemaphorePermit>,
    in_flight: Arc<AtomicUsize>,
    released: bool,
}

impl LimiterPermit {
    /// Return the slot to the pool.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.slot.take();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for LimiterPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterPermit")
            .field("bounded", &self.slot.is_some())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_config_builder() {
        let config = RateLimiterConfig::new(2, 30).with_window(Duration::from_millis(100));
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.max_per_minute, 30);
        assert_eq!(config.window, Duration::from_millis(100));
        assert_eq!(RateLimiterConfig::default(), RateLimiterConfig::unlimited());
    }

    #[tokio::test]
    async fn test_unlimited_acquire_is_immediate() {
        let limiter = RateLimiter::new(RateLimiterConfig::unlimited());
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let permits: Vec<_> = {
            let mut v = Vec::new();
            for _ in 0..50 {
                v.push(limiter.acquire(&cancel).await.unwrap());
            }
            v
        };
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.in_flight(), 50);
        drop(permits);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.total_acquired(), 50);
    }

    #[tokio::test]
    async fn test_release_returns_slot() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, 0));
        let cancel = CancellationToken::new();

        let permit = limiter.acquire(&cancel).await.unwrap();
        assert!(limiter.try_acquire().await.is_none());
        permit.release();
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn test_pre_cancelled_acquire_does_not_consume() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, 1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(limiter.acquire(&cancel).await.unwrap_err(), AcquireError::Cancelled);
        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.total_acquired, 0);
        assert_eq!(snapshot.recent_starts, 0);
        assert_eq!(snapshot.available_slots, Some(1));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(1, 0)));
        let holder = limiter.acquire(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = limiter.acquire(&cancel).await;
        assert_eq!(result.unwrap_err(), AcquireError::Cancelled);
        assert_eq!(limiter.in_flight(), 1);

        drop(holder);
        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.available_slots, Some(1));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_window_returns_slot() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new(1, 1).with_window(Duration::from_secs(30)),
        );
        limiter.acquire(&CancellationToken::new()).await.unwrap().release();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert_eq!(limiter.acquire(&cancel).await.unwrap_err(), AcquireError::Cancelled);
        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.available_slots, Some(1));
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.total_acquired, 1);
        assert!(snapshot.estimated_wait_ms.is_some());
    }

    #[tokio::test]
    async fn test_window_throttles_starts() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new(0, 2).with_window(Duration::from_millis(200)),
        );
        let cancel = CancellationToken::new();

        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap().release();
        limiter.acquire(&cancel).await.unwrap().release();
        assert!(start.elapsed() < Duration::from_millis(100));

        limiter.acquire(&cancel).await.unwrap().release();
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(190),
            "third start should wait for the window, waited {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_try_acquire_respects_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(0, 1));
        assert!(limiter.try_acquire().await.is_some());
        assert!(limiter.try_acquire().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bound_under_stress() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(2, 0)));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let permit = limiter.acquire(&CancellationToken::new()).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(limiter.in_flight() <= 2);
                tokio::time::sleep(Duration::from_millis(15)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                permit.release();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.total_acquired(), 10);
    }
}
