//! 弹性模块：提供按工作者划分的并发与吞吐限流器及其注册表。
//!
//! # Resilience Primitives Module
//!
//! Admission to a worker is gated twice: by how many calls are in flight and by
//! how many calls started recently. Both limits live in one [`RateLimiter`]
//! per resource key; the [`LimiterRegistry`] decides which key a worker uses.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Semaphore + sliding-window limiter with cancellable acquire |
//! | [`registry`] | Lazily built per-worker limiters with a shared default |
//!
//! ## Rate Limiter
//!
//! ```rust
//! use ai_lib_dispatch::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // at most 2 concurrent holders, at most 60 starts per minute
//! let limiter = RateLimiter::new(RateLimiterConfig::new(2, 60));
//! let cancel = CancellationToken::new();
//!
//! let permit = limiter.acquire(&cancel).await.expect("not cancelled");
//! // call the worker...
//! permit.release();
//! # }
//! ```
//!
//! ## Registry
//!
//! Workers that declare neither `max_concurrent` nor `rate_per_minute` share
//! the default limiter. Everyone else gets exactly one limiter of their own,
//! built on first use with throughput resolved as worker override, then the
//! configured provider rate, then the catalog's provider default.

pub mod rate_limiter;
pub mod registry;

pub use rate_limiter::{
    AcquireError, LimiterPermit, RateLimiter, RateLimiterConfig, RateLimiterSnapshot,
};
pub use registry::{LimiterDefaults, LimiterRegistry};
