//! Token 估算模块：为准入控制提供作业与各工作者的 Token 计数。
//!
//! # Token Estimation Module
//!
//! Admission control needs two numbers per run: the job's total token estimate
//! and, per worker, the count under that worker's tokenizer. The dispatch core
//! consumes both through the [`TokenEstimator`] trait and never counts tokens
//! itself.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TokenEstimator`] | Collaborator trait consumed by the compatibility filter |
//! | [`TokenCounter`] | Low-level text → token count primitive |
//! | [`CharacterEstimator`] | Fast character-based approximation (4 chars ≈ 1 token) |
//! | [`AnthropicEstimator`] | Anthropic-style estimation (3.5 chars plus whitespace weight) |
//! | [`CachingCounter`] | Caches counts by payload digest; admission reuses them across workers |
//! | [`HeuristicEstimator`] | Picks a counter per worker id; the default estimator |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_dispatch::tokens::{HeuristicEstimator, TokenEstimator};
//!
//! let estimator = HeuristicEstimator::new();
//! let total = estimator.count_tokens("Summarize the attached report.").unwrap();
//! let for_claude = estimator
//!     .count_tokens_for_worker("Summarize the attached report.", "anthropic/claude-sonnet")
//!     .unwrap();
//! assert!(total > 0 && for_claude > 0);
//! ```

mod counter;

pub use counter::{
    AnthropicEstimator, CachingCounter, CharacterEstimator, HeuristicEstimator, TokenCounter,
    TokenEstimator, DEFAULT_CACHE_CAPACITY,
};
