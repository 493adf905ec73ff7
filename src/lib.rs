//! # ai-lib-dispatch
//!
//! 多工作者并发调度与汇总运行时：将同一任务分发给多个 AI 模型，汇总成功结果并可选地进行归约。
//!
//! Concurrent multi-worker dispatch and aggregation. One job (instructions plus
//! content) is sent to many AI workers at once; their answers are collected,
//! partial failures are tolerated, and an optional reducer worker synthesizes
//! the successful answers into one.
//!
//! ## Overview
//!
//! A run goes through four stages:
//!
//! 1. **Admission**: workers whose context window cannot hold the job (with a
//!    safety margin) are rejected before anything is dispatched.
//! 2. **Map**: one task per admitted worker, each gated by that worker's
//!    concurrency and throughput limiter.
//! 3. **Aggregate**: outputs and failures are partitioned and classified as
//!    success, partial failure or total failure.
//! 4. **Reduce** (optional): the successful outputs go to one more worker.
//!
//! The remote call itself is not part of this crate: applications plug their
//! provider client in through [`Worker`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_dispatch::{DispatchConfig, FnWorker, Job, Orchestrator, WorkerError};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_dispatch::Result<()> {
//!     let config = DispatchConfig::from_file("dispatch.yaml")?.apply_env_overrides();
//!     let worker = Arc::new(FnWorker::new(|id: String, _job: Arc<Job>, _cancel: CancellationToken| async move {
//!         Ok::<_, WorkerError>(format!("answer from {}", id))
//!     }));
//!
//!     let orchestrator = Orchestrator::from_config(&config, worker)?;
//!     let report = orchestrator
//!         .run(&CancellationToken::new(), "Summarize", "...content...")
//!         .await?;
//!     println!("{:?}", report.reduced);
//!     report.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`admission`] | Token-budget compatibility filter |
//! | [`catalog`] | Worker descriptors and catalog lookup |
//! | [`config`] | YAML configuration with env overrides |
//! | [`dispatch`] | Fan-out engine, failure classification and reduction |
//! | [`job`] | The immutable unit of work |
//! | [`orchestrator`] | End-to-end pipeline with persistence |
//! | [`persist`] | Artifact stores |
//! | [`resilience`] | Per-worker rate limiters and their registry |
//! | [`telemetry`] | Structured dispatch events and sinks |
//! | [`tokens`] | Token estimation |
//! | [`worker`] | The injected remote call |

pub mod admission;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error_code;
pub mod job;
pub mod orchestrator;
pub mod persist;
pub mod resilience;
pub mod telemetry;
pub mod tokens;
pub mod worker;

// Re-export main types for convenience
pub use admission::{AdmissionReport, CompatibilityFilter, CompatibilityResult, IncompatibleReason};
pub use catalog::{StaticCatalog, WorkerCatalog, WorkerDescriptor};
pub use config::DispatchConfig;
pub use dispatch::{DispatchEngine, Reducer, RunOutcome, RunReport, RunStats};
pub use error::{DispatchError, WorkerFailure};
pub use error_code::ErrorKind;
pub use job::Job;
pub use orchestrator::{Orchestrator, PipelineReport};
pub use persist::{ArtifactStore, FsArtifactStore};
pub use resilience::{LimiterDefaults, LimiterRegistry, RateLimiter, RateLimiterConfig};
pub use telemetry::{DispatchEvent, EventSink};
pub use tokens::{HeuristicEstimator, TokenEstimator};
pub use worker::{FnWorker, Worker, WorkerError};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
