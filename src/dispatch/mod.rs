//! 调度模块：将同一任务并发分发给多个工作者，并汇总与归约结果。
//!
//! # Dispatch Module
//!
//! The map stage sends one [`Job`](crate::job::Job) to every admitted worker
//! concurrently, each task gated by that worker's rate limiter. Results are
//! partitioned into successful outputs and failures at a single join point,
//! then classified. The reduction stage feeds the successful outputs to one
//! more worker through the same engine.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`DispatchEngine`] | Admission, fan-out and join for one run |
//! | [`RunOutcome`] | Partitioned outputs and failures of a stage |
//! | [`TaskResult`] | What a single dispatch task produced |
//! | [`RunStats`] | Counters threaded through a pipeline run |
//! | [`classify`] | Turns an outcome into `PartialFailure` / `TotalFailure` |
//! | [`Reducer`] | Synthesizes map outputs with a reducer worker |

pub mod aggregate;
pub mod engine;
pub mod outcome;
pub mod reduce;

pub use aggregate::classify;
pub use engine::{DispatchEngine, RunReport};
pub use outcome::{RunOutcome, RunStats, TaskResult};
pub use reduce::{build_reduction_content, Reducer};
