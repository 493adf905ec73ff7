//! 调度错误分类码：为每一类运行级/任务级失败定义稳定的错误码。
//!
//! Stable classification codes for dispatch failures.
//!
//! Every error the runtime produces carries an [`ErrorKind`]. Callers branch on
//! the kind (or its code string) instead of matching on message text.
//!
//! ## Error Code Categories
//!
//! | Prefix | Category    | Description                              |
//! |--------|-------------|------------------------------------------|
//! | E1xxx  | admission   | Rejected before any resource commitment  |
//! | E2xxx  | task        | A single worker's dispatch failed        |
//! | E3xxx  | aggregate   | Run-level classification of the map stage|
//! | E4xxx  | reduction   | Optional second stage                    |
//! | E5xxx  | persistence | Surfaced from the artifact store         |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_dispatch::error_code::ErrorKind;
//!
//! let kind = ErrorKind::PartialFailure;
//! assert_eq!(kind.code(), "E3002");
//! assert!(!kind.aborts_pipeline());
//! assert_eq!(ErrorKind::from_code("E3001"), Some(ErrorKind::TotalFailure));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// E1001: Admission control rejected every candidate before dispatch
    NoCompatibleWorkers,
    /// E2001: Waiting for a rate limiter was cancelled or errored
    AcquireFailed,
    /// E2002: The remote worker call itself failed
    WorkerFailed,
    /// E3001: Every admitted worker failed
    TotalFailure,
    /// E3002: A strict subset of admitted workers failed
    PartialFailure,
    /// E4001: The reduction stage failed
    ReductionFailed,
    /// E5001: Persisting an artifact failed
    SaveFailed,
}

impl ErrorKind {
    /// Returns the canonical code string (e.g., `"E3002"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCompatibleWorkers => "E1001",
            Self::AcquireFailed => "E2001",
            Self::WorkerFailed => "E2002",
            Self::TotalFailure => "E3001",
            Self::PartialFailure => "E3002",
            Self::ReductionFailed => "E4001",
            Self::SaveFailed => "E5001",
        }
    }

    /// Returns the snake_case name (e.g., `"partial_failure"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoCompatibleWorkers => "no_compatible_workers",
            Self::AcquireFailed => "acquire_failed",
            Self::WorkerFailed => "worker_failed",
            Self::TotalFailure => "total_failure",
            Self::PartialFailure => "partial_failure",
            Self::ReductionFailed => "reduction_failed",
            Self::SaveFailed => "save_failed",
        }
    }

    /// Returns the category: `"admission"`, `"task"`, `"aggregate"`, `"reduction"` or `"persistence"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoCompatibleWorkers => "admission",
            Self::AcquireFailed | Self::WorkerFailed => "task",
            Self::TotalFailure | Self::PartialFailure => "aggregate",
            Self::ReductionFailed => "reduction",
            Self::SaveFailed => "persistence",
        }
    }

    /// Whether this error stops the pipeline before any later stage runs.
    ///
    /// Per-worker kinds return `false`: they only become fatal through aggregation.
    #[inline]
    pub fn aborts_pipeline(&self) -> bool {
        matches!(self, Self::NoCompatibleWorkers | Self::TotalFailure)
    }

    /// Whether the kind describes a single worker rather than a whole run.
    #[inline]
    pub fn is_per_worker(&self) -> bool {
        matches!(self, Self::AcquireFailed | Self::WorkerFailed)
    }

    /// Parses a code string back into a kind.
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "E1001" => Self::NoCompatibleWorkers,
            "E2001" => Self::AcquireFailed,
            "E2002" => Self::WorkerFailed,
            "E3001" => Self::TotalFailure,
            "E3002" => Self::PartialFailure,
            "E4001" => Self::ReductionFailed,
            "E5001" => Self::SaveFailed,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
