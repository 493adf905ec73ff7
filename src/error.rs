use crate::error_code::ErrorKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "config.safety_margin_pct")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "limiter_registry")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A single worker's failure within one stage.
///
/// Captured inside the dispatch task and handed to the aggregation point; never
/// propagated across task boundaries on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{worker_id}: {message}")]
pub struct WorkerFailure {
    pub worker_id: String,
    /// Either [`ErrorKind::AcquireFailed`] or [`ErrorKind::WorkerFailed`].
    pub kind: ErrorKind,
    pub message: String,
    /// Provider error category reported by the worker (e.g. "rate_limited"), passed through as-is.
    pub class: Option<String>,
    pub duration: Duration,
}

impl WorkerFailure {
    pub fn new(worker_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind,
            message: message.into(),
            class: None,
            duration: Duration::ZERO,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Run-level error: a stable [`ErrorKind`] plus the per-worker causes behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub message: String,
    pub causes: Vec<WorkerFailure>,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn with_causes(mut self, causes: Vec<WorkerFailure>) -> Self {
        self.causes = causes;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_total_failure(&self) -> bool {
        self.kind == ErrorKind::TotalFailure
    }

    pub fn is_partial_failure(&self) -> bool {
        self.kind == ErrorKind::PartialFailure
    }

    /// Ids of the workers behind this error, in cause order.
    pub fn failed_workers(&self) -> Vec<&str> {
        self.causes.iter().map(|c| c.worker_id.as_str()).collect()
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.causes
            .first()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Unified error type for the dispatch runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Dispatch error ({}): {}", .0.kind, .0)]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Classification of dispatch errors; `None` for configuration and plumbing errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Dispatch(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
