//! Structured dispatch events.

use crate::error_code::ErrorKind;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Pipeline step an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Admission,
    Dispatch,
    Aggregate,
    Reduce,
    Save,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admission => "admission",
            Self::Dispatch => "dispatch",
            Self::Aggregate => "aggregate",
            Self::Reduce => "reduce",
            Self::Save => "save",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failure,
    Skipped,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }
}

/// One observability record: operation, status, duration and error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub run_id: String,
    pub operation: Operation,
    pub status: EventStatus,
    pub worker_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub timestamp: f64,
}

impl DispatchEvent {
    pub fn new(run_id: impl Into<String>, operation: Operation, status: EventStatus) -> Self {
        Self {
            run_id: run_id.into(),
            operation,
            status,
            worker_id: None,
            duration_ms: None,
            error_code: None,
            error: None,
            timestamp: timestamp(),
        }
    }

    pub fn success(run_id: impl Into<String>, operation: Operation) -> Self {
        Self::new(run_id, operation, EventStatus::Success)
    }

    pub fn failure(run_id: impl Into<String>, operation: Operation, kind: ErrorKind, error: impl Into<String>) -> Self {
        Self::new(run_id, operation, EventStatus::Failure).with_error(kind, error)
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_error(mut self, kind: ErrorKind, error: impl Into<String>) -> Self {
        self.error_code = Some(kind.code().to_string());
        self.error = Some(error.into());
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_code.as_deref().and_then(ErrorKind::from_code)
    }

    /// One-line JSON, as written by line-oriented sinks.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_event_json_fields() {
        let event = DispatchEvent::failure("r1", Operation::Reduce, ErrorKind::ReductionFailed, "boom")
            .with_worker("w1")
            .with_duration(Duration::from_millis(1500));
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["operation"], "reduce");
        assert_eq!(value["status"], "failure");
        assert_eq!(value["error_code"], "E4001");
        assert_eq!(value["duration_ms"], 1500);
        assert_eq!(event.error_kind(), Some(ErrorKind::ReductionFailed));
    }
}
