//! 遥测模块：以即发即弃方式输出结构化调度事件。
//!
//! Observability sinks for dispatch events.
//!
//! Every stage of a run emits a [`DispatchEvent`] (operation, status, duration,
//! error). Sinks are fire-and-forget: a failing sink is logged and never turns
//! into a run failure.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`DispatchEvent`] | Structured event record |
//! | [`EventSink`] | Trait for event destinations |
//! | [`NoopEventSink`] | Default no-op sink |
//! | [`InMemoryEventSink`] | In-memory sink for testing |
//! | [`TracingEventSink`] | Forwards events to `tracing` |
//! | [`CompositeEventSink`] | Multi-destination composite sink |

mod event;

pub use event::{DispatchEvent, EventStatus, Operation};

use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Destination for dispatch events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn report(&self, event: DispatchEvent) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Report `event`, logging instead of propagating a sink failure.
pub async fn emit(sink: &dyn EventSink, event: DispatchEvent) {
    let operation = event.operation.as_str();
    if let Err(e) = sink.report(event).await {
        warn!(operation, error = %e, "event sink report failed");
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn report(&self, _event: DispatchEvent) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}

/// In-memory sink for testing.
pub struct InMemoryEventSink {
    events: RwLock<Vec<DispatchEvent>>,
    max_events: usize,
}
impl InMemoryEventSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events: max,
        }
    }
    pub fn get_events(&self) -> Vec<DispatchEvent> {
        self.events.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
    pub fn get_events_by_run(&self, run_id: &str) -> Vec<DispatchEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }
    pub fn get_events_by_operation(&self, operation: Operation) -> Vec<DispatchEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }
    pub fn clear(&self) {
        self.events.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn report(&self, event: DispatchEvent) -> Result<()> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.push(event);
        if events.len() > self.max_events {
            events.remove(0);
        }
        Ok(())
    }
}

/// Logs every event through `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn report(&self, event: DispatchEvent) -> Result<()> {
        info!(
            run_id = event.run_id.as_str(),
            operation = event.operation.as_str(),
            status = event.status.as_str(),
            worker_id = event.worker_id.as_deref().unwrap_or(""),
            duration_ms = event.duration_ms.unwrap_or(0),
            error_code = event.error_code.as_deref().unwrap_or(""),
            error = event.error.as_deref().unwrap_or(""),
            "dispatch event"
        );
        Ok(())
    }
}

/// Composite sink for multiple destinations.
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}
impl CompositeEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }
    pub fn add_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}
impl Default for CompositeEventSink {
    fn default() -> Self {
        Self::new()
    }
}
#[async_trait]
impl EventSink for CompositeEventSink {
    async fn report(&self, event: DispatchEvent) -> Result<()> {
        for s in &self.sinks {
            emit(s.as_ref(), event.clone()).await;
        }
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        for s in &self.sinks {
            let _ = s.close().await;
        }
        Ok(())
    }
}
