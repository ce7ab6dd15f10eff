//! Typed hooks observing every dispatch.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use tracing::info;

/// One observed dispatch.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub server: String,
    pub tool: String,
    pub duration_ms: u64,
    pub is_error: bool,
}

/// Out-of-band observer of dispatches.
pub trait DispatchSink: Send + Sync {
    /// Called after every completed dispatch. Must not block.
    fn on_dispatch(&self, event: &DispatchEvent);
}

/// Sink that emits a structured log line per dispatch.
#[derive(Default)]
pub struct TracingSink;

impl DispatchSink for TracingSink {
    fn on_dispatch(&self, event: &DispatchEvent) {
        info!(
            server = %event.server,
            tool = %event.tool,
            duration_ms = event.duration_ms,
            is_error = event.is_error,
            "dispatch"
        );
    }
}

/// Sink accumulating counters for the metrics surface.
#[derive(Default)]
pub struct MetricsSink {
    total: AtomicU64,
    errors: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl MetricsSink {
    /// Create a zeroed sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot counters as JSON for the health/metrics surface.
    pub fn snapshot(&self) -> Value {
        let total = self.total.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total_duration = self.total_duration_ms.load(Ordering::Relaxed);
        json!({
            "dispatches_total": total,
            "dispatch_errors_total": errors,
            "dispatch_duration_ms_total": total_duration,
        })
    }
}

impl DispatchSink for MetricsSink {
    fn on_dispatch(&self, event: &DispatchEvent) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if event.is_error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_ms
            .fetch_add(event.duration_ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_sink_accumulates() {
        let sink = MetricsSink::new();
        sink.on_dispatch(&DispatchEvent {
            server: "graph-memory".into(),
            tool: "create_entity".into(),
            duration_ms: 12,
            is_error: false,
        });
        sink.on_dispatch(&DispatchEvent {
            server: "tasks".into(),
            tool: "create_task".into(),
            duration_ms: 8,
            is_error: true,
        });

        let snapshot = sink.snapshot();
        assert_eq!(snapshot["dispatches_total"], 2);
        assert_eq!(snapshot["dispatch_errors_total"], 1);
        assert_eq!(snapshot["dispatch_duration_ms_total"], 20);
    }
}
