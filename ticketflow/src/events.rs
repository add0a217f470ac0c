//! Pipeline lifecycle events and the sinks that receive them.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::RecordFailure;

/// Something that happened during a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The run started.
    Started {
        /// Pipeline name.
        pipeline: String,
        /// Run id.
        run_id: Uuid,
    },
    /// A stage dropped a record.
    RecordDropped {
        /// Stage that dropped it.
        stage: String,
        /// Internal user id.
        user_id: String,
        /// Why.
        reason: String,
    },
    /// A stage passed a record on after a per-record failure.
    RecordDegraded {
        /// The failure.
        failure: RecordFailure,
    },
    /// The sink committed a side effect.
    SinkCommitted {
        /// Sink name.
        sink: String,
        /// Internal user id.
        user_id: String,
        /// Sink count after the commit.
        count: u64,
    },
    /// The sink could not perform, or fully perform, its side effect.
    SinkFailed {
        /// The failure.
        failure: RecordFailure,
    },
    /// The run stopped early on request.
    Cancelled {
        /// Cancellation reason.
        reason: String,
    },
    /// The run finished.
    Completed {
        /// Run id.
        run_id: Uuid,
        /// Final sink count.
        count: u64,
    },
    /// The run aborted on a fatal error.
    Failed {
        /// Run id.
        run_id: Uuid,
        /// Error message.
        error: String,
    },
}

impl PipelineEvent {
    /// Dotted event type name, e.g. `record.dropped`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "pipeline.started",
            Self::RecordDropped { .. } => "record.dropped",
            Self::RecordDegraded { .. } => "record.degraded",
            Self::SinkCommitted { .. } => "sink.committed",
            Self::SinkFailed { .. } => "sink.failed",
            Self::Cancelled { .. } => "pipeline.cancelled",
            Self::Completed { .. } => "pipeline.completed",
            Self::Failed { .. } => "pipeline.failed",
        }
    }
}

/// Receives pipeline events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event. Must not fail.
    async fn emit(&self, event: &PipelineEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &PipelineEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        let event_type = event.event_type();
        match event {
            PipelineEvent::Started { pipeline, run_id } => {
                info!(event_type, pipeline = %pipeline, run_id = %run_id, "Pipeline started");
            }
            PipelineEvent::RecordDropped { stage, user_id, reason } => {
                debug!(event_type, stage = %stage, user_id = %user_id, reason = %reason, "Record dropped");
            }
            PipelineEvent::RecordDegraded { failure } => {
                warn!(
                    event_type,
                    stage = %failure.stage,
                    user_id = %failure.user_id,
                    error = %failure.error,
                    "Record passed through degraded"
                );
            }
            PipelineEvent::SinkCommitted { sink, user_id, count } => {
                debug!(event_type, sink = %sink, user_id = %user_id, count, "Side effect committed");
            }
            PipelineEvent::SinkFailed { failure } => {
                warn!(
                    event_type,
                    sink = %failure.stage,
                    user_id = %failure.user_id,
                    error = %failure.error,
                    "Sink failure"
                );
            }
            PipelineEvent::Cancelled { reason } => {
                warn!(event_type, reason = %reason, "Pipeline cancelled");
            }
            PipelineEvent::Completed { run_id, count } => {
                info!(event_type, run_id = %run_id, count, "Pipeline completed");
            }
            PipelineEvent::Failed { run_id, error } => {
                tracing::error!(event_type, run_id = %run_id, error = %error, "Pipeline failed");
            }
        }
    }
}

/// Collects events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events with the given dotted type.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}
