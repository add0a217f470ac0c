//! Pipeline building and execution.
//!
//! A pipeline pulls one record at a time from its source, passes it through
//! every stage in order and hands it to the sink before pulling the next.
//! Nothing is buffered between stages, so the slowest stage sets the pace
//! and source order is preserved end to end.

mod builder;


pub use builder::PipelineBuilder;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::errors::{RecordFailure, TicketflowError};
use crate::events::{EventSink, PipelineEvent};
use crate::records::AugmentedRecord;
use crate::sinks::{RecordSink, SinkOutcome};
use crate::stages::{RecordStage, StageOutcome};
use crate::store::RecordStream;

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Records pulled from the source.
    pub records_read: u64,
    /// Records that reached the sink.
    pub records_emitted: u64,
    /// Records dropped, per stage name.
    pub dropped: BTreeMap<String, u64>,
    /// Records passed on after a per-record failure.
    pub degraded: u64,
    /// Side effects committed by the sink in this run.
    pub committed: u64,
    /// Every per-record failure, in order.
    pub failures: Vec<RecordFailure>,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl PipelineReport {
    fn new(pipeline: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.to_string(),
            records_read: 0,
            records_emitted: 0,
            dropped: BTreeMap::new(),
            degraded: 0,
            committed: 0,
            failures: Vec::new(),
            cancelled: false,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Records dropped across all stages.
    #[must_use]
    pub fn total_dropped(&self) -> u64 {
        self.dropped.values().sum()
    }
}

/// A validated, linear chain of stages.
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn RecordStage>>,
    events: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
    require_augmentation: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Returns a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Drives every record from `source` through the stages into `sink`.
    ///
    /// Per-record failures are collected in the report. The first fatal
    /// error aborts the run and is returned; `sink.count()` then still holds
    /// the number of effects committed before it.
    ///
    /// # Errors
    ///
    /// Returns the first pipeline-fatal error raised by the source, a stage
    /// or the sink.
    pub async fn run(
        &self,
        source: RecordStream<'_>,
        sink: &mut dyn RecordSink,
    ) -> Result<PipelineReport, TicketflowError> {
        let start = Instant::now();
        let mut report = PipelineReport::new(&self.name);
        self.events
            .emit(&PipelineEvent::Started {
                pipeline: self.name.clone(),
                run_id: report.run_id,
            })
            .await;

        let driven = self.drive(source, sink, &mut report).await;
        let finished = match driven {
            Ok(()) => sink.finish().await,
            Err(e) => {
                if let Err(finish_err) = sink.finish().await {
                    warn!(sink = %sink.name(), error = %finish_err, "Sink finish failed after abort");
                }
                Err(e)
            }
        };

        report.committed = sink.count();
        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match finished {
            Ok(()) => {
                self.events
                    .emit(&PipelineEvent::Completed {
                        run_id: report.run_id,
                        count: report.committed,
                    })
                    .await;
                Ok(report)
            }
            Err(e) => {
                self.events
                    .emit(&PipelineEvent::Failed {
                        run_id: report.run_id,
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        mut source: RecordStream<'_>,
        sink: &mut dyn RecordSink,
        report: &mut PipelineReport,
    ) -> Result<(), TicketflowError> {
        loop {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
                    self.events.emit(&PipelineEvent::Cancelled { reason }).await;
                    report.cancelled = true;
                    return Ok(());
                }
            }

            let Some(next) = source.next().await else {
                return Ok(());
            };
            let record = next?;
            report.records_read += 1;

            let Some(record) = self.run_stages(record.into(), report).await? else {
                continue;
            };

            if self.require_augmentation && !record.has_passed_augmentation() {
                return Err(TicketflowError::Misconfigured(format!(
                    "record '{}' reached sink '{}' without augmentation",
                    record.user_id(),
                    sink.name()
                )));
            }

            report.records_emitted += 1;
            let user_id = record.user_id().to_string();
            match sink.consume(record).await? {
                SinkOutcome::Committed { failure } => {
                    self.events
                        .emit(&PipelineEvent::SinkCommitted {
                            sink: sink.name().to_string(),
                            user_id,
                            count: sink.count(),
                        })
                        .await;
                    if let Some(failure) = failure {
                        self.record_sink_failure(failure, report).await;
                    }
                }
                SinkOutcome::Skipped { reason, failure } => match failure {
                    Some(failure) => self.record_sink_failure(failure, report).await,
                    None => debug!(sink = %sink.name(), user_id = %user_id, reason = %reason, "Record skipped"),
                },
            }
        }
    }

    /// Runs one record through every stage. `None` means it was dropped.
    async fn run_stages(
        &self,
        mut record: AugmentedRecord,
        report: &mut PipelineReport,
    ) -> Result<Option<AugmentedRecord>, TicketflowError> {
        for stage in &self.stages {
            match stage.process(record).await? {
                StageOutcome::Emit { record: next, degraded } => {
                    if let Some(failure) = degraded {
                        report.degraded += 1;
                        self.events
                            .emit(&PipelineEvent::RecordDegraded {
                                failure: failure.clone(),
                            })
                            .await;
                        report.failures.push(failure);
                    }
                    record = next;
                }
                StageOutcome::Drop {
                    user_id,
                    reason,
                    failure,
                } => {
                    *report.dropped.entry(stage.name().to_string()).or_insert(0) += 1;
                    self.events
                        .emit(&PipelineEvent::RecordDropped {
                            stage: stage.name().to_string(),
                            user_id,
                            reason,
                        })
                        .await;
                    if let Some(failure) = failure {
                        report.failures.push(failure);
                    }
                    return Ok(None);
                }
            }
        }
        Ok(Some(record))
    }

    async fn record_sink_failure(&self, failure: RecordFailure, report: &mut PipelineReport) {
        self.events
            .emit(&PipelineEvent::SinkFailed {
                failure: failure.clone(),
            })
            .await;
        report.failures.push(failure);
    }
}
