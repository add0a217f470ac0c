//! Pipeline builder with validation.

use std::collections::HashSet;
use std::sync::Arc;

use super::Pipeline;
use crate::cancellation::CancellationToken;
use crate::errors::TicketflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::stages::RecordStage;

/// Builder for creating validated pipelines.
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Stages in execution order.
    stages: Vec<Arc<dyn RecordStage>>,
    /// Names already taken, for duplicate detection.
    names: HashSet<String>,
    events: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
    require_augmentation: bool,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stages)
            .field("require_augmentation", &self.require_augmentation)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            names: HashSet::new(),
            events: Arc::new(NoOpEventSink),
            cancel: None,
            require_augmentation: true,
        }
    }

    /// Appends a stage. Records flow through stages in the order added.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage with the same name was already added.
    pub fn stage(mut self, stage: Arc<dyn RecordStage>) -> Result<Self, TicketflowError> {
        let name = stage.name().to_string();
        if name.is_empty() {
            return Err(TicketflowError::Misconfigured("stage name is empty".to_string()));
        }
        if !self.names.insert(name.clone()) {
            return Err(TicketflowError::Misconfigured(format!(
                "stage '{name}' added twice to pipeline '{}'",
                self.name
            )));
        }
        self.stages.push(stage);
        Ok(self)
    }

    /// Sets where lifecycle events go.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the token checked between records.
    #[must_use]
    pub fn cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether records must have passed an augmentation stage before they
    /// reach the sink. On by default.
    #[must_use]
    pub fn require_augmentation(mut self, required: bool) -> Self {
        self.require_augmentation = required;
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            stages: self.stages,
            events: self.events,
            cancel: self.cancel,
            require_augmentation: self.require_augmentation,
        }
    }
}
