//! CSV export sink.

use async_trait::async_trait;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use super::{RecordSink, SinkCounter, SinkOutcome};
use crate::errors::TicketflowError;
use crate::records::AugmentedRecord;
use crate::stages::AttributeProjection;

/// Writes one CSV row per projected record. The header row is written on
/// construction, so an empty run still produces a valid file.
///
/// Rows are buffered. A counted row is on disk only after [`RecordSink::finish`]
/// or [`CsvExportSink::into_inner`] flushes the writer.
pub struct CsvExportSink<W: Write + Send> {
    name: String,
    writer: csv::Writer<W>,
    columns: usize,
    counter: SinkCounter,
}

impl<W: Write + Send> std::fmt::Debug for CsvExportSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvExportSink")
            .field("columns", &self.columns)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl CsvExportSink<File> {
    /// Creates the file at `path`, replacing any existing one.
    pub fn create(path: impl AsRef<Path>, projection: &AttributeProjection) -> Result<Self, TicketflowError> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Export file created");
        Self::new(file, projection)
    }
}

impl<W: Write + Send> CsvExportSink<W> {
    /// Wraps `writer` and writes the header row of `projection`.
    pub fn new(writer: W, projection: &AttributeProjection) -> Result<Self, TicketflowError> {
        let mut writer = csv::Writer::from_writer(writer);
        let header = projection.header();
        writer.write_record(&header)?;
        Ok(Self {
            name: "export".to_string(),
            writer,
            columns: header.len(),
            counter: SinkCounter::new(),
        })
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W, TicketflowError> {
        self.writer
            .into_inner()
            .map_err(|e| TicketflowError::Export(e.error().to_string()))
    }
}

#[async_trait]
impl<W: Write + Send> RecordSink for CsvExportSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&mut self, record: AugmentedRecord) -> Result<SinkOutcome, TicketflowError> {
        let Some(row) = record.projected else {
            return Err(TicketflowError::Misconfigured(
                "export sink received a record without a projected row".to_string(),
            ));
        };
        if row.len() != self.columns {
            return Err(TicketflowError::Export(format!(
                "row has {} cells, header has {}",
                row.len(),
                self.columns
            )));
        }
        self.writer.write_record(&row)?;
        self.counter.increment();
        Ok(SinkOutcome::committed())
    }

    fn count(&self) -> u64 {
        self.counter.get()
    }

    async fn finish(&mut self) -> Result<(), TicketflowError> {
        self.writer.flush()?;
        Ok(())
    }
}
