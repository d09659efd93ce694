//! Singer message writer
//!
//! Writes one JSON message per line: `SCHEMA` before a stream's first
//! record, `RECORD` per row and `STATE` whenever a checkpoint advances.

use super::RecordSink;
use crate::catalog::SchemaDescriptor;
use crate::decode::Row;
use crate::error::{HeapSyncError, Result};
use crate::sync::StateDocument;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
enum Message<'m> {
    Schema {
        stream: &'m str,
        schema: Value,
        key_properties: &'m [String],
        #[serde(skip_serializing_if = "Option::is_none")]
        bookmark_properties: Option<[&'m str; 1]>,
    },
    Record {
        stream: &'m str,
        record: &'m Row,
        time_extracted: String,
    },
    State {
        value: &'m StateDocument,
    },
}

/// Record sink speaking the Singer protocol
pub struct SingerWriter<W: Write> {
    out: W,
    state: StateDocument,
    state_file: Option<PathBuf>,
}

impl<W: Write> SingerWriter<W> {
    /// Write messages to `out`, carrying bookmarks forward from `state`
    pub fn new(out: W, state: StateDocument) -> Self {
        Self {
            out,
            state,
            state_file: None,
        }
    }

    /// Also save the state document to `path` after every checkpoint
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Current state document
    pub fn state(&self) -> &StateDocument {
        &self.state
    }

    /// Flush and return the underlying writer
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.out)
    }

    /// Write the full state document as a `STATE` message
    pub fn write_state(&mut self) -> Result<()> {
        write_message(&mut self.out, &Message::State { value: &self.state })?;
        self.flush()
    }

    fn write(&mut self, message: &Message<'_>) -> Result<()> {
        write_message(&mut self.out, message)
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(sink_error)
    }
}

fn write_message<W: Write>(out: &mut W, message: &Message<'_>) -> Result<()> {
    serde_json::to_writer(&mut *out, message)
        .map_err(|e| HeapSyncError::Sink(format!("failed to serialize message: {}", e)))?;
    out.write_all(b"\n").map_err(sink_error)
}

fn sink_error(e: std::io::Error) -> HeapSyncError {
    HeapSyncError::Sink(format!("failed to write message: {}", e))
}

impl<W: Write> RecordSink for SingerWriter<W> {
    fn begin_stream(&mut self, schema: &SchemaDescriptor) -> Result<()> {
        self.write(&Message::Schema {
            stream: &schema.table,
            schema: schema.json_schema(),
            key_properties: &schema.key_properties,
            bookmark_properties: schema.replication_key().map(|key| [key]),
        })
    }

    fn emit(&mut self, table: &str, row: Row) -> Result<()> {
        self.write(&Message::Record {
            stream: table,
            record: &row,
            time_extracted: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        })
    }

    fn persist_checkpoint(&mut self, table: &str, token: &str) -> Result<()> {
        self.state.set_token(table, token);

        self.write_state()?;

        if let Some(path) = &self.state_file {
            self.state.save(path)?;
        }
        tracing::debug!(table, token, "Checkpoint persisted");
        Ok(())
    }
}
