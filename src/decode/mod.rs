//! Record decoders
//!
//! A decoder turns the bytes of one data file into a lazy, finite sequence
//! of rows. The sequence is consumed once and cannot be restarted.

#[cfg(feature = "avro")]
mod avro;
mod jsonl;

#[cfg(feature = "avro")]
pub use avro::AvroDecoder;
pub use jsonl::JsonLinesDecoder;

use crate::config::FileFormat;
use crate::error::{HeapSyncError, Result};
use std::io::Read;

/// A decoded row: column name to value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Lazily decoded rows of a single file
pub type Rows<'r> = Box<dyn Iterator<Item = Result<Row>> + 'r>;

/// Decodes a self-describing container into rows
pub trait RecordDecoder {
    /// Start decoding `reader`; `source` names the file in errors
    fn decode<'r>(&self, source: &str, reader: Box<dyn Read + 'r>) -> Result<Rows<'r>>;
}

/// Decoder for the configured file format
pub fn decoder_for(format: FileFormat) -> Result<Box<dyn RecordDecoder>> {
    match format {
        FileFormat::Jsonl => Ok(Box::new(JsonLinesDecoder)),
        #[cfg(feature = "avro")]
        FileFormat::Avro => Ok(Box::new(AvroDecoder)),
        #[cfg(not(feature = "avro"))]
        FileFormat::Avro => Err(HeapSyncError::config(
            "Avro files require the `avro` feature",
        )),
    }
}

pub(crate) fn expect_object(source: &str, value: serde_json::Value) -> Result<Row> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(HeapSyncError::decode(
            source,
            format!("expected a record, found {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
