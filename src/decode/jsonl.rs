//! Newline-delimited JSON decoder

use super::{expect_object, RecordDecoder, Rows};
use crate::error::{HeapSyncError, Result};
use serde_json::Value;
use std::io::Read;

/// Decodes a stream of JSON objects, one per record
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesDecoder;

impl RecordDecoder for JsonLinesDecoder {
    fn decode<'r>(&self, source: &str, reader: Box<dyn Read + 'r>) -> Result<Rows<'r>> {
        let source = source.to_string();
        let stream = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
        Ok(Box::new(stream.map(move |item| {
            item.map_err(|e| HeapSyncError::decode(source.as_str(), e))
                .and_then(|value| expect_object(&source, value))
        })))
    }
}
