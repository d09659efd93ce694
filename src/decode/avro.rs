//! Avro object container decoder

use super::{RecordDecoder, Row, Rows};
use crate::error::{HeapSyncError, Result};
use apache_avro::types::Value as AvroValue;
use apache_avro::Reader;
use serde_json::{Number, Value};
use std::io::Read;

/// Decodes Avro object container files written by the exporter
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroDecoder;

impl RecordDecoder for AvroDecoder {
    fn decode<'r>(&self, source: &str, reader: Box<dyn Read + 'r>) -> Result<Rows<'r>> {
        let records = Reader::new(reader).map_err(|e| HeapSyncError::decode(source, e))?;
        let source = source.to_string();
        Ok(Box::new(records.map(move |item| {
            let value = item.map_err(|e| HeapSyncError::decode(source.as_str(), e))?;
            record_to_row(&source, value)
        })))
    }
}

fn record_to_row(source: &str, value: AvroValue) -> Result<Row> {
    match value {
        AvroValue::Record(fields) => Ok(fields
            .into_iter()
            .map(|(name, value)| (name, to_json(value)))
            .collect()),
        AvroValue::Union(_, inner) => record_to_row(source, *inner),
        other => Err(HeapSyncError::decode(
            source,
            format!("expected a record, found {:?}", other),
        )),
    }
}

/// Convert an Avro value to its JSON representation
pub fn to_json(value: AvroValue) -> Value {
    match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Bool(b),
        AvroValue::Int(i) | AvroValue::Date(i) | AvroValue::TimeMillis(i) => Value::from(i),
        AvroValue::Long(i)
        | AvroValue::TimeMicros(i)
        | AvroValue::TimestampMillis(i)
        | AvroValue::TimestampMicros(i)
        | AvroValue::LocalTimestampMillis(i)
        | AvroValue::LocalTimestampMicros(i) => Value::from(i),
        AvroValue::Float(f) => float(f as f64),
        AvroValue::Double(f) => float(f),
        AvroValue::String(s) | AvroValue::Enum(_, s) => Value::String(s),
        AvroValue::Bytes(bytes) | AvroValue::Fixed(_, bytes) => {
            Value::Array(bytes.into_iter().map(Value::from).collect())
        }
        AvroValue::Uuid(uuid) => Value::String(uuid.to_string()),
        AvroValue::Union(_, inner) => to_json(*inner),
        AvroValue::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        AvroValue::Map(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, to_json(value)))
                .collect(),
        ),
        AvroValue::Record(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(name, value)| (name, to_json(value)))
                .collect(),
        ),
        other => Value::String(format!("{:?}", other)),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apache_avro::{Schema, Writer};
    use std::io::Cursor;

    const SCHEMA: &str = r#"{
        "type": "record",
        "name": "pageviews",
        "fields": [
            {"name": "event_id", "type": "long"},
            {"name": "path", "type": ["null", "string"]},
            {"name": "score", "type": "double"}
        ]
    }"#;

    fn container(rows: &[(i64, Option<&str>, f64)]) -> Vec<u8> {
        let schema = Schema::parse_str(SCHEMA).unwrap();
        let mut writer = Writer::new(&schema, Vec::new());
        for (event_id, path, score) in rows {
            let mut record = apache_avro::types::Record::new(&schema).unwrap();
            record.put("event_id", *event_id);
            record.put("path", path.map(|p| p.to_string()));
            record.put("score", *score);
            writer.append(record).unwrap();
        }
        writer.into_inner().unwrap()
    }

    #[test]
    fn test_decodes_container_rows() {
        let bytes = container(&[(1, Some("/home"), 0.5), (2, None, 1.0)]);
        let rows: Vec<Row> = AvroDecoder
            .decode("part-00000.avro", Box::new(Cursor::new(bytes)))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["event_id"], 1);
        assert_eq!(rows[0]["path"], "/home");
        assert_eq!(rows[1]["path"], Value::Null);
        assert_eq!(rows[1]["score"], 1.0);
    }

    #[test]
    fn test_rejects_non_avro_input() {
        let result = AvroDecoder.decode("part-00000.avro", Box::new(Cursor::new(b"not avro".to_vec())));
        assert!(matches!(result, Err(HeapSyncError::Decode { .. })));
    }

    #[test]
    fn test_nested_values() {
        let value = AvroValue::Record(vec![
            ("tags".to_string(), AvroValue::Array(vec![AvroValue::String("a".into())])),
            ("nan".to_string(), AvroValue::Double(f64::NAN)),
        ]);
        assert_eq!(
            to_json(value),
            serde_json::json!({"tags": ["a"], "nan": null})
        );
    }
}
