//! Stream discovery
//!
//! Each table's schema is sampled once from the column lists of a single
//! dump and frozen into a [`SchemaDescriptor`] that the executor carries for
//! the rest of the run.

use crate::error::{HeapSyncError, IoResultExt, Result};
use crate::sync::ManifestIndex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Column carrying the checkpoint token of each record
pub const SYNC_ID_COLUMN: &str = "_sdc_sync_id";

/// Immutable description of a table's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    /// Table name
    pub table: String,
    /// Columns sampled from the manifest
    pub columns: BTreeSet<String>,
    /// Primary key columns
    pub key_properties: Vec<String>,
    /// Whether records carry [`SYNC_ID_COLUMN`]
    pub additional_info: bool,
}

impl SchemaDescriptor {
    /// Describe a table
    pub fn new(table: &str, columns: BTreeSet<String>, additional_info: bool) -> Self {
        Self {
            table: table.to_string(),
            key_properties: key_properties(table),
            columns,
            additional_info,
        }
    }

    /// JSON schema of a record
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for column in &self.columns {
            properties.insert(column.clone(), json!({}));
        }
        if self.additional_info {
            properties.insert(SYNC_ID_COLUMN.to_string(), json!({"type": ["null", "string"]}));
        }
        json!({"type": "object", "properties": properties})
    }

    /// Replication key, if records carry one
    pub fn replication_key(&self) -> Option<&'static str> {
        self.additional_info.then_some(SYNC_ID_COLUMN)
    }
}

/// Primary key columns of a Heap table
pub fn key_properties(table: &str) -> Vec<String> {
    let key = match table {
        "user_migrations" => "from_user_id",
        "users" => "user_id",
        _ => "event_id",
    };
    vec![key.to_string()]
}

/// Describe every table present in the sampled dump
pub fn discover(index: &ManifestIndex, additional_info: bool) -> Vec<Arc<SchemaDescriptor>> {
    let Some((dump_id, tables)) = index.sample_dump() else {
        tracing::warn!("No manifests found, nothing to discover");
        return Vec::new();
    };

    tracing::info!(dump_id, tables = tables.len(), "Sampling schemas");
    tables
        .values()
        .map(|t| Arc::new(SchemaDescriptor::new(&t.name, t.columns.clone(), additional_info)))
        .collect()
}

/// Singer catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Streams in the catalog
    pub streams: Vec<CatalogEntry>,
}

/// One stream of a Singer catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stream identifier
    pub tap_stream_id: String,
    /// Stream name
    pub stream: String,
    /// JSON schema of a record
    #[serde(default)]
    pub schema: Value,
    /// Primary key columns
    #[serde(default)]
    pub key_properties: Vec<String>,
    /// Replication key column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    /// Legacy top-level selection flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    /// Singer metadata entries
    #[serde(default)]
    pub metadata: Vec<Value>,
}

impl CatalogEntry {
    fn from_descriptor(descriptor: &SchemaDescriptor) -> Self {
        Self {
            tap_stream_id: descriptor.table.clone(),
            stream: descriptor.table.clone(),
            schema: descriptor.json_schema(),
            key_properties: descriptor.key_properties.clone(),
            replication_key: descriptor.replication_key().map(str::to_string),
            selected: None,
            metadata: vec![json!({
                "breadcrumb": [],
                "metadata": {
                    "inclusion": "available",
                    "selected": true,
                    "table-key-properties": descriptor.key_properties,
                    "valid-replication-keys": descriptor.replication_key().into_iter().collect::<Vec<_>>(),
                }
            })],
        }
    }

    /// Whether the stream is selected for sync; unannotated streams are
    pub fn is_selected(&self) -> bool {
        let from_metadata = self.metadata.iter().find_map(|entry| {
            let root = entry
                .get("breadcrumb")
                .and_then(Value::as_array)
                .map(|b| b.is_empty())
                .unwrap_or(false);
            if root {
                entry
                    .get("metadata")
                    .and_then(|m| m.get("selected"))
                    .and_then(Value::as_bool)
            } else {
                None
            }
        });
        from_metadata.or(self.selected).unwrap_or(true)
    }
}

impl Catalog {
    /// Catalog of discovered streams
    pub fn from_descriptors(descriptors: &[Arc<SchemaDescriptor>]) -> Self {
        Self {
            streams: descriptors
                .iter()
                .map(|d| CatalogEntry::from_descriptor(d))
                .collect(),
        }
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_path(path)?;
        serde_json::from_str(&raw).map_err(|e| HeapSyncError::parse(path.display().to_string(), e))
    }

    /// Names of the selected streams
    pub fn selected_streams(&self) -> BTreeSet<String> {
        self.streams
            .iter()
            .filter(|s| s.is_selected())
            .map(|s| s.stream.clone())
            .collect()
    }
}
