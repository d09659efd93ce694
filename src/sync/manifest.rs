//! Dump manifests
//!
//! Every Heap Connect dump writes a JSON manifest describing the tables it
//! exported: their columns and the data files holding their rows. Manifests
//! are immutable once written.

use crate::error::{HeapSyncError, Result};
use crate::storage::BlobStore;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

/// One table's listing inside a dump manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableManifest {
    /// Table name
    #[serde(default)]
    pub name: String,
    /// Column names
    #[serde(default)]
    pub columns: BTreeSet<String>,
    /// Blob paths of the data files, as written by the exporter
    #[serde(default)]
    pub files: Vec<String>,
    /// Whether the exporter wrote this table incrementally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
}

/// Manifest of a single dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Dump identifier assigned by the exporter
    pub dump_id: i64,
    /// Tables keyed by name
    #[serde(deserialize_with = "deserialize_tables")]
    pub tables: BTreeMap<String, TableManifest>,
}

/// Tables arrive either as a list of objects with a `name` field, or as an
/// object keyed by table name.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTables {
    List(Vec<TableManifest>),
    Map(BTreeMap<String, TableManifest>),
}

fn deserialize_tables<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, TableManifest>, D::Error>
where
    D: Deserializer<'de>,
{
    let tables = match RawTables::deserialize(deserializer)? {
        RawTables::List(list) => list.into_iter().map(|t| (t.name.clone(), t)).collect(),
        RawTables::Map(map) => map
            .into_iter()
            .map(|(name, mut table)| {
                if table.name.is_empty() {
                    table.name = name.clone();
                }
                (name, table)
            })
            .collect(),
    };
    Ok(tables)
}

impl Manifest {
    /// Parse a manifest document
    pub fn from_slice(key: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| HeapSyncError::parse(key, e))
    }

    /// Look up a table
    pub fn table(&self, name: &str) -> Option<&TableManifest> {
        self.tables.get(name)
    }
}

/// Reads dump manifests out of a bucket
pub struct ManifestRepository<'a, S: BlobStore + ?Sized> {
    store: &'a S,
    prefix: String,
}

impl<'a, S: BlobStore + ?Sized> ManifestRepository<'a, S> {
    /// Create a repository listing manifests under `prefix`
    pub fn new(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Keys of all manifest documents, in listing order
    pub fn manifest_keys(&self) -> Result<Vec<String>> {
        let objects = self.store.list(&self.prefix)?;
        Ok(objects
            .into_iter()
            .filter(|o| o.key.ends_with(".json"))
            .map(|o| o.key)
            .collect())
    }

    /// Fetch and parse one manifest
    pub fn fetch(&self, key: &str) -> Result<Manifest> {
        let mut reader = self.store.fetch(key)?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| HeapSyncError::Storage(format!("read of '{}' failed: {}", key, e)))?;
        Manifest::from_slice(key, &bytes)
    }

    /// Fetch every manifest under the prefix.
    ///
    /// A prefix holding no manifest is reported as `NotFound`.
    pub fn fetch_all(&self) -> Result<Vec<Manifest>> {
        let keys = self.manifest_keys()?;
        if keys.is_empty() {
            return Err(HeapSyncError::NotFound(format!(
                "no manifests under '{}' in bucket '{}'",
                self.prefix,
                self.store.bucket()
            )));
        }
        tracing::info!(
            bucket = %self.store.bucket(),
            prefix = %self.prefix,
            count = keys.len(),
            "Fetching manifests"
        );

        keys.iter().map(|key| self.fetch(key)).collect()
    }
}
