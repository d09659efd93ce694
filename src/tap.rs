//! Tap orchestration
//!
//! Wires configuration, storage, discovery and one executor per selected
//! stream into a single run. Streams are synced one after another; each
//! stream's checkpoint is independent of the others.

use crate::catalog::{discover, Catalog, SchemaDescriptor};
use crate::config::{StreamConfig, TapConfig};
use crate::decode::decoder_for;
use crate::error::{HeapSyncError, Result};
use crate::output::RecordSink;
use crate::storage::{BlobStore, LocalBlobStore};
use crate::sync::{ManifestIndex, ManifestRepository, StateDocument, SyncExecutor, SyncSummary};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which discovered streams to sync
#[derive(Debug, Clone, Default)]
pub struct StreamSelection {
    /// Catalog whose selected streams are synced
    pub catalog: Option<Catalog>,
    /// Explicit table names; empty means no restriction
    pub tables: Vec<String>,
}

impl StreamSelection {
    /// Filter `discovered` down to the selected streams.
    ///
    /// Naming a table that discovery did not find is a configuration error.
    pub fn apply(&self, discovered: &[Arc<SchemaDescriptor>]) -> Result<Vec<Arc<SchemaDescriptor>>> {
        let known: BTreeSet<&str> = discovered.iter().map(|d| d.table.as_str()).collect();
        if let Some(unknown) = self.tables.iter().find(|t| !known.contains(t.as_str())) {
            return Err(HeapSyncError::config(format!(
                "table '{}' not found in any manifest",
                unknown
            )));
        }

        let from_catalog = self.catalog.as_ref().map(Catalog::selected_streams);
        Ok(discovered
            .iter()
            .filter(|d| self.tables.is_empty() || self.tables.contains(&d.table))
            .filter(|d| {
                from_catalog
                    .as_ref()
                    .map(|selected| selected.contains(&d.table))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }
}

/// A configured tap bound to its blob store
pub struct Tap {
    config: TapConfig,
    store: Box<dyn BlobStore>,
}

impl Tap {
    /// Create a tap, opening the store the config points at
    pub fn new(config: TapConfig) -> Result<Self> {
        let store = open_store(&config)?;
        Ok(Self::with_store(config, store))
    }

    /// Create a tap over an already opened store
    pub fn with_store(config: TapConfig, store: Box<dyn BlobStore>) -> Self {
        Self { config, store }
    }

    /// Tap configuration
    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Fetch every manifest and index it by dump id
    pub fn load_index(&self) -> Result<ManifestIndex> {
        let repository = ManifestRepository::new(&*self.store, self.config.manifest_prefix.as_str());
        let index = ManifestIndex::from_manifests(repository.fetch_all()?);
        tracing::info!(dumps = index.len(), "Manifest index built");
        Ok(index)
    }

    /// Discover the available streams
    pub fn discover(&self) -> Result<Catalog> {
        let index = self.load_index()?;
        Ok(Catalog::from_descriptors(&discover(
            &index,
            self.config.additional_info,
        )))
    }

    /// Sync the selected streams, resuming each from its bookmark in `state`
    pub fn sync(
        &self,
        selection: &StreamSelection,
        state: &StateDocument,
        sink: &mut dyn RecordSink,
    ) -> Result<Vec<SyncSummary>> {
        let index = self.load_index()?;
        let streams = selection.apply(&discover(&index, self.config.additional_info))?;
        if streams.is_empty() {
            tracing::warn!("No streams selected");
            return Ok(Vec::new());
        }

        let decoder = decoder_for(self.config.file_format)?;
        let mut summaries = Vec::with_capacity(streams.len());

        for schema in streams {
            let prior = state.checkpoint(&schema.table)?;
            let stream = StreamConfig::from_tap(&self.config, &schema.table);
            let mut executor =
                SyncExecutor::new(&*self.store, decoder.as_ref(), stream, schema, prior)?;
            let summary = executor.run(&index, sink)?;
            summary.log();
            summaries.push(summary);
        }

        Ok(summaries)
    }
}

fn open_store(config: &TapConfig) -> Result<Box<dyn BlobStore>> {
    if let Some(root) = &config.local_root {
        tracing::info!(bucket = %config.bucket, root = %root.display(), "Serving bucket from local directory");
        return Ok(Box::new(LocalBlobStore::new(config.bucket.clone(), root.clone())));
    }
    open_s3(config)
}

#[cfg(feature = "native_s3")]
fn open_s3(config: &TapConfig) -> Result<Box<dyn BlobStore>> {
    use crate::storage::{S3BlobStore, S3StoreConfig};
    Ok(Box::new(S3BlobStore::new(S3StoreConfig::from_tap(config))?))
}

#[cfg(not(feature = "native_s3"))]
fn open_s3(_config: &TapConfig) -> Result<Box<dyn BlobStore>> {
    Err(HeapSyncError::config(
        "S3 access requires the `native_s3` feature; set `local_root` to read a local copy",
    ))
}
