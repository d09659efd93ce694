//! Persisted Singer state
//!
//! State holds one bookmark per table:
//!
//! ```json
//! {"bookmarks": {"sessions": {"replication_key": "_sdc_sync_id",
//!                             "replication_key_value": "852,2024-03-01 10:15:00+00:00"}}}
//! ```

use super::checkpoint::Checkpoint;
use crate::catalog::SYNC_ID_COLUMN;
use crate::error::{HeapSyncError, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Bookmark of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Column the bookmark value refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    /// Checkpoint token
    pub replication_key_value: Value,
}

/// Singer state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Bookmarks keyed by table
    #[serde(default)]
    pub bookmarks: BTreeMap<String, Bookmark>,
}

impl StateDocument {
    /// Load a state file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| HeapSyncError::parse(path.display().to_string(), e))
    }

    /// Save atomically: write a sibling temp file, then rename over `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        let temp_path = path.with_extension("tmp");

        let file = File::create(&temp_path).with_path(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| HeapSyncError::Sink(format!("state serialization failed: {}", e)))?;
        writer.flush().with_path(&temp_path)?;

        std::fs::rename(&temp_path, path).with_path(path)?;
        Ok(())
    }

    /// Checkpoint recorded for `table`, if any
    pub fn checkpoint(&self, table: &str) -> Result<Option<Checkpoint>> {
        self.bookmarks
            .get(table)
            .map(|bookmark| Checkpoint::from_value(&bookmark.replication_key_value))
            .transpose()
    }

    /// Record a checkpoint token for `table`
    pub fn set_token(&mut self, table: &str, token: &str) {
        self.bookmarks.insert(
            table.to_string(),
            Bookmark {
                replication_key: Some(SYNC_ID_COLUMN.to_string()),
                replication_key_value: Value::String(token.to_string()),
            },
        );
    }
}
