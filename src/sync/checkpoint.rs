//! Per-table resumption checkpoints
//!
//! A checkpoint is persisted as the token `"<dump_id>,<timestamp>"`. The
//! same token is written to the `_sdc_sync_id` column of every record, so a
//! downstream target can resume from the last record it stored.

use crate::error::{HeapSyncError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use std::fmt;

/// Timestamp layout used inside checkpoint tokens
const TOKEN_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// Resumption boundary for one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checkpoint {
    /// Last dump that was fully processed
    pub sync_id: i64,
    /// Modification time of the last file confirmed synced
    pub last_modified: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Start of history
    pub fn start() -> Self {
        Self::default()
    }

    /// Checkpoint after a completed dump
    pub fn new(sync_id: i64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            sync_id,
            last_modified,
        }
    }

    /// Parse a persisted token.
    ///
    /// Accepts `"<dump_id>,<timestamp>"` and a bare `"<dump_id>"`.
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let invalid = || HeapSyncError::InvalidCheckpoint(token.to_string());

        let (sync_part, time_part) = match token.split_once(',') {
            Some((sync_id, time)) => (sync_id.trim(), Some(time.trim())),
            None => (token, None),
        };

        let sync_id = sync_part.parse::<i64>().map_err(|_| invalid())?;
        let last_modified = match time_part {
            Some(raw) => Some(parse_token_time(raw).ok_or_else(invalid)?),
            None => None,
        };

        Ok(Self {
            sync_id,
            last_modified,
        })
    }

    /// Parse a bookmark value, which older states store as a JSON integer
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(|sync_id| Self::new(sync_id, None))
                .ok_or_else(|| HeapSyncError::InvalidCheckpoint(n.to_string())),
            Value::String(s) => Self::parse(s),
            other => Err(HeapSyncError::InvalidCheckpoint(other.to_string())),
        }
    }

    /// Token form persisted in state and attached to records
    pub fn token(&self) -> String {
        match self.last_modified {
            Some(time) => record_token(self.sync_id, time),
            None => self.sync_id.to_string(),
        }
    }

    /// Whether a file modified at `modified` was already synced
    pub fn covers(&self, modified: DateTime<Utc>) -> bool {
        self.last_modified.map(|bound| modified < bound).unwrap_or(false)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Token attached to every record of a file
pub fn record_token(dump_id: i64, modified: DateTime<Utc>) -> String {
    format!("{},{}", dump_id, format_token_time(modified))
}

/// Render a timestamp the way tokens carry it, e.g. `2024-03-01 10:15:00+00:00`
pub fn format_token_time(time: DateTime<Utc>) -> String {
    time.format(TOKEN_TIME_FORMAT).to_string()
}

fn parse_token_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::<FixedOffset>::parse_from_str(raw, TOKEN_TIME_FORMAT)
        .or_else(|_| DateTime::<FixedOffset>::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%z"))
        .or_else(|_| DateTime::<FixedOffset>::parse_from_rfc3339(raw))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}
