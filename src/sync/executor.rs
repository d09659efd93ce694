//! Per-table sync state machine
//!
//! One executor owns one table's checkpoint for the duration of a run. For
//! every planned dump it orders the files, skips the ones the starting
//! checkpoint already covers, downloads the rest into a scratch file,
//! decodes and emits their rows, and finally advances the checkpoint.
//!
//! The checkpoint only moves forward after a dump's last file has been
//! emitted; a failure part-way leaves the previous checkpoint in force and
//! the next run revisits the dump, skipping by modification time.

use super::checkpoint::{record_token, Checkpoint};
use super::index::ManifestIndex;
use super::ordering::FileOrderer;
use super::planner::{PlannedDump, SyncPlanner};
use crate::catalog::{SchemaDescriptor, SYNC_ID_COLUMN};
use crate::config::{ReplicationMethod, StreamConfig};
use crate::decode::RecordDecoder;
use crate::error::{HeapSyncError, IoResultExt, Result};
use crate::output::RecordSink;
use crate::storage::BlobStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::{BufReader, BufWriter, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of syncing one table
#[derive(Debug, Clone)]
pub struct SyncSummary {
    /// Table that was synced
    pub table: String,
    /// Dumps whose files were all handled
    pub dumps_processed: u64,
    /// Files downloaded and emitted
    pub files_synced: u64,
    /// Files skipped because an earlier run already emitted them
    pub files_skipped: u64,
    /// Records handed to the sink
    pub records_emitted: u64,
    /// Bytes downloaded
    pub bytes_downloaded: u64,
    /// Wall-clock time of the run
    pub elapsed: Duration,
    /// Checkpoint after the run
    pub checkpoint: Checkpoint,
}

impl SyncSummary {
    fn new(table: &str, checkpoint: Checkpoint) -> Self {
        Self {
            table: table.to_string(),
            dumps_processed: 0,
            files_synced: 0,
            files_skipped: 0,
            records_emitted: 0,
            bytes_downloaded: 0,
            elapsed: Duration::ZERO,
            checkpoint,
        }
    }

    /// Log the summary
    pub fn log(&self) {
        tracing::info!(
            table = %self.table,
            dumps = self.dumps_processed,
            files = self.files_synced,
            skipped = self.files_skipped,
            records = self.records_emitted,
            downloaded = %humansize::format_size(self.bytes_downloaded, humansize::BINARY),
            elapsed = %humantime::format_duration(round_to_millis(self.elapsed)),
            checkpoint = %self.checkpoint,
            "Stream synced"
        );
    }
}

fn round_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// Replicates one table from its planned dumps into a sink
pub struct SyncExecutor<'a> {
    store: &'a dyn BlobStore,
    decoder: &'a dyn RecordDecoder,
    stream: StreamConfig,
    schema: Arc<SchemaDescriptor>,
    orderer: FileOrderer,
    checkpoint: Checkpoint,
    resume_from: Checkpoint,
    span: tracing::Span,
}

impl<'a> SyncExecutor<'a> {
    /// Create an executor starting from `prior`.
    ///
    /// Fails without touching storage when records would carry no sync id
    /// but the run depends on one, i.e. incremental replication or a resumed
    /// checkpoint with `additional_info` turned off.
    pub fn new(
        store: &'a dyn BlobStore,
        decoder: &'a dyn RecordDecoder,
        stream: StreamConfig,
        schema: Arc<SchemaDescriptor>,
        prior: Option<Checkpoint>,
    ) -> Result<Self> {
        if !stream.additional_info
            && (stream.replication_method == ReplicationMethod::Incremental || prior.is_some())
        {
            return Err(HeapSyncError::config(format!(
                "table '{}': {} replication requires additional_info to track {}",
                stream.table,
                stream.replication_method.as_str(),
                SYNC_ID_COLUMN
            )));
        }

        let checkpoint = match stream.replication_method {
            ReplicationMethod::FullTable => Checkpoint::start(),
            ReplicationMethod::Incremental => prior.unwrap_or_default(),
        };

        let span = tracing::info_span!(
            "stream",
            table = %stream.table,
            method = stream.replication_method.as_str()
        );
        Ok(Self {
            store,
            decoder,
            orderer: FileOrderer::new(&stream.bucket),
            resume_from: checkpoint,
            checkpoint,
            schema,
            stream,
            span,
        })
    }

    /// Current checkpoint
    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    /// Table being synced
    pub fn table(&self) -> &str {
        &self.stream.table
    }

    /// Sync every planned dump, persisting the checkpoint after each
    pub fn run(&mut self, index: &ManifestIndex, sink: &mut dyn RecordSink) -> Result<SyncSummary> {
        let span = self.span.clone();
        let _enter = span.enter();
        let start = Instant::now();

        std::fs::create_dir_all(&self.stream.temp_dir).with_path(&self.stream.temp_dir)?;

        let plan = SyncPlanner::plan(
            index,
            &self.stream.table,
            &self.checkpoint,
            self.stream.replication_method,
        );
        tracing::info!(
            dumps = plan.dumps.len(),
            files = plan.file_count(),
            checkpoint = %self.checkpoint,
            "Starting sync"
        );

        sink.begin_stream(&self.schema)?;

        let mut summary = SyncSummary::new(&self.stream.table, self.checkpoint);
        for dump in &plan.dumps {
            self.sync_dump(dump, sink, &mut summary)
                .map_err(|e| e.with_context(format!("sync of dump {} failed", dump.dump_id)))?;
        }

        summary.checkpoint = self.checkpoint;
        summary.elapsed = start.elapsed();
        Ok(summary)
    }

    fn sync_dump(
        &mut self,
        dump: &PlannedDump,
        sink: &mut dyn RecordSink,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let keys = self.orderer.order(&dump.files)?;
        if keys.is_empty() {
            tracing::debug!(dump_id = dump.dump_id, "Dump lists no files");
            return Ok(());
        }

        let mut last_modified = None;
        for key in &keys {
            let modified = self.store.head(key)?;
            last_modified = Some(modified);

            if self.is_already_synced(modified) {
                tracing::debug!(key = %key, %modified, "Skipping file synced by an earlier run");
                summary.files_skipped += 1;
                continue;
            }

            let token = record_token(dump.dump_id, modified);
            let (records, bytes) = self.sync_file(key, &token, sink)?;
            tracing::debug!(key = %key, records, bytes, "File synced");
            summary.files_synced += 1;
            summary.records_emitted += records;
            summary.bytes_downloaded += bytes;
        }

        let next = Checkpoint::new(dump.dump_id, last_modified);
        if next.sync_id >= self.checkpoint.sync_id {
            self.checkpoint = next;
        }
        sink.persist_checkpoint(&self.stream.table, &self.checkpoint.token())?;
        summary.dumps_processed += 1;

        tracing::info!(dump_id = dump.dump_id, checkpoint = %self.checkpoint, "Dump complete");
        Ok(())
    }

    fn is_already_synced(&self, modified: DateTime<Utc>) -> bool {
        self.stream.replication_method == ReplicationMethod::Incremental
            && self.resume_from.covers(modified)
    }

    /// Download, decode and emit one file. The scratch file is removed on
    /// every exit path.
    fn sync_file(&self, key: &str, token: &str, sink: &mut dyn RecordSink) -> Result<(u64, u64)> {
        let mut scratch = tempfile::Builder::new()
            .prefix("heapsync-")
            .tempfile_in(&self.stream.temp_dir)
            .with_path(&self.stream.temp_dir)?;

        let bytes = {
            let mut writer = BufWriter::new(scratch.as_file_mut());
            let bytes = self.store.download(key, &mut writer)?;
            writer.flush().with_path(&self.stream.temp_dir)?;
            bytes
        };

        let file = scratch.reopen().with_path(scratch.path())?;
        let rows = self.decoder.decode(key, Box::new(BufReader::new(file)))?;

        let mut records = 0;
        for row in rows {
            let mut row = row?;
            if self.stream.additional_info {
                row.insert(SYNC_ID_COLUMN.to_string(), Value::String(token.to_string()));
            }
            sink.emit(&self.stream.table, row)?;
            records += 1;
        }

        let path = scratch.path().to_path_buf();
        scratch.close().with_path(path)?;
        Ok((records, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{JsonLinesDecoder, Row};
    use crate::storage::LocalBlobStore;
    use crate::sync::manifest::{Manifest, TableManifest};
    use filetime::FileTime;
    use std::path::Path;
    use tempfile::TempDir;

    const BUCKET: &str = "heap-export";

    #[derive(Default)]
    struct CollectingSink {
        schemas: Vec<String>,
        rows: Vec<Row>,
        checkpoints: Vec<String>,
        fail_on_row: Option<usize>,
    }

    impl RecordSink for CollectingSink {
        fn begin_stream(&mut self, schema: &SchemaDescriptor) -> Result<()> {
            self.schemas.push(schema.table.clone());
            Ok(())
        }

        fn emit(&mut self, _table: &str, row: Row) -> Result<()> {
            if self.fail_on_row == Some(self.rows.len()) {
                return Err(HeapSyncError::Sink("target rejected record".into()));
            }
            self.rows.push(row);
            Ok(())
        }

        fn persist_checkpoint(&mut self, _table: &str, token: &str) -> Result<()> {
            self.checkpoints.push(token.to_string());
            Ok(())
        }
    }

    struct Fixture {
        bucket: TempDir,
        scratch: TempDir,
        files: Vec<(i64, String)>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                bucket: TempDir::new().unwrap(),
                scratch: TempDir::new().unwrap(),
                files: Vec::new(),
            }
        }

        /// Write a data file with rows `{"event_id": n}` and pin its mtime
        fn file(&mut self, dump_id: i64, part: u32, event_ids: &[i64], mtime: i64) -> &mut Self {
            let key = format!("sync_{}/pageviews/part-{:05}-abc.jsonl", dump_id, part);
            let path = self.bucket.path().join(&key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            let body: String = event_ids
                .iter()
                .map(|id| format!("{{\"event_id\": {}}}\n", id))
                .collect();
            std::fs::write(&path, body).unwrap();
            filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
            self.files.push((dump_id, key));
            self
        }

        fn raw_file(&mut self, dump_id: i64, key: &str, body: &str) -> &mut Self {
            let path = self.bucket.path().join(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
            self.files.push((dump_id, key.to_string()));
            self
        }

        fn index(&self) -> ManifestIndex {
            let mut manifests: Vec<Manifest> = Vec::new();
            for (dump_id, key) in &self.files {
                if manifests.last().map(|m| m.dump_id) != Some(*dump_id) {
                    manifests.push(Manifest {
                        dump_id: *dump_id,
                        tables: [(
                            "pageviews".to_string(),
                            TableManifest {
                                name: "pageviews".to_string(),
                                columns: Default::default(),
                                files: Vec::new(),
                                incremental: Some(true),
                            },
                        )]
                        .into_iter()
                        .collect(),
                    });
                }
                let table = manifests.last_mut().unwrap().tables.get_mut("pageviews").unwrap();
                // Manifests list files in no particular order
                table.files.insert(0, format!("s3://{}/{}", BUCKET, key));
            }
            ManifestIndex::from_manifests(manifests)
        }

        fn store(&self) -> LocalBlobStore {
            LocalBlobStore::new(BUCKET, self.bucket.path())
        }

        fn stream(&self, method: ReplicationMethod, additional_info: bool) -> StreamConfig {
            StreamConfig {
                table: "pageviews".to_string(),
                bucket: BUCKET.to_string(),
                replication_method: method,
                additional_info,
                temp_dir: self.scratch.path().to_path_buf(),
            }
        }
    }

    fn schema(additional_info: bool) -> Arc<SchemaDescriptor> {
        Arc::new(SchemaDescriptor::new(
            "pageviews",
            ["event_id".to_string()].into_iter().collect(),
            additional_info,
        ))
    }

    fn event_ids(sink: &CollectingSink) -> Vec<i64> {
        sink.rows
            .iter()
            .map(|r| r["event_id"].as_i64().unwrap())
            .collect()
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    fn run(
        fixture: &Fixture,
        method: ReplicationMethod,
        prior: Option<Checkpoint>,
        sink: &mut CollectingSink,
    ) -> Result<SyncSummary> {
        let store = fixture.store();
        let decoder = JsonLinesDecoder;
        let mut executor =
            SyncExecutor::new(&store, &decoder, fixture.stream(method, true), schema(true), prior)?;
        executor.run(&fixture.index(), sink)
    }

    #[test]
    fn test_first_run_emits_in_dump_and_part_order() {
        let mut fixture = Fixture::new();
        fixture
            .file(1, 1, &[3, 4], 1_000)
            .file(1, 0, &[1, 2], 1_010)
            .file(2, 0, &[5], 2_000);

        let mut sink = CollectingSink::default();
        let summary = run(&fixture, ReplicationMethod::Incremental, None, &mut sink).unwrap();

        assert_eq!(event_ids(&sink), vec![1, 2, 3, 4, 5]);
        assert_eq!(sink.schemas, vec!["pageviews"]);
        assert_eq!(summary.dumps_processed, 2);
        assert_eq!(summary.files_synced, 3);
        assert_eq!(summary.records_emitted, 5);
        assert_eq!(summary.checkpoint.sync_id, 2);
        assert!(is_empty_dir(fixture.scratch.path()));
    }

    #[test]
    fn test_checkpoint_advances_after_each_dump() {
        let mut fixture = Fixture::new();
        fixture
            .file(1, 0, &[1], 1_000)
            .file(1, 1, &[2], 1_050)
            .file(2, 0, &[3], 2_000);

        let mut sink = CollectingSink::default();
        run(&fixture, ReplicationMethod::Incremental, None, &mut sink).unwrap();

        let checkpoints: Vec<Checkpoint> = sink
            .checkpoints
            .iter()
            .map(|t| Checkpoint::parse(t).unwrap())
            .collect();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].sync_id, 1);
        assert_eq!(
            checkpoints[0].last_modified.unwrap().timestamp(),
            1_050,
            "checkpoint records the last file of the dump"
        );
        assert_eq!(checkpoints[1].sync_id, 2);
        assert!(checkpoints.windows(2).all(|w| w[0].sync_id <= w[1].sync_id));
    }

    #[test]
    fn test_records_carry_sync_id_token() {
        let mut fixture = Fixture::new();
        fixture.file(7, 0, &[1], 1_700_000_000);

        let mut sink = CollectingSink::default();
        run(&fixture, ReplicationMethod::Incremental, None, &mut sink).unwrap();

        assert_eq!(
            sink.rows[0][SYNC_ID_COLUMN],
            Value::String("7,2023-11-14 22:13:20+00:00".to_string())
        );
        assert_eq!(sink.checkpoints, vec!["7,2023-11-14 22:13:20+00:00"]);
    }

    #[test]
    fn test_resume_skips_files_older_than_checkpoint() {
        let mut fixture = Fixture::new();
        fixture
            .file(5, 0, &[1], 1_000)
            .file(5, 1, &[2], 1_100)
            .file(5, 2, &[3], 1_200)
            .file(6, 0, &[4], 2_000);

        let prior = Checkpoint::new(5, Some(DateTime::from_timestamp(1_100, 0).unwrap()));
        let mut sink = CollectingSink::default();
        let summary = run(&fixture, ReplicationMethod::Incremental, Some(prior), &mut sink).unwrap();

        // part 1 sits exactly on the bound and is emitted again
        assert_eq!(event_ids(&sink), vec![2, 3, 4]);
        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.checkpoint.sync_id, 6);
    }

    #[test]
    fn test_dumps_before_checkpoint_are_not_revisited() {
        let mut fixture = Fixture::new();
        fixture.file(1, 0, &[1], 1_000).file(2, 0, &[2], 2_000);

        let mut sink = CollectingSink::default();
        run(
            &fixture,
            ReplicationMethod::Incremental,
            Some(Checkpoint::new(2, None)),
            &mut sink,
        )
        .unwrap();

        assert_eq!(event_ids(&sink), vec![2]);
    }

    #[test]
    fn test_full_table_ignores_prior_checkpoint() {
        let mut fixture = Fixture::new();
        fixture
            .file(1, 0, &[1], 1_000)
            .file(3, 0, &[7], 3_000)
            .file(3, 1, &[8], 3_100);

        let prior = Checkpoint::new(9, Some(DateTime::from_timestamp(9_000, 0).unwrap()));
        let mut sink = CollectingSink::default();
        let summary = run(&fixture, ReplicationMethod::FullTable, Some(prior), &mut sink).unwrap();

        assert_eq!(event_ids(&sink), vec![7, 8]);
        assert_eq!(summary.checkpoint.sync_id, 3);
    }

    #[test]
    fn test_missing_additional_info_fails_before_io() {
        let fixture = Fixture::new();
        let missing = LocalBlobStore::new(BUCKET, fixture.bucket.path().join("absent"));
        let decoder = JsonLinesDecoder;

        let incremental = SyncExecutor::new(
            &missing,
            &decoder,
            fixture.stream(ReplicationMethod::Incremental, false),
            schema(false),
            None,
        );
        assert!(matches!(incremental, Err(HeapSyncError::ConfigError(_))));

        let resumed_full = SyncExecutor::new(
            &missing,
            &decoder,
            fixture.stream(ReplicationMethod::FullTable, false),
            schema(false),
            Some(Checkpoint::new(3, None)),
        );
        assert!(matches!(resumed_full, Err(HeapSyncError::ConfigError(_))));
    }

    #[test]
    fn test_full_table_without_additional_info_omits_token() {
        let mut fixture = Fixture::new();
        fixture.file(1, 0, &[1], 1_000);

        let store = fixture.store();
        let decoder = JsonLinesDecoder;
        let mut executor = SyncExecutor::new(
            &store,
            &decoder,
            fixture.stream(ReplicationMethod::FullTable, false),
            schema(false),
            None,
        )
        .unwrap();

        let mut sink = CollectingSink::default();
        executor.run(&fixture.index(), &mut sink).unwrap();
        assert_eq!(sink.rows.len(), 1);
        assert!(sink.rows[0].get(SYNC_ID_COLUMN).is_none());
    }

    #[test]
    fn test_decode_failure_keeps_checkpoint_and_cleans_scratch() {
        let mut fixture = Fixture::new();
        fixture
            .file(1, 0, &[1], 1_000)
            .raw_file(2, "sync_2/pageviews/part-00000-bad.jsonl", "{\"event_id\": ");

        let mut sink = CollectingSink::default();
        let err = run(&fixture, ReplicationMethod::Incremental, None, &mut sink).unwrap_err();

        assert!(err.to_string().contains("dump 2"));
        assert_eq!(sink.checkpoints.len(), 1);
        assert!(sink.checkpoints[0].starts_with("1,"));
        assert!(is_empty_dir(fixture.scratch.path()));
    }

    #[test]
    fn test_sink_failure_does_not_advance_checkpoint() {
        let mut fixture = Fixture::new();
        fixture.file(1, 0, &[1, 2, 3], 1_000);

        let mut sink = CollectingSink {
            fail_on_row: Some(1),
            ..Default::default()
        };
        assert!(run(&fixture, ReplicationMethod::Incremental, None, &mut sink).is_err());
        assert!(sink.checkpoints.is_empty());
        assert!(is_empty_dir(fixture.scratch.path()));
    }

    #[test]
    fn test_malformed_file_name_is_fatal() {
        let mut fixture = Fixture::new();
        fixture.raw_file(1, "pageviews/part-00000-a.jsonl", "{}\n");

        let mut sink = CollectingSink::default();
        let err = run(&fixture, ReplicationMethod::Incremental, None, &mut sink).unwrap_err();
        assert!(matches!(
            err,
            HeapSyncError::WithContext { ref source, .. }
                if matches!(**source, HeapSyncError::MalformedFileName(_))
        ));
        assert!(sink.rows.is_empty());
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let mut fixture = Fixture::new();
        fixture.file(1, 0, &[1], 1_000);
        std::fs::remove_file(fixture.bucket.path().join(&fixture.files[0].1)).unwrap();

        let mut sink = CollectingSink::default();
        let err = run(&fixture, ReplicationMethod::Incremental, None, &mut sink).unwrap_err();
        assert!(matches!(
            err,
            HeapSyncError::WithContext { ref source, .. }
                if matches!(**source, HeapSyncError::NotFound(_))
        ));
    }

    #[test]
    fn test_table_without_dumps_emits_nothing() {
        let fixture = Fixture::new();
        let mut sink = CollectingSink::default();
        let summary = run(&fixture, ReplicationMethod::Incremental, None, &mut sink).unwrap();

        assert_eq!(summary.dumps_processed, 0);
        assert!(sink.rows.is_empty());
        assert!(sink.checkpoints.is_empty());
        assert_eq!(summary.checkpoint, Checkpoint::start());
    }
}
