//! # HeapSync - Incremental Replication of Heap Connect Dumps
//!
//! HeapSync replicates the periodic dumps a Heap Connect export writes to an
//! object store. Every dump publishes a manifest listing, per table, the
//! data files it produced; HeapSync indexes those manifests, works out which
//! dumps and files a table still needs, and emits their rows in a stable
//! order together with a resumable checkpoint.
//!
//! ## Features
//!
//! - **Manifest Indexing**: All dumps indexed by id, metadata tables excluded
//! - **Deterministic Ordering**: Files emitted by `(dump_id, part_number)`
//! - **Resumable Checkpoints**: `"<dump_id>,<last_modified>"` tokens per table
//! - **Incremental and Full-Table Replication**
//! - **Singer Output**: SCHEMA, RECORD and STATE messages on stdout
//! - **Pluggable Storage**: Local directories or S3 (`native_s3` feature)
//!
//! ## Quick Start
//!
//! ```no_run
//! use heapsync::config::TapConfig;
//! use heapsync::output::SingerWriter;
//! use heapsync::sync::StateDocument;
//! use heapsync::tap::{StreamSelection, Tap};
//! use std::path::Path;
//!
//! let config = TapConfig::load(Path::new("config.json")).unwrap();
//! let tap = Tap::new(config).unwrap();
//!
//! let state = StateDocument::default();
//! let mut writer = SingerWriter::new(std::io::stdout(), state.clone());
//! for summary in tap.sync(&StreamSelection::default(), &state, &mut writer).unwrap() {
//!     summary.log();
//! }
//! ```
//!
//! ## Planning Without I/O
//!
//! ```
//! use heapsync::config::ReplicationMethod;
//! use heapsync::sync::{Checkpoint, FileOrderer, Manifest, ManifestIndex, SyncPlanner};
//!
//! let manifest = Manifest::from_slice(
//!     "manifests/sync_852.json",
//!     br#"{"dump_id": 852, "tables": [{"name": "sessions", "columns": ["event_id"],
//!          "files": ["s3://heap/sync_852/sessions/part-00001-x.avro",
//!                    "s3://heap/sync_852/sessions/part-00000-x.avro"]}]}"#,
//! )
//! .unwrap();
//! let index = ManifestIndex::from_manifests(vec![manifest]);
//!
//! let plan = SyncPlanner::plan(&index, "sessions", &Checkpoint::start(), ReplicationMethod::Incremental);
//! assert_eq!(plan.dump_ids(), vec![852]);
//!
//! let files = FileOrderer::new("heap").order(&plan.dumps[0].files).unwrap();
//! assert_eq!(files[0], "sync_852/sessions/part-00000-x.avro");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod decode;
pub mod error;
pub mod output;
pub mod storage;
pub mod sync;
pub mod tap;

// Re-export commonly used types
pub use config::{ReplicationMethod, TapConfig};
pub use error::{HeapSyncError, Result};
pub use sync::{Checkpoint, SyncExecutor, SyncSummary};
pub use tap::Tap;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use heapsync::prelude::*;
    //! ```

    pub use crate::catalog::{discover, Catalog, SchemaDescriptor};
    pub use crate::config::{FileFormat, ReplicationMethod, StreamConfig, TapConfig};
    pub use crate::decode::{decoder_for, RecordDecoder, Row};
    pub use crate::error::{HeapSyncError, Result};
    pub use crate::output::{RecordSink, SingerWriter};
    pub use crate::storage::{BlobStore, LocalBlobStore};
    pub use crate::sync::{
        Checkpoint, FileOrderer, ManifestIndex, ManifestRepository, StateDocument, SyncExecutor,
        SyncPlanner, SyncSummary,
    };
    pub use crate::tap::{StreamSelection, Tap};
}
