//! Output sinks
//!
//! The executor hands every decoded row and every checkpoint advance to a
//! [`RecordSink`]. Checkpoint tokens are opaque to the sink.

mod singer;

pub use singer::*;

use crate::catalog::SchemaDescriptor;
use crate::decode::Row;
use crate::error::Result;

/// Destination of records and checkpoints
pub trait RecordSink {
    /// Called once before the first record of a stream
    fn begin_stream(&mut self, _schema: &SchemaDescriptor) -> Result<()> {
        Ok(())
    }

    /// Write one record
    fn emit(&mut self, table: &str, row: Row) -> Result<()>;

    /// Durably record a checkpoint token for `table`
    fn persist_checkpoint(&mut self, table: &str, token: &str) -> Result<()>;
}
