//! Incremental replication engine
//!
//! Provides the pieces of a table sync:
//! - Manifest retrieval and indexing by dump id
//! - Deterministic ordering of a dump's data files
//! - Dump selection against a checkpoint
//! - The per-table executor and its persisted state

mod checkpoint;
mod executor;
mod index;
mod manifest;
mod ordering;
mod planner;
mod state;

pub use checkpoint::*;
pub use executor::*;
pub use index::*;
pub use manifest::*;
pub use ordering::*;
pub use planner::*;
pub use state::*;
