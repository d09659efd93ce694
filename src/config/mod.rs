//! Configuration module for HeapSync
//!
//! Provides configuration management including CLI arguments,
//! the tap config file, and per-stream settings.

mod settings;

pub use settings::*;
