//! Core types and traits for tokentree.
//!
//! This crate provides the data structures shared by the scanner, the
//! watcher and the session layer: file records, ignore modes, configuration,
//! the error taxonomy and the token-counting seam.

mod config;
mod error;
pub mod path;
pub mod patterns;
mod record;
mod tokens;

pub use config::{DEFAULT_MAX_FILE_SIZE, PatternSets, ScanConfig, ScanConfigBuilder};
pub use error::{FileError, PathValidationError, ScanError};
pub use record::{FileRecord, IgnoreMode};
pub use tokens::{EstimateTokenCounter, TokenCounter};
