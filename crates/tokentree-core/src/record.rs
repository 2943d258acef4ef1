//! Per-file scan results and ignore modes.

use std::path::PathBuf;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::FileError;

/// How ignore rules are resolved for a scan.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum IgnoreMode {
    /// Default patterns plus every rule file found under the root.
    #[default]
    Automatic,
    /// Default and global patterns plus caller-supplied custom patterns.
    Global,
}

/// The canonical per-file result unit.
///
/// Records are immutable once built; a re-read produces a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path on disk.
    pub absolute_path: PathBuf,

    /// Path relative to the scan root, `/`-separated.
    pub relative_path: String,

    /// File name (not full path).
    pub name: CompactString,

    /// Size in bytes as reported by the filesystem.
    pub size_bytes: u64,

    /// Content was not read because the file is binary.
    pub is_binary: bool,

    /// Content was not read because of a policy skip or an error.
    pub is_skipped: bool,

    /// Kept in results but matches a pattern hosts should not preselect.
    pub is_excluded_by_default: bool,

    /// Full UTF-8 content, empty for binary and skipped files.
    pub content: String,

    /// Token count of `content`.
    pub token_count: usize,

    /// Why the file was skipped, if it was.
    pub error: Option<String>,
}

impl FileRecord {
    /// A fully read text file.
    pub fn text(
        absolute_path: PathBuf,
        relative_path: String,
        size_bytes: u64,
        content: String,
        token_count: usize,
    ) -> Self {
        Self {
            name: file_name_of(&relative_path),
            absolute_path,
            relative_path,
            size_bytes,
            is_binary: false,
            is_skipped: false,
            is_excluded_by_default: false,
            content,
            token_count,
            error: None,
        }
    }

    /// A binary file; only its size is known.
    pub fn binary(absolute_path: PathBuf, relative_path: String, size_bytes: u64) -> Self {
        Self {
            name: file_name_of(&relative_path),
            absolute_path,
            relative_path,
            size_bytes,
            is_binary: true,
            is_skipped: false,
            is_excluded_by_default: false,
            content: String::new(),
            token_count: 0,
            error: None,
        }
    }

    /// A file that could not or should not be read.
    pub fn skipped(
        absolute_path: PathBuf,
        relative_path: String,
        size_bytes: u64,
        error: &FileError,
    ) -> Self {
        Self {
            name: file_name_of(&relative_path),
            absolute_path,
            relative_path,
            size_bytes,
            is_binary: false,
            is_skipped: true,
            is_excluded_by_default: false,
            content: String::new(),
            token_count: 0,
            error: Some(error.to_string()),
        }
    }

    /// Set the excluded-by-default flag.
    pub fn excluded_by_default(mut self, excluded: bool) -> Self {
        self.is_excluded_by_default = excluded;
        self
    }

    /// Whether this record contributes tokens.
    pub fn has_content(&self) -> bool {
        !self.is_binary && !self.is_skipped
    }
}

fn file_name_of(relative_path: &str) -> CompactString {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    CompactString::new(name)
}
