//! Scan configuration types.

use std::path::Path;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::patterns::{BINARY_EXTENSIONS, DEFAULT_PATTERNS, GLOBAL_PATTERNS};

/// Content larger than this is skipped without being read.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// The three static pattern lists supplied at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSets {
    /// Exclusions applied in every mode.
    #[serde(default = "default_patterns")]
    pub default_patterns: Vec<String>,

    /// Exclusions added in global mode.
    #[serde(default = "global_patterns")]
    pub global_patterns: Vec<String>,

    /// Extensions classified as binary (with or without a leading dot).
    #[serde(default = "binary_extensions")]
    pub binary_extensions: Vec<String>,
}

fn default_patterns() -> Vec<String> {
    DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect()
}

fn global_patterns() -> Vec<String> {
    GLOBAL_PATTERNS.iter().map(|s| s.to_string()).collect()
}

fn binary_extensions() -> Vec<String> {
    BINARY_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

impl Default for PatternSets {
    fn default() -> Self {
        Self {
            default_patterns: default_patterns(),
            global_patterns: global_patterns(),
            binary_extensions: binary_extensions(),
        }
    }
}

impl PatternSets {
    /// Pattern sets with all three lists empty.
    pub fn empty() -> Self {
        Self {
            default_patterns: Vec::new(),
            global_patterns: Vec::new(),
            binary_extensions: Vec::new(),
        }
    }
}

/// Configuration shared by the resolver, scanner and watcher.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Files larger than this many bytes are skipped.
    #[builder(default = "DEFAULT_MAX_FILE_SIZE")]
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Subdirectories walked concurrently per batch (0 = auto).
    #[builder(default = "0")]
    #[serde(default)]
    pub dir_concurrency: usize,

    /// File tasks executed concurrently (0 = auto).
    #[builder(default = "0")]
    #[serde(default)]
    pub file_concurrency: usize,

    /// Pending file tasks buffered before traversal waits.
    #[builder(default = "1024")]
    #[serde(default = "default_file_queue_capacity")]
    pub file_queue_capacity: usize,

    /// Minimum time between progress updates.
    #[builder(default = "200")]
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Quiet period before a changed path is re-read.
    #[builder(default = "500")]
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Upper bound on a single scan before it is cancelled.
    #[builder(default = "300")]
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Name of the per-directory rule file read in automatic mode.
    #[builder(default = "\".gitignore\".to_string()")]
    #[serde(default = "default_rule_file_name")]
    pub rule_file_name: String,

    /// Static pattern lists.
    #[builder(default)]
    #[serde(default)]
    pub patterns: PatternSets,
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_file_queue_capacity() -> usize {
    1024
}

fn default_progress_interval_ms() -> u64 {
    200
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_session_timeout_secs() -> u64 {
    300
}

fn default_rule_file_name() -> String {
    ".gitignore".to_string()
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref name) = self.rule_file_name {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(format!("Invalid rule file name: {name:?}"));
            }
        }
        if self.file_queue_capacity == Some(0) {
            return Err("File queue capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Parse a config from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ScanError> {
        toml::from_str(source).map_err(|e| ScanError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
        Self::from_toml_str(&source)
    }

    /// Effective directory fan-out per batch.
    pub fn effective_dir_concurrency(&self) -> usize {
        match self.dir_concurrency {
            0 => available_cpus() * 2,
            n => n,
        }
    }

    /// Effective number of file workers.
    pub fn effective_file_concurrency(&self) -> usize {
        match self.file_concurrency {
            0 => available_cpus() * 4,
            n => n,
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            dir_concurrency: 0,
            file_concurrency: 0,
            file_queue_capacity: default_file_queue_capacity(),
            progress_interval_ms: default_progress_interval_ms(),
            debounce_ms: default_debounce_ms(),
            session_timeout_secs: default_session_timeout_secs(),
            rule_file_name: default_rule_file_name(),
            patterns: PatternSets::default(),
        }
    }
}

fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
