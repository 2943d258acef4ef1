//! Ignore-rule resolution and concurrent directory scanning for tokentree.
//!
//! # Overview
//!
//! `tokentree-scan` turns a directory into a set of [`FileRecord`]s. Key
//! pieces:
//!
//! - **[`IgnoreRuleResolver`]** builds an [`IgnoreFilter`] for a root, either
//!   from the static pattern lists (global mode) or from every rule file
//!   under the root (automatic mode, discovered in parallel via jwalk/rayon)
//! - **[`DirectoryScanner`]** walks the tree with bounded directory fan-out
//!   and a fixed pool of file workers, honoring a cancellation token
//! - **[`ScanCache`]** keeps resolved rules and file records between scans
//! - **Progress updates** via broadcast channels
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use tokentree_scan::{
//!     DirectoryScanner, EstimateTokenCounter, IgnoreMode, IgnoreRuleResolver, ScanCache,
//!     ScanConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), tokentree_scan::ScanError> {
//! let config = Arc::new(ScanConfig::default());
//! let cache = Arc::new(ScanCache::new());
//! let resolver = IgnoreRuleResolver::new(config.clone(), cache.clone());
//! let scanner = DirectoryScanner::new(config, cache, Arc::new(EstimateTokenCounter));
//!
//! let rules = resolver.resolve(Path::new("."), IgnoreMode::Automatic, &[]).await?;
//! let report = scanner
//!     .scan(&rules.root, &rules.filter, rules.mode, &CancellationToken::new())
//!     .await?;
//!
//! println!("{} files, {} tokens", report.records.len(), report.total_tokens());
//! # Ok(())
//! # }
//! ```
//!
//! # Progress Monitoring
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use tokentree_scan::{DirectoryScanner, EstimateTokenCounter, ScanCache, ScanConfig};
//! # let scanner = DirectoryScanner::new(
//! #     Arc::new(ScanConfig::default()),
//! #     Arc::new(ScanCache::new()),
//! #     Arc::new(EstimateTokenCounter),
//! # );
//! let mut progress_rx = scanner.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(progress) = progress_rx.recv().await {
//!         println!("Processed {} files", progress.files_processed);
//!     }
//! });
//! ```

mod cache;
mod file;
mod filter;
mod progress;
mod resolver;
mod scanner;

pub use cache::{CacheStats, RuleCacheKey, ScanCache};
pub use file::{BinaryClassifier, FileProcessor};
pub use filter::{IgnoreFilter, parse_rule_file, rewrite_pattern, rewrite_rule_lines};
pub use progress::ScanProgress;
pub use resolver::{IgnoreRuleResolver, ResolvedRules, RuleOrigin, normalize_custom_patterns};
pub use scanner::{DirectoryScanner, ScanReport};

// Re-export core types for convenience
pub use tokentree_core::{
    EstimateTokenCounter, FileError, FileRecord, IgnoreMode, PatternSets, ScanConfig, ScanError,
    TokenCounter,
};
