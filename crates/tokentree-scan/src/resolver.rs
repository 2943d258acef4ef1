//! Ignore-rule resolution for a scan root.
//!
//! Global mode compiles the static lists plus custom patterns. Automatic
//! mode walks the whole tree (in parallel, via jwalk) for rule files,
//! rewrites each file's patterns relative to the root and folds them into a
//! single flat filter, parents before children.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use jwalk::WalkDir;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tokentree_core::path::{dir_key, relative_to_root};
use tokentree_core::{IgnoreMode, ScanConfig, ScanError};

use crate::cache::{RuleCacheKey, ScanCache};
use crate::filter::{IgnoreFilter, parse_rule_file, rewrite_rule_lines};

/// Directory (relative to the root, `"."` for the root) to the raw pattern
/// lines of its rule file. Display only; never used for matching.
pub type RuleOrigin = IndexMap<String, Vec<String>>;

/// A compiled filter together with where its rules came from.
#[derive(Debug, Clone)]
pub struct ResolvedRules {
    /// Canonical scan root.
    pub root: PathBuf,
    pub mode: IgnoreMode,
    /// Normalized custom patterns (global mode only).
    pub custom_patterns: Vec<String>,
    pub filter: IgnoreFilter,
    pub origin: RuleOrigin,
}

/// Builds and caches [`ResolvedRules`].
#[derive(Debug, Clone)]
pub struct IgnoreRuleResolver {
    config: Arc<ScanConfig>,
    cache: Arc<ScanCache>,
}

impl IgnoreRuleResolver {
    pub fn new(config: Arc<ScanConfig>, cache: Arc<ScanCache>) -> Self {
        Self { config, cache }
    }

    /// The default-pattern matcher for `root`.
    pub fn default_filter(&self, root: &Path) -> IgnoreFilter {
        IgnoreFilter::defaults(root, &self.config.patterns)
    }

    /// Global-mode filter. Pure; touches neither the disk nor the cache.
    pub fn global_filter(&self, root: &Path, custom_patterns: &[String]) -> IgnoreFilter {
        IgnoreFilter::global(
            root,
            &self.config.patterns,
            &normalize_custom_patterns(custom_patterns),
        )
    }

    /// Resolve (or fetch from cache) the rules for `root` in `mode`.
    pub async fn resolve(
        &self,
        root: &Path,
        mode: IgnoreMode,
        custom_patterns: &[String],
    ) -> Result<Arc<ResolvedRules>, ScanError> {
        self.resolve_cancellable(root, mode, custom_patterns, &CancellationToken::new())
            .await
    }

    /// Like [`resolve`](Self::resolve), but rule discovery stops once
    /// `cancel` fires. The rules returned then are partial and not cached.
    pub async fn resolve_cancellable(
        &self,
        root: &Path,
        mode: IgnoreMode,
        custom_patterns: &[String],
        cancel: &CancellationToken,
    ) -> Result<Arc<ResolvedRules>, ScanError> {
        let root = canonical_root(root).await?;
        let custom = normalize_custom_patterns(custom_patterns);
        let key = RuleCacheKey::new(&root, mode, &custom);

        if let Some(hit) = self.cache.rules(&key) {
            debug!(root = %root.display(), %mode, "rule cache hit");
            return Ok(hit);
        }

        let resolved = match mode {
            IgnoreMode::Global => ResolvedRules {
                filter: IgnoreFilter::global(&root, &self.config.patterns, &custom),
                root,
                mode,
                custom_patterns: custom,
                origin: RuleOrigin::new(),
            },
            IgnoreMode::Automatic => {
                let defaults = self.default_filter(&root);
                let rule_file_name = self.config.rule_file_name.clone();
                let walk_root = root.clone();
                let walk_cancel = cancel.clone();
                let discovered = tokio::task::spawn_blocking(move || {
                    discover_rule_files(&walk_root, &defaults, &rule_file_name, &walk_cancel)
                })
                .await
                .map_err(|e| ScanError::Other {
                    message: format!("Rule discovery task failed: {e}"),
                })?;

                self.build_automatic(root, discovered)
            }
        };

        info!(
            root = %resolved.root.display(),
            mode = %resolved.mode,
            patterns = resolved.filter.len(),
            rule_files = resolved.origin.len(),
            "resolved ignore rules"
        );

        let resolved = Arc::new(resolved);
        if cancel.is_cancelled() {
            debug!(root = %resolved.root.display(), "rule discovery cancelled; not caching");
        } else {
            self.cache.insert_rules(key, Arc::clone(&resolved));
        }
        Ok(resolved)
    }

    /// Rule origin of a previously resolved root, if it is cached.
    pub fn rule_origin(
        &self,
        root: &Path,
        mode: IgnoreMode,
        custom_patterns: &[String],
    ) -> Option<RuleOrigin> {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let key = RuleCacheKey::new(&root, mode, &normalize_custom_patterns(custom_patterns));
        self.cache.rules(&key).map(|rules| rules.origin.clone())
    }

    fn build_automatic(&self, root: PathBuf, discovered: Vec<(String, Vec<String>)>) -> ResolvedRules {
        let mut patterns = self.config.patterns.default_patterns.clone();
        let mut origin = RuleOrigin::new();
        for (dir, lines) in discovered {
            patterns.extend(rewrite_rule_lines(&dir, &lines));
            origin.insert(dir, lines);
        }

        let filter = IgnoreFilter::new(&root, patterns).with_origins(origin.keys().cloned());
        ResolvedRules {
            root,
            mode: IgnoreMode::Automatic,
            custom_patterns: Vec::new(),
            filter,
            origin,
        }
    }
}

/// Trim, drop blanks and comments, deduplicate and sort, then move every
/// `!` negation after the exclusions so it can re-include what they match.
///
/// The result depends only on the set of patterns, not on caller order.
pub fn normalize_custom_patterns(patterns: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && !p.starts_with('#'))
        .map(str::to_string)
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized.sort_by_key(|p| p.starts_with('!'));
    normalized
}

async fn canonical_root(root: &Path) -> Result<PathBuf, ScanError> {
    let canonical = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| ScanError::io(root, e))?;
    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(|e| ScanError::io(&canonical, e))?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory { path: canonical });
    }
    Ok(canonical)
}

/// Find and parse every rule file under `root`, shallowest first.
///
/// Unreadable directories and rule files are logged and skipped. Stops
/// descending once `cancel` fires.
fn discover_rule_files(
    root: &Path,
    defaults: &IgnoreFilter,
    rule_file_name: &str,
    cancel: &CancellationToken,
) -> Vec<(String, Vec<String>)> {
    let prune_root = root.to_path_buf();
    let prune = defaults.clone();
    let prune_cancel = cancel.clone();

    let walker = WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .process_read_dir(move |_depth, _dir, _state, children| {
            if prune_cancel.is_cancelled() {
                children.clear();
                return;
            }
            children.retain(|child| match child {
                Ok(entry) if entry.file_type().is_dir() => {
                    match relative_to_root(&prune_root, &entry.path()) {
                        Ok(relative) => !prune.is_ignored(&relative, true),
                        Err(_) => true,
                    }
                }
                _ => true,
            });
        });

    let mut rule_paths: Vec<(String, PathBuf)> = Vec::new();
    for entry in walker {
        if cancel.is_cancelled() {
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory during rule discovery");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != rule_file_name {
            continue;
        }
        let path = entry.path();
        let dir = path
            .parent()
            .and_then(|parent| relative_to_root(root, parent).ok())
            .unwrap_or_default();
        rule_paths.push((dir_key(&dir), path));
    }

    rule_paths.sort_by(|(a, _), (b, _)| depth_of(a).cmp(&depth_of(b)).then_with(|| a.cmp(b)));

    rule_paths
        .par_iter()
        .filter_map(|(dir, path)| match std::fs::read_to_string(path) {
            Ok(content) => Some((dir.clone(), parse_rule_file(&content))),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read rule file");
                None
            }
        })
        .collect()
}

fn depth_of(dir_key: &str) -> usize {
    if dir_key == "." {
        0
    } else {
        dir_key.split('/').count()
    }
}
