//! Rule and file-metadata caches.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use tokentree_core::path::cache_key;
use tokentree_core::{FileRecord, IgnoreMode};

use crate::resolver::ResolvedRules;

/// Key of a resolved rule set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleCacheKey {
    root: String,
    mode: IgnoreMode,
    custom_hash: String,
}

impl RuleCacheKey {
    /// `custom` must already be normalized (see `normalize_custom_patterns`).
    ///
    /// Custom patterns only take part in global mode.
    pub fn new(root: &Path, mode: IgnoreMode, custom: &[String]) -> Self {
        let custom_hash = match mode {
            IgnoreMode::Global => hash_patterns(custom),
            IgnoreMode::Automatic => String::new(),
        };
        Self {
            root: cache_key(root),
            mode,
            custom_hash,
        }
    }
}

fn hash_patterns(patterns: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for pattern in patterns {
        hasher.update(pattern.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// Entry counts, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub rule_sets: usize,
    pub files: usize,
}

/// Resolved rule sets and per-file records.
///
/// Both maps are plain key/value stores: entries leave only through the
/// explicit invalidation methods.
#[derive(Debug, Default)]
pub struct ScanCache {
    rules: DashMap<RuleCacheKey, Arc<ResolvedRules>>,
    files: DashMap<String, Arc<FileRecord>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self, key: &RuleCacheKey) -> Option<Arc<ResolvedRules>> {
        self.rules.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn insert_rules(&self, key: RuleCacheKey, rules: Arc<ResolvedRules>) {
        self.rules.insert(key, rules);
    }

    pub fn file(&self, path: &Path) -> Option<Arc<FileRecord>> {
        self.files
            .get(&cache_key(path))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Insert or replace the record for its absolute path.
    pub fn insert_file(&self, record: Arc<FileRecord>) {
        self.files.insert(cache_key(&record.absolute_path), record);
    }

    /// Drop the record for exactly `path`.
    pub fn remove_file(&self, path: &Path) -> Option<Arc<FileRecord>> {
        self.files.remove(&cache_key(path)).map(|(_, record)| record)
    }

    /// Drop every record at or below `path`. Returns how many were removed.
    pub fn remove_under(&self, path: &Path) -> usize {
        let key = cache_key(path);
        let prefix = format!("{key}/");
        let before = self.files.len();
        self.files
            .retain(|candidate, _| candidate != &key && !candidate.starts_with(&prefix));
        let removed = before.saturating_sub(self.files.len());
        if removed > 0 {
            debug!(path = %path.display(), removed, "invalidated cached records");
        }
        removed
    }

    pub fn clear_rules(&self) {
        self.rules.clear();
    }

    pub fn clear_files(&self) {
        self.files.clear();
    }

    /// Invalidate both caches.
    pub fn clear(&self) {
        self.clear_rules();
        self.clear_files();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            rule_sets: self.rules.len(),
            files: self.files.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(path: &str) -> Arc<FileRecord> {
        let relative = path.trim_start_matches("/repo/").to_string();
        Arc::new(FileRecord::text(
            PathBuf::from(path),
            relative,
            1,
            "x".to_string(),
            1,
        ))
    }

    #[test]
    fn test_file_roundtrip_and_remove() {
        let cache = ScanCache::new();
        cache.insert_file(record("/repo/a.txt"));

        assert!(cache.file(Path::new("/repo/a.txt")).is_some());
        assert!(cache.file(Path::new("/repo/a.txt/")).is_some());
        assert!(cache.remove_file(Path::new("/repo/a.txt")).is_some());
        assert!(cache.file(Path::new("/repo/a.txt")).is_none());
    }

    #[test]
    fn test_remove_under_prefix_only() {
        let cache = ScanCache::new();
        cache.insert_file(record("/repo/src/a.rs"));
        cache.insert_file(record("/repo/src/deep/b.rs"));
        cache.insert_file(record("/repo/srcfile.rs"));

        assert_eq!(cache.remove_under(Path::new("/repo/src")), 2);
        assert!(cache.file(Path::new("/repo/srcfile.rs")).is_some());
        assert_eq!(cache.stats().files, 1);
    }

    #[test]
    fn test_rule_key_ignores_custom_in_automatic_mode() {
        let root = Path::new("/repo");
        let a = RuleCacheKey::new(root, IgnoreMode::Automatic, &["*.md".to_string()]);
        let b = RuleCacheKey::new(root, IgnoreMode::Automatic, &[]);
        assert_eq!(a, b);

        let c = RuleCacheKey::new(root, IgnoreMode::Global, &["*.md".to_string()]);
        let d = RuleCacheKey::new(root, IgnoreMode::Global, &[]);
        assert_ne!(c, d);
        assert_ne!(a, c);
    }
}
