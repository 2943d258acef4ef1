//! The single-file read-and-classify step shared by the scanner and watcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tokentree_core::path::relative_to_root;
use tokentree_core::{FileError, FileRecord, IgnoreMode, PatternSets, ScanConfig, TokenCounter};

use crate::cache::ScanCache;
use crate::filter::IgnoreFilter;

/// Classifies files as binary by extension, case-insensitively.
#[derive(Debug, Clone)]
pub struct BinaryClassifier {
    set: GlobSet,
}

impl BinaryClassifier {
    /// Extensions may be given with or without a leading dot.
    pub fn new(extensions: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        for ext in extensions {
            let ext = ext.trim().trim_start_matches('.');
            if ext.is_empty() {
                continue;
            }
            match GlobBuilder::new(&format!("*.{ext}"))
                .case_insensitive(true)
                .literal_separator(false)
                .build()
            {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(err) => warn!(extension = %ext, error = %err, "skipping invalid binary extension"),
            }
        }
        let set = builder.build().unwrap_or_else(|err| {
            warn!(error = %err, "failed to compile binary extensions");
            GlobSet::empty()
        });
        Self { set }
    }

    /// Whether the file name of `path` carries a binary extension.
    pub fn is_binary(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.set.is_match(Path::new(name)))
    }
}

/// Reads one file into a [`FileRecord`], consulting and filling the cache.
#[derive(Clone)]
pub struct FileProcessor {
    root: PathBuf,
    mode: IgnoreMode,
    max_file_size: u64,
    rule_file_name: String,
    defaults: IgnoreFilter,
    supplemental: IgnoreFilter,
    binary: BinaryClassifier,
    cache: Arc<ScanCache>,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for FileProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProcessor")
            .field("root", &self.root)
            .field("mode", &self.mode)
            .field("max_file_size", &self.max_file_size)
            .finish_non_exhaustive()
    }
}

impl FileProcessor {
    /// `root` must already be canonical.
    pub fn new(
        root: &Path,
        mode: IgnoreMode,
        config: &ScanConfig,
        cache: Arc<ScanCache>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let PatternSets {
            default_patterns,
            global_patterns,
            binary_extensions,
        } = &config.patterns;

        Self {
            root: root.to_path_buf(),
            mode,
            max_file_size: config.max_file_size,
            rule_file_name: config.rule_file_name.clone(),
            defaults: IgnoreFilter::new(root, default_patterns.iter().cloned()),
            supplemental: IgnoreFilter::new(root, global_patterns.iter().cloned()),
            binary: BinaryClassifier::new(binary_extensions),
            cache,
            counter,
        }
    }

    /// The default-pattern matcher.
    pub fn defaults(&self) -> &IgnoreFilter {
        &self.defaults
    }

    /// Whether `path` is a rule file. Rule files feed the filter and are
    /// never reported as records.
    pub fn is_rule_file(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name == self.rule_file_name.as_str())
    }

    /// Root-relative path of `path` if it lies in the root, is not a rule
    /// file, and neither the defaults nor `filter` exclude it.
    pub fn accepts(&self, path: &Path, filter: &IgnoreFilter) -> Option<String> {
        let relative = match relative_to_root(&self.root, path) {
            Ok(relative) => relative,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "dropping path outside root");
                return None;
            }
        };
        if self.is_rule_file(path) {
            return None;
        }
        if self.defaults.matches(&relative) || filter.matches(&relative) {
            debug!(path = %relative, "ignored");
            return None;
        }
        Some(relative)
    }

    /// Produce the record for `path`.
    ///
    /// Returns `None` when the path is outside the root (also through a
    /// symlink), ignored, not a regular file, or when `cancel` fired while
    /// reading.
    pub async fn process(
        &self,
        path: &Path,
        filter: &IgnoreFilter,
        cancel: &CancellationToken,
    ) -> Option<Arc<FileRecord>> {
        if cancel.is_cancelled() {
            return None;
        }
        let relative = self.accepts(path, filter)?;
        let excluded = self.mode == IgnoreMode::Automatic && self.supplemental.matches(&relative);
        let abs = path.to_path_buf();

        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(resolved) => resolved,
            Err(err) => {
                let err = FileError::from_io(err);
                debug!(path = %relative, error = %err, "could not resolve path");
                return Some(Arc::new(
                    FileRecord::skipped(abs, relative, 0, &err).excluded_by_default(excluded),
                ));
            }
        };
        if let Err(err) = relative_to_root(&self.root, &resolved) {
            debug!(path = %relative, target = %resolved.display(), error = %err, "dropping link that leaves the root");
            return None;
        }

        if let Some(cached) = self.cache.file(path) {
            debug!(path = %relative, "file cache hit");
            return Some(cached);
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) => {
                let err = FileError::from_io(err);
                debug!(path = %relative, error = %err, "stat failed");
                return Some(Arc::new(
                    FileRecord::skipped(abs, relative, 0, &err).excluded_by_default(excluded),
                ));
            }
        };
        if !metadata.is_file() {
            return None;
        }
        let size = metadata.len();

        if self.binary.is_binary(path) {
            let record = FileRecord::binary(abs, relative, size).excluded_by_default(excluded);
            return Some(self.remember(record));
        }

        if size > self.max_file_size {
            let err = FileError::TooLarge {
                size,
                limit: self.max_file_size,
            };
            let record =
                FileRecord::skipped(abs, relative, size, &err).excluded_by_default(excluded);
            return Some(self.remember(record));
        }

        if cancel.is_cancelled() {
            return None;
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let err = FileError::from_io(err);
                debug!(path = %relative, error = %err, "read failed");
                return Some(Arc::new(
                    FileRecord::skipped(abs, relative, size, &err).excluded_by_default(excluded),
                ));
            }
        };
        if cancel.is_cancelled() {
            return None;
        }

        let record = match String::from_utf8(bytes) {
            Ok(content) => {
                let counter = Arc::clone(&self.counter);
                let counting = tokio::task::spawn_blocking(move || {
                    let tokens = counter.count_tokens(&content);
                    (content, tokens)
                });
                let counted = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    counted = counting => counted,
                };
                let (content, tokens) = match counted {
                    Ok(counted) => counted,
                    Err(err) => {
                        warn!(path = %relative, error = %err, "token counting failed");
                        return None;
                    }
                };
                FileRecord::text(abs, relative, size, content, tokens)
            }
            Err(_) => FileRecord::binary(abs, relative, size),
        };
        Some(self.remember(record.excluded_by_default(excluded)))
    }

    fn remember(&self, record: FileRecord) -> Arc<FileRecord> {
        let record = Arc::new(record);
        self.cache.insert_file(Arc::clone(&record));
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokentree_core::EstimateTokenCounter;

    fn processor(root: &Path, mode: IgnoreMode, config: &ScanConfig) -> FileProcessor {
        FileProcessor::new(
            root,
            mode,
            config,
            Arc::new(ScanCache::new()),
            Arc::new(EstimateTokenCounter),
        )
    }

    #[test]
    fn test_binary_classifier() {
        let classifier = BinaryClassifier::new(&["png".to_string(), ".ZIP".to_string()]);
        assert!(classifier.is_binary(Path::new("/a/b/logo.PNG")));
        assert!(classifier.is_binary(Path::new("bundle.zip")));
        assert!(!classifier.is_binary(Path::new("png")));
        assert!(!classifier.is_binary(Path::new("main.rs")));
    }

    #[tokio::test]
    async fn test_text_file_is_read_and_cached() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("a.txt"), "abcdefgh").unwrap();

        let config = ScanConfig::default();
        let processor = processor(&root, IgnoreMode::Automatic, &config);
        let filter = IgnoreFilter::empty(&root);
        let cancel = CancellationToken::new();

        let record = processor
            .process(&root.join("a.txt"), &filter, &cancel)
            .await
            .unwrap();
        assert_eq!(record.relative_path, "a.txt");
        assert_eq!(record.token_count, 2);
        assert!(processor.cache.file(&root.join("a.txt")).is_some());
    }

    #[tokio::test]
    async fn test_non_utf8_is_binary() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("blob.dat"), [0xff, 0xfe, 0x00, 0x81]).unwrap();

        let config = ScanConfig::default();
        let processor = processor(&root, IgnoreMode::Automatic, &config);
        let record = processor
            .process(
                &root.join("blob.dat"),
                &IgnoreFilter::empty(&root),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(record.is_binary);
        assert!(record.content.is_empty());
    }

    #[tokio::test]
    async fn test_outside_root_and_directories_are_dropped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir(root.join("dir")).unwrap();

        let config = ScanConfig::default();
        let processor = processor(&root, IgnoreMode::Automatic, &config);
        let filter = IgnoreFilter::empty(&root);
        let cancel = CancellationToken::new();

        assert!(processor.process(&root.join("dir"), &filter, &cancel).await.is_none());
        assert!(processor.process(Path::new("/etc/hosts"), &filter, &cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_supplemental_match_marks_excluded_by_default() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("server.log"), "line").unwrap();

        let config = ScanConfig::default();
        let processor = processor(&root, IgnoreMode::Automatic, &config);
        let record = processor
            .process(
                &root.join("server.log"),
                &IgnoreFilter::empty(&root),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(record.is_excluded_by_default);
        assert!(record.has_content());
    }

    #[tokio::test]
    async fn test_missing_file_becomes_skipped_record() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();

        let config = ScanConfig::default();
        let processor = processor(&root, IgnoreMode::Automatic, &config);
        let record = processor
            .process(
                &root.join("vanished.txt"),
                &IgnoreFilter::empty(&root),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(record.is_skipped);
        assert_eq!(record.token_count, 0);
        assert!(record.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(processor.cache.stats().files, 0);
    }

    #[tokio::test]
    async fn test_rule_files_are_not_records() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join(".gitignore"), "*.tmp\n").unwrap();

        let config = ScanConfig::default();
        let processor = processor(&root, IgnoreMode::Automatic, &config);
        assert!(processor.is_rule_file(&root.join(".gitignore")));
        assert!(
            processor
                .accepts(&root.join(".gitignore"), &IgnoreFilter::empty(&root))
                .is_none()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_is_dropped() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "TOPSECRET").unwrap();
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.join("link.txt")).unwrap();
        fs::write(root.join("inside.txt"), "fine").unwrap();
        std::os::unix::fs::symlink(root.join("inside.txt"), root.join("alias.txt")).unwrap();

        let config = ScanConfig::default();
        let processor = processor(&root, IgnoreMode::Automatic, &config);
        let filter = IgnoreFilter::empty(&root);
        let cancel = CancellationToken::new();

        assert!(processor.process(&root.join("link.txt"), &filter, &cancel).await.is_none());
        let alias = processor
            .process(&root.join("alias.txt"), &filter, &cancel)
            .await
            .unwrap();
        assert_eq!(alias.content, "fine");
    }

    #[tokio::test]
    async fn test_cancelled_token_reads_nothing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("a.txt"), "x").unwrap();

        let config = ScanConfig::default();
        let processor = processor(&root, IgnoreMode::Automatic, &config);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = processor
            .process(&root.join("a.txt"), &IgnoreFilter::empty(&root), &cancel)
            .await;
        assert!(result.is_none());
        assert_eq!(processor.cache.stats().files, 0);
    }
}
