//! Concurrent directory scanner.
//!
//! Directories are walked recursively with a bounded fan-out per batch; files
//! are pushed onto a bounded queue drained by a fixed pool of workers. The
//! two bounds are independent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, join_all};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tokentree_core::path::{dir_key, relative_to_root};
use tokentree_core::{FileRecord, IgnoreMode, ScanConfig, ScanError, TokenCounter};

use crate::cache::ScanCache;
use crate::file::FileProcessor;
use crate::filter::{IgnoreFilter, parse_rule_file, rewrite_rule_lines};
use crate::progress::{ProgressReporter, ScanProgress};

/// Result of one scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Records in no particular order.
    pub records: Vec<Arc<FileRecord>>,
    pub progress: ScanProgress,
    pub duration: Duration,
    /// The scan stopped early; `records` is partial.
    pub cancelled: bool,
}

impl ScanReport {
    /// Sum of token counts over all records.
    pub fn total_tokens(&self) -> usize {
        self.records.iter().map(|r| r.token_count).sum()
    }
}

/// Scans a directory tree into [`FileRecord`]s.
pub struct DirectoryScanner {
    config: Arc<ScanConfig>,
    cache: Arc<ScanCache>,
    counter: Arc<dyn TokenCounter>,
    progress_tx: broadcast::Sender<ScanProgress>,
}

impl DirectoryScanner {
    /// Create a new scanner.
    pub fn new(
        config: Arc<ScanConfig>,
        cache: Arc<ScanCache>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            config,
            cache,
            counter,
            progress_tx,
        }
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// A file processor bound to `root`, sharing this scanner's cache and
    /// token counter.
    pub fn processor(&self, root: &Path, mode: IgnoreMode) -> FileProcessor {
        FileProcessor::new(
            root,
            mode,
            &self.config,
            Arc::clone(&self.cache),
            Arc::clone(&self.counter),
        )
    }

    /// Scan `root` with `filter` as the active filter.
    ///
    /// In automatic mode, rule files not already folded into `filter` are
    /// layered on for their own subtree as they are found. Per-file and
    /// per-directory failures never fail the scan.
    pub async fn scan(
        &self,
        root: &Path,
        filter: &IgnoreFilter,
        mode: IgnoreMode,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let start = Instant::now();
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| ScanError::io(root, e))?;
        let root_metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| ScanError::io(&root, e))?;
        if !root_metadata.is_dir() {
            return Err(ScanError::NotADirectory { path: root });
        }

        info!(root = %root.display(), %mode, "scan started");

        let cancel = cancel.clone();
        let reporter = Arc::new(ProgressReporter::new(
            self.progress_tx.clone(),
            self.config.progress_interval(),
            cancel.clone(),
        ));
        let processor = self.processor(&root, mode);

        let (jobs_tx, jobs_rx) = mpsc::channel::<FileJob>(self.config.file_queue_capacity.max(1));
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let workers: Vec<_> = (0..self.config.effective_file_concurrency().max(1))
            .map(|_| {
                tokio::spawn(run_worker(
                    Arc::clone(&jobs_rx),
                    processor.clone(),
                    Arc::clone(&reporter),
                    cancel.clone(),
                ))
            })
            .collect();

        let ctx = Arc::new(WalkContext {
            root: root.clone(),
            mode,
            rule_file_name: self.config.rule_file_name.clone(),
            dir_concurrency: self.config.effective_dir_concurrency().max(1),
            processor,
            reporter: Arc::clone(&reporter),
            jobs: jobs_tx,
            cancel: cancel.clone(),
        });

        walk_dir(ctx, root.clone(), filter.clone()).await;

        // Every sender is gone once the walk returns, so workers drain and exit.
        let mut records = Vec::new();
        for worker in join_all(workers).await {
            match worker {
                Ok(mut batch) => records.append(&mut batch),
                Err(err) => warn!(error = %err, "file worker failed"),
            }
        }

        let cancelled = cancel.is_cancelled();
        let progress = reporter.finish();
        let duration = start.elapsed();

        if cancelled {
            info!(root = %root.display(), records = records.len(), "scan cancelled");
        } else {
            info!(
                root = %root.display(),
                records = records.len(),
                dirs = progress.directories_visited,
                elapsed_ms = duration.as_millis() as u64,
                "scan finished"
            );
        }

        Ok(ScanReport {
            records,
            progress,
            duration,
            cancelled,
        })
    }
}

impl std::fmt::Debug for DirectoryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryScanner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct FileJob {
    path: PathBuf,
    filter: IgnoreFilter,
}

struct WalkContext {
    root: PathBuf,
    mode: IgnoreMode,
    rule_file_name: String,
    dir_concurrency: usize,
    processor: FileProcessor,
    reporter: Arc<ProgressReporter>,
    jobs: mpsc::Sender<FileJob>,
    cancel: CancellationToken,
}

impl WalkContext {
    fn should_descend(&self, dir: &Path, filter: &IgnoreFilter) -> bool {
        let Ok(relative) = relative_to_root(&self.root, dir) else {
            return false;
        };
        if self.processor.defaults().is_ignored(&relative, true) || filter.is_ignored(&relative, true) {
            debug!(path = %relative, "ignored directory");
            return false;
        }
        true
    }

    /// The filter for `dir`'s subtree: `inherited` plus `dir`'s own rule
    /// file if it has one that is not folded in yet.
    async fn contextual_filter(
        &self,
        dir: &Path,
        listing: &Listing,
        inherited: IgnoreFilter,
    ) -> IgnoreFilter {
        let Some(rule_file) = listing
            .files
            .iter()
            .find(|f| f.file_name().is_some_and(|n| n == self.rule_file_name.as_str()))
        else {
            return inherited;
        };

        let key = dir_key(&relative_to_root(&self.root, dir).unwrap_or_default());
        if inherited.has_origin(&key) {
            return inherited;
        }

        match tokio::fs::read_to_string(rule_file).await {
            Ok(content) => {
                let lines = parse_rule_file(&content);
                debug!(dir = %key, patterns = lines.len(), "layering rule file");
                inherited.layered(&key, &rewrite_rule_lines(&key, &lines))
            }
            Err(err) => {
                warn!(path = %rule_file.display(), error = %err, "failed to read rule file");
                inherited
            }
        }
    }
}

fn walk_dir(ctx: Arc<WalkContext>, dir: PathBuf, filter: IgnoreFilter) -> BoxFuture<'static, ()> {
    async move {
        if ctx.cancel.is_cancelled() {
            return;
        }

        let listing = match list_dir(&dir).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "skipping unreadable directory");
                return;
            }
        };
        ctx.reporter.record_dir();

        let filter = match ctx.mode {
            IgnoreMode::Automatic => ctx.contextual_filter(&dir, &listing, filter).await,
            IgnoreMode::Global => filter,
        };

        for path in listing.files {
            let job = FileJob {
                path,
                filter: filter.clone(),
            };
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return,
                sent = ctx.jobs.send(job) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }

        let subdirs: Vec<PathBuf> = listing
            .dirs
            .into_iter()
            .filter(|sub| ctx.should_descend(sub, &filter))
            .collect();

        for batch in subdirs.chunks(ctx.dir_concurrency) {
            if ctx.cancel.is_cancelled() {
                return;
            }
            join_all(
                batch
                    .iter()
                    .map(|sub| walk_dir(Arc::clone(&ctx), sub.clone(), filter.clone())),
            )
            .await;
        }
    }
    .boxed()
}

async fn run_worker(
    jobs: Arc<Mutex<mpsc::Receiver<FileJob>>>,
    processor: FileProcessor,
    reporter: Arc<ProgressReporter>,
    cancel: CancellationToken,
) -> Vec<Arc<FileRecord>> {
    let mut records = Vec::new();
    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = jobs.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        if let Some(record) = processor.process(&job.path, &job.filter, &cancel).await {
            if cancel.is_cancelled() {
                break;
            }
            reporter.record_file();
            records.push(record);
        }
    }
    records
}

#[derive(Debug, Default)]
struct Listing {
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

/// Partition `dir`'s entries. Symlinks count only when they point at a file.
async fn list_dir(dir: &Path) -> std::io::Result<Listing> {
    let mut listing = Listing::default();
    let mut entries = tokio::fs::read_dir(dir).await?;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "failed to read directory entry");
                break;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping entry without file type");
                continue;
            }
        };

        if file_type.is_dir() {
            listing.dirs.push(path);
        } else if file_type.is_file() {
            listing.files.push(path);
        } else if file_type.is_symlink()
            && tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file())
        {
            listing.files.push(path);
        }
    }
    Ok(listing)
}
