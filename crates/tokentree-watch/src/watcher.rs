//! Filesystem watching that keeps the file cache coherent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tokentree_core::{FileRecord, IgnoreMode, ScanConfig, ScanError, TokenCounter};
use tokentree_scan::{FileProcessor, IgnoreFilter, ScanCache};

use crate::debounce::{Debouncer, PendingKind};

/// A change observed under the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A new file, with its freshly read record.
    Added(Arc<FileRecord>),
    /// An existing file changed; the record replaces the old one wholesale.
    Updated(Arc<FileRecord>),
    /// A file or directory disappeared.
    Removed(PathBuf),
}

impl WatchEvent {
    /// Absolute path the event is about.
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Added(record) | WatchEvent::Updated(record) => &record.absolute_path,
            WatchEvent::Removed(path) => path,
        }
    }
}

/// Watches one root at a time and republishes changes as [`WatchEvent`]s.
///
/// Idle until [`start`](Self::start); starting again replaces the previous
/// subscription.
pub struct ChangeWatcher {
    config: Arc<ScanConfig>,
    cache: Arc<ScanCache>,
    counter: Arc<dyn TokenCounter>,
    events_tx: broadcast::Sender<WatchEvent>,
    active: Mutex<Option<ActiveWatch>>,
}

struct ActiveWatch {
    root: PathBuf,
    cancel: CancellationToken,
    handler: Arc<EventHandler>,
    task: JoinHandle<()>,
    watcher: RecommendedWatcher,
}

impl ChangeWatcher {
    pub fn new(
        config: Arc<ScanConfig>,
        cache: Arc<ScanCache>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            config,
            cache,
            counter,
            events_tx,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events_tx.subscribe()
    }

    /// Watch `root` recursively, ignoring paths excluded by the defaults or by
    /// `filter`. Any previous subscription is stopped first.
    pub async fn start(
        &self,
        root: &Path,
        mode: IgnoreMode,
        filter: IgnoreFilter,
    ) -> Result<(), ScanError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.shutdown().await;
        }

        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| ScanError::io(root, e))?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.send(res);
        })
        .map_err(|e| ScanError::Watch {
            message: e.to_string(),
        })?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ScanError::Watch {
                message: format!("{}: {e}", root.display()),
            })?;

        let cancel = CancellationToken::new();
        let processor = FileProcessor::new(
            &root,
            mode,
            &self.config,
            Arc::clone(&self.cache),
            Arc::clone(&self.counter),
        );
        let handler = Arc::new(EventHandler {
            processor,
            filter,
            cache: Arc::clone(&self.cache),
            debouncer: Debouncer::new(self.config.debounce()),
            events_tx: self.events_tx.clone(),
            cancel: cancel.clone(),
        });

        let task = tokio::spawn(run_event_loop(raw_rx, Arc::clone(&handler), cancel.clone()));

        info!(root = %root.display(), %mode, "watching for changes");
        *active = Some(ActiveWatch {
            root,
            cancel,
            handler,
            task,
            watcher,
        });
        Ok(())
    }

    /// Stop watching and drop pending debounced work. Idempotent.
    pub async fn stop(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.shutdown().await;
        }
    }

    pub async fn is_watching(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Root of the active subscription.
    pub async fn watched_root(&self) -> Option<PathBuf> {
        self.active.lock().await.as_ref().map(|a| a.root.clone())
    }
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher").finish_non_exhaustive()
    }
}

impl ActiveWatch {
    async fn shutdown(self) {
        self.cancel.cancel();
        self.handler.debouncer.clear();
        // Closes the raw event channel.
        drop(self.watcher);
        if let Err(err) = self.task.await {
            warn!(error = %err, "watch event loop ended abnormally");
        }
        info!(root = %self.root.display(), "stopped watching");
    }
}

async fn run_event_loop(
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    handler: Arc<EventHandler>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = raw_rx.recv() => next,
        };
        match next {
            Some(Ok(event)) => handler.handle(event),
            Some(Err(err)) => warn!(error = %err, "watch error"),
            None => break,
        }
    }
}

struct EventHandler {
    processor: FileProcessor,
    filter: IgnoreFilter,
    cache: Arc<ScanCache>,
    debouncer: Debouncer,
    events_tx: broadcast::Sender<WatchEvent>,
    cancel: CancellationToken,
}

impl EventHandler {
    fn handle(self: &Arc<Self>, event: Event) {
        let mut paths = event.paths.into_iter();
        match event.kind {
            EventKind::Create(_) => paths.for_each(|p| self.schedule(p, PendingKind::Added)),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let Some(from) = paths.next() {
                    self.remove(&from);
                }
                if let Some(to) = paths.next() {
                    self.schedule(to, PendingKind::Added);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                paths.for_each(|p| self.remove(&p));
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in paths {
                    if path.exists() {
                        self.schedule(path, PendingKind::Added);
                    } else {
                        self.remove(&path);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) => paths.for_each(|p| self.schedule(p, PendingKind::Updated)),
            EventKind::Remove(_) => paths.for_each(|p| self.remove(&p)),
            _ => {}
        }
    }

    fn schedule(self: &Arc<Self>, path: PathBuf, kind: PendingKind) {
        if self.processor.is_rule_file(&path) {
            info!(path = %path.display(), "rule file changed; rescan to apply new rules");
            return;
        }
        if self.processor.accepts(&path, &self.filter).is_none() {
            return;
        }
        // Stale until the debounced refresh lands.
        self.cache.remove_file(&path);

        let handler = Arc::clone(self);
        self.debouncer
            .schedule(path, kind, move |path, kind| async move {
                handler.refresh(path, kind).await;
            });
    }

    async fn refresh(&self, path: PathBuf, kind: PendingKind) {
        if self.cancel.is_cancelled() {
            return;
        }
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "changed path vanished before refresh");
                return;
            }
        }

        self.cache.remove_file(&path);
        let Some(record) = self.processor.process(&path, &self.filter, &self.cancel).await else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }

        debug!(path = %record.relative_path, ?kind, tokens = record.token_count, "file refreshed");
        let event = match kind {
            PendingKind::Added => WatchEvent::Added(record),
            PendingKind::Updated => WatchEvent::Updated(record),
        };
        let _ = self.events_tx.send(event);
    }

    fn remove(&self, path: &Path) {
        self.debouncer.cancel(path);
        self.debouncer.cancel_under(path);

        let dropped = usize::from(self.cache.remove_file(path).is_some()) + self.cache.remove_under(path);
        if self.processor.accepts(path, &self.filter).is_none() {
            return;
        }

        debug!(path = %path.display(), dropped, "path removed");
        let _ = self.events_tx.send(WatchEvent::Removed(path.to_path_buf()));
    }
}
