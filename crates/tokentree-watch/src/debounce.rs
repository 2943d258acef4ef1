//! Per-path debouncing of change notifications.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::AbortHandle;
use tracing::trace;

/// What a pending path will be reported as once it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Added,
    Updated,
}

impl PendingKind {
    /// A path created and then modified inside one window is still new.
    fn merge(self, next: PendingKind) -> PendingKind {
        match self {
            PendingKind::Added => PendingKind::Added,
            PendingKind::Updated => next,
        }
    }
}

struct Pending {
    kind: PendingKind,
    generation: u64,
    handle: AbortHandle,
}

/// Map from path to a cancellable scheduled task.
///
/// Scheduling a path that is already pending restarts its quiet period.
pub struct Debouncer {
    delay: Duration,
    pending: Arc<DashMap<PathBuf, Pending>>,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `fire` for `path` once no further event arrived for the delay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, path: PathBuf, kind: PendingKind, fire: F)
    where
        F: FnOnce(PathBuf, PendingKind) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        // The entry guard is held until the new task is registered, so the
        // task cannot observe a stale generation.
        let slot = self.pending.entry(path.clone());
        let kind = match &slot {
            Entry::Occupied(existing) => {
                existing.get().handle.abort();
                existing.get().kind.merge(kind)
            }
            Entry::Vacant(_) => kind,
        };

        let pending = Arc::clone(&self.pending);
        let delay = self.delay;
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let settled = pending
                .remove_if(&task_path, |_, p| p.generation == generation)
                .is_some();
            if settled {
                fire(task_path, kind).await;
            }
        })
        .abort_handle();

        trace!(path = %path.display(), ?kind, "debounce scheduled");
        slot.insert(Pending {
            kind,
            generation,
            handle,
        });
    }

    /// Drop the pending task for exactly `path`.
    pub fn cancel(&self, path: &Path) -> bool {
        match self.pending.remove(path) {
            Some((_, pending)) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop pending tasks at or below `path`.
    pub fn cancel_under(&self, path: &Path) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|candidate, pending| {
            if candidate.starts_with(path) {
                pending.handle.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    /// Abort everything.
    pub fn clear(&self) {
        self.pending.retain(|_, pending| {
            pending.handle.abort();
            false
        });
    }

    /// Number of paths waiting to settle.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.clear();
    }
}
