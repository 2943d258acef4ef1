//! Scan progress reporting.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Progress information during a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Directories listed so far.
    pub directories_visited: u64,
    /// Files turned into records so far.
    pub files_processed: u64,
}

/// Counts progress and publishes throttled snapshots.
///
/// Nothing is published once the scan's token has been cancelled.
#[derive(Debug)]
pub(crate) struct ProgressReporter {
    directories: AtomicU64,
    files: AtomicU64,
    interval: Duration,
    last_emit: Mutex<Option<Instant>>,
    tx: broadcast::Sender<ScanProgress>,
    cancel: CancellationToken,
}

impl ProgressReporter {
    pub fn new(
        tx: broadcast::Sender<ScanProgress>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            directories: AtomicU64::new(0),
            files: AtomicU64::new(0),
            interval,
            last_emit: Mutex::new(None),
            tx,
            cancel,
        }
    }

    pub fn record_dir(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
        self.maybe_emit();
    }

    pub fn record_file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.maybe_emit();
    }

    pub fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            directories_visited: self.directories.load(Ordering::Relaxed),
            files_processed: self.files.load(Ordering::Relaxed),
        }
    }

    /// Publish the final snapshot regardless of the throttle.
    pub fn finish(&self) -> ScanProgress {
        let snapshot = self.snapshot();
        if !self.cancel.is_cancelled() {
            let _ = self.tx.send(snapshot);
        }
        snapshot
    }

    fn maybe_emit(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let now = Instant::now();
        {
            let Ok(mut last) = self.last_emit.lock() else {
                return;
            };
            if last.is_some_and(|at| now.duration_since(at) < self.interval) {
                return;
            }
            *last = Some(now);
        }
        // No receivers is fine.
        let _ = self.tx.send(self.snapshot());
    }
}
