//! Filesystem change watching for tokentree.
//!
//! [`ChangeWatcher`] subscribes to a scanned root through `notify`, debounces
//! bursts per path, re-reads changed files through the same
//! [`FileProcessor`](tokentree_scan::FileProcessor) the scanner uses and keeps
//! the shared [`ScanCache`](tokentree_scan::ScanCache) coherent.

mod debounce;
mod watcher;

pub use debounce::{Debouncer, PendingKind};
pub use watcher::{ChangeWatcher, WatchEvent};
