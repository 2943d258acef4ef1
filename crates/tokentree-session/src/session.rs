//! The scan session: one resolver, scanner, watcher and cache set per host.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tokentree_core::{EstimateTokenCounter, IgnoreMode, ScanConfig, ScanError, TokenCounter};
use tokentree_scan::{
    CacheStats, DirectoryScanner, IgnoreFilter, IgnoreRuleResolver, ResolvedRules, RuleOrigin,
    ScanCache, ScanProgress,
};
use tokentree_watch::{ChangeWatcher, WatchEvent};

use crate::outcome::{ScanOutcome, ScanStatus};

/// Orchestrates resolve, scan and watch for a host.
///
/// Only one scan and one watch subscription are live at a time: starting a
/// scan cancels the previous one, waits for it to return and stops the
/// watcher.
pub struct ScanSession {
    config: Arc<ScanConfig>,
    cache: Arc<ScanCache>,
    resolver: IgnoreRuleResolver,
    scanner: DirectoryScanner,
    watcher: ChangeWatcher,
    current: Mutex<CancellationToken>,
    running: tokio::sync::Mutex<()>,
    watch_after_scan: bool,
}

impl ScanSession {
    pub fn new(config: ScanConfig, counter: Arc<dyn TokenCounter>) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(ScanCache::new());
        Self {
            resolver: IgnoreRuleResolver::new(Arc::clone(&config), Arc::clone(&cache)),
            scanner: DirectoryScanner::new(
                Arc::clone(&config),
                Arc::clone(&cache),
                Arc::clone(&counter),
            ),
            watcher: ChangeWatcher::new(Arc::clone(&config), Arc::clone(&cache), counter),
            current: Mutex::new(CancellationToken::new()),
            running: tokio::sync::Mutex::new(()),
            watch_after_scan: true,
            config,
            cache,
        }
    }

    /// Default config and the length-based token estimate.
    pub fn with_defaults() -> Self {
        Self::new(ScanConfig::default(), Arc::new(EstimateTokenCounter))
    }

    /// Whether a completed scan starts watching its root. On by default.
    pub fn watch_after_scan(mut self, enabled: bool) -> Self {
        self.watch_after_scan = enabled;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Resolve the rules for `root` without scanning.
    pub async fn resolve_rules(
        &self,
        root: &Path,
        mode: IgnoreMode,
        custom_patterns: &[String],
    ) -> Result<Arc<ResolvedRules>, ScanError> {
        self.resolver.resolve(root, mode, custom_patterns).await
    }

    /// The compiled filter for `root`.
    pub async fn resolve_filter(
        &self,
        root: &Path,
        mode: IgnoreMode,
        custom_patterns: &[String],
    ) -> Result<IgnoreFilter, ScanError> {
        Ok(self.resolve_rules(root, mode, custom_patterns).await?.filter.clone())
    }

    /// Rule files behind a previously resolved filter.
    pub fn rule_origin(
        &self,
        root: &Path,
        mode: IgnoreMode,
        custom_patterns: &[String],
    ) -> Option<RuleOrigin> {
        self.resolver.rule_origin(root, mode, custom_patterns)
    }

    /// Scan `root`, superseding any scan still in flight.
    ///
    /// The superseded scan is cancelled and has returned before this one
    /// touches the cache or the watcher. Rule resolution and the walk both
    /// run under the session timeout. Cancellation and the timeout are
    /// reported through [`ScanOutcome::status`], not as errors.
    pub async fn scan(
        &self,
        root: &Path,
        mode: IgnoreMode,
        custom_patterns: &[String],
    ) -> Result<ScanOutcome, ScanError> {
        let cancel = self.begin_scan();
        let _running = self.running.lock().await;
        self.watcher.stop().await;

        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = {
            let cancel = cancel.clone();
            let timed_out = Arc::clone(&timed_out);
            let timeout = self.config.session_timeout();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                timed_out.store(true, Ordering::SeqCst);
                cancel.cancel();
            })
        };

        let rules = match self
            .resolver
            .resolve_cancellable(root, mode, custom_patterns, &cancel)
            .await
        {
            Ok(rules) => rules,
            Err(err) => {
                timer.abort();
                return Err(err);
            }
        };

        let report = self
            .scanner
            .scan(&rules.root, &rules.filter, rules.mode, &cancel)
            .await;
        timer.abort();
        let report = report?;

        let status = match (report.cancelled, timed_out.load(Ordering::SeqCst)) {
            (false, _) => ScanStatus::Completed,
            (true, true) => ScanStatus::TimedOut,
            (true, false) => ScanStatus::Cancelled,
        };
        if status == ScanStatus::TimedOut {
            warn!(
                root = %rules.root.display(),
                timeout_secs = self.config.session_timeout_secs,
                "scan timed out"
            );
        }

        if status == ScanStatus::Completed && self.watch_after_scan && !cancel.is_cancelled() {
            if let Err(err) = self
                .watcher
                .start(&rules.root, rules.mode, rules.filter.clone())
                .await
            {
                warn!(root = %rules.root.display(), error = %err, "could not start watching");
            }
            if cancel.is_cancelled() {
                self.watcher.stop().await;
            }
        }

        info!(%status, records = report.records.len(), "scan request done");
        Ok(ScanOutcome {
            status,
            records: report.records,
            progress: report.progress,
            duration: report.duration,
            rules,
        })
    }

    /// Cancel the scan in flight, if any.
    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    /// Token of the most recent scan.
    pub fn cancel_handle(&self) -> CancellationToken {
        match self.current.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Subscribe to scan progress.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ScanProgress> {
        self.scanner.subscribe()
    }

    /// Subscribe to watch events.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<WatchEvent> {
        self.watcher.subscribe()
    }

    /// Watch `root` with `filter`, replacing any active subscription.
    pub async fn start_watching(
        &self,
        root: &Path,
        mode: IgnoreMode,
        filter: IgnoreFilter,
    ) -> Result<(), ScanError> {
        self.watcher.start(root, mode, filter).await
    }

    pub async fn stop_watching(&self) {
        self.watcher.stop().await;
    }

    pub async fn is_watching(&self) -> bool {
        self.watcher.is_watching().await
    }

    /// Canonical root of the active watch subscription.
    pub async fn watched_root(&self) -> Option<PathBuf> {
        self.watcher.watched_root().await
    }

    /// Drop every cached rule set and file record.
    pub fn clear_caches(&self) {
        self.cache.clear();
        info!("caches cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Cancel the previous scan and install a fresh token.
    fn begin_scan(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut current = match self.current.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        current.cancel();
        *current = fresh.clone();
        fresh
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .field("watch_after_scan", &self.watch_after_scan)
            .finish_non_exhaustive()
    }
}
