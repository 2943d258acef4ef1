use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokentree_core::{EstimateTokenCounter, IgnoreMode, ScanConfig};
use tokentree_scan::{FileProcessor, IgnoreFilter, IgnoreRuleResolver, ScanCache};
use tokentree_watch::{ChangeWatcher, WatchEvent};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn config(debounce_ms: u64) -> ScanConfig {
    ScanConfig::builder().debounce_ms(debounce_ms).build().unwrap()
}

fn watcher(cache: Arc<ScanCache>) -> ChangeWatcher {
    ChangeWatcher::new(Arc::new(config(100)), cache, Arc::new(EstimateTokenCounter))
}

/// Read `files` under `root` into `cache`, as a scan would.
async fn warm(cache: &Arc<ScanCache>, root: &Path, files: &[&str]) {
    let processor = FileProcessor::new(
        root,
        IgnoreMode::Automatic,
        &config(100),
        Arc::clone(cache),
        Arc::new(EstimateTokenCounter),
    );
    let filter = IgnoreFilter::empty(root);
    for file in files {
        processor
            .process(&root.join(file), &filter, &CancellationToken::new())
            .await
            .unwrap();
    }
}

/// Every event until the channel is quiet for `quiet`.
async fn drain_all(rx: &mut broadcast::Receiver<WatchEvent>, quiet: Duration) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(quiet, rx.recv()).await {
        events.push(event);
    }
    events
}

async fn next_event(rx: &mut broadcast::Receiver<WatchEvent>) -> WatchEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a watch event")
        .expect("event channel closed")
}

/// Events for `name`, collected until the channel is quiet for `quiet`.
async fn drain_for(
    rx: &mut broadcast::Receiver<WatchEvent>,
    name: &str,
    quiet: Duration,
) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(quiet, rx.recv()).await {
        if event.path().file_name().is_some_and(|n| n == name) {
            events.push(event);
        }
    }
    events
}

fn canonical(temp: &TempDir) -> std::path::PathBuf {
    temp.path().canonicalize().unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_file_emits_one_added_event() {
    let temp = TempDir::new().unwrap();
    let root = canonical(&temp);
    let cache = Arc::new(ScanCache::new());
    let watcher = watcher(Arc::clone(&cache));
    let mut rx = watcher.subscribe();

    watcher
        .start(&root, IgnoreMode::Automatic, IgnoreFilter::empty(&root))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(root.join("fresh.txt"), "abcdefgh").unwrap();

    let events = drain_for(&mut rx, "fresh.txt", Duration::from_millis(800)).await;
    assert_eq!(events.len(), 1, "events: {events:?}");
    match &events[0] {
        WatchEvent::Added(record) => {
            assert_eq!(record.relative_path, "fresh.txt");
            assert_eq!(record.token_count, 2);
        }
        other => panic!("expected added, got {other:?}"),
    }
    assert!(cache.file(&root.join("fresh.txt")).is_some());

    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_file_invalidates_cache() {
    let temp = TempDir::new().unwrap();
    let root = canonical(&temp);
    fs::write(root.join("gone.txt"), "bye").unwrap();

    let cache = Arc::new(ScanCache::new());
    let watcher = watcher(Arc::clone(&cache));
    let mut rx = watcher.subscribe();
    watcher
        .start(&root, IgnoreMode::Automatic, IgnoreFilter::empty(&root))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(root.join("gone.txt"), "changed").unwrap();
    let updated = next_event(&mut rx).await;
    assert!(matches!(updated, WatchEvent::Updated(_) | WatchEvent::Added(_)));
    assert!(cache.file(&root.join("gone.txt")).is_some());

    fs::remove_file(root.join("gone.txt")).unwrap();
    loop {
        if let WatchEvent::Removed(path) = next_event(&mut rx).await {
            assert_eq!(path, root.join("gone.txt"));
            break;
        }
    }
    assert!(cache.file(&root.join("gone.txt")).is_none());

    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ignored_paths_produce_no_events() {
    let temp = TempDir::new().unwrap();
    let root = canonical(&temp);
    fs::create_dir(root.join("node_modules")).unwrap();

    let watcher = watcher(Arc::new(ScanCache::new()));
    let mut rx = watcher.subscribe();
    let filter = IgnoreFilter::new(&root, ["*.tmp"]);
    watcher
        .start(&root, IgnoreMode::Automatic, filter)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(root.join("scratch.tmp"), "x").unwrap();
    fs::write(root.join("node_modules/dep.js"), "x").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::write(root.join("kept.txt"), "x").unwrap();

    match next_event(&mut rx).await {
        WatchEvent::Added(record) => assert_eq!(record.relative_path, "kept.txt"),
        other => panic!("unexpected event {other:?}"),
    }

    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_replaces_subscription() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let watcher = watcher(Arc::new(ScanCache::new()));

    assert!(!watcher.is_watching().await);
    watcher
        .start(first.path(), IgnoreMode::Global, IgnoreFilter::empty(first.path()))
        .await
        .unwrap();
    watcher
        .start(second.path(), IgnoreMode::Global, IgnoreFilter::empty(second.path()))
        .await
        .unwrap();

    assert_eq!(watcher.watched_root().await, Some(canonical(&second)));

    watcher.stop().await;
    watcher.stop().await;
    assert!(!watcher.is_watching().await);
}

#[tokio::test]
async fn test_start_on_missing_root_fails() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing");
    let watcher = watcher(Arc::new(ScanCache::new()));

    let result = watcher
        .start(&missing, IgnoreMode::Automatic, IgnoreFilter::empty(Path::new("/")))
        .await;
    assert!(result.is_err());
    assert!(!watcher.is_watching().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_whitelisted_file_in_excluded_directory_is_ignored() {
    let temp = TempDir::new().unwrap();
    let root = canonical(&temp);
    fs::write(root.join(".gitignore"), "build/\n!build/keep.txt\n").unwrap();
    fs::create_dir(root.join("build")).unwrap();

    let cache = Arc::new(ScanCache::new());
    let rules = IgnoreRuleResolver::new(Arc::new(config(100)), Arc::clone(&cache))
        .resolve(&root, IgnoreMode::Automatic, &[])
        .await
        .unwrap();
    let watcher = watcher(Arc::clone(&cache));
    let mut rx = watcher.subscribe();
    watcher
        .start(&root, IgnoreMode::Automatic, rules.filter.clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(root.join("build/keep.txt"), "x").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::write(root.join("visible.txt"), "x").unwrap();

    match next_event(&mut rx).await {
        WatchEvent::Added(record) => assert_eq!(record.relative_path, "visible.txt"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(cache.file(&root.join("build/keep.txt")).is_none());

    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rename_removes_old_path_and_adds_new() {
    let temp = TempDir::new().unwrap();
    let root = canonical(&temp);
    fs::write(root.join("before.txt"), "abcdefgh").unwrap();

    let cache = Arc::new(ScanCache::new());
    warm(&cache, &root, &["before.txt"]).await;
    let watcher = watcher(Arc::clone(&cache));
    let mut rx = watcher.subscribe();
    watcher
        .start(&root, IgnoreMode::Automatic, IgnoreFilter::empty(&root))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::rename(root.join("before.txt"), root.join("after.txt")).unwrap();
    let events = drain_all(&mut rx, Duration::from_millis(800)).await;

    assert!(
        events
            .iter()
            .any(|e| matches!(e, WatchEvent::Removed(p) if *p == root.join("before.txt"))),
        "events: {events:?}"
    );
    let added: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WatchEvent::Added(record) if record.relative_path == "after.txt" => Some(record),
            _ => None,
        })
        .collect();
    assert_eq!(added.len(), 1, "events: {events:?}");
    assert_eq!(added[0].token_count, 2);

    assert!(cache.file(&root.join("before.txt")).is_none());
    assert!(cache.file(&root.join("after.txt")).is_some());

    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_directory_drops_cached_subtree() {
    let temp = TempDir::new().unwrap();
    let root = canonical(&temp);
    fs::create_dir_all(root.join("pkg/inner")).unwrap();
    fs::write(root.join("pkg/a.txt"), "a").unwrap();
    fs::write(root.join("pkg/inner/b.txt"), "b").unwrap();
    fs::write(root.join("stay.txt"), "s").unwrap();

    let cache = Arc::new(ScanCache::new());
    warm(&cache, &root, &["pkg/a.txt", "pkg/inner/b.txt", "stay.txt"]).await;
    let watcher = watcher(Arc::clone(&cache));
    let mut rx = watcher.subscribe();
    watcher
        .start(&root, IgnoreMode::Automatic, IgnoreFilter::empty(&root))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::remove_dir_all(root.join("pkg")).unwrap();
    let events = drain_all(&mut rx, Duration::from_millis(800)).await;

    assert!(
        events
            .iter()
            .any(|e| matches!(e, WatchEvent::Removed(p) if p.starts_with(root.join("pkg")))),
        "events: {events:?}"
    );
    assert!(events.iter().all(|e| matches!(e, WatchEvent::Removed(_))));
    assert!(cache.file(&root.join("pkg/a.txt")).is_none());
    assert!(cache.file(&root.join("pkg/inner/b.txt")).is_none());
    assert!(cache.file(&root.join("stay.txt")).is_some());

    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_change_drops_cached_record_before_refresh() {
    let temp = TempDir::new().unwrap();
    let root = canonical(&temp);
    fs::write(root.join("doc.txt"), "old").unwrap();

    let cache = Arc::new(ScanCache::new());
    warm(&cache, &root, &["doc.txt"]).await;
    let watcher = ChangeWatcher::new(
        Arc::new(config(10_000)),
        Arc::clone(&cache),
        Arc::new(EstimateTokenCounter),
    );
    watcher
        .start(&root, IgnoreMode::Automatic, IgnoreFilter::empty(&root))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(root.join("doc.txt"), "new content").unwrap();
    let dropped = tokio::time::timeout(WAIT, async {
        while cache.file(&root.join("doc.txt")).is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(dropped.is_ok(), "stale record still cached");

    watcher.stop().await;
}
