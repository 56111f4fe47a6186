//! Log file catalog
//!
//! Keeps a newest-first list of the `.mcap` files in the log directory.
//! Readers get the current snapshot without touching the disk; a background
//! task swaps in a fresh snapshot when the directory changes.
//!
//! Change detection:
//!
//! ```text
//! notify event (.mcap create/remove/rename) ─► pending flag
//! debounce tick (100ms)  ─► refresh if pending
//! fallback (3s)         ─► refresh when no scan ran for a full interval
//! ```
//!
//! Files are ordered by name, descending; recorders name captures so that
//! lexicographic order is chronological.

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Extension of recorded log files
pub const LOG_EXTENSION: &str = "mcap";

/// Immutable snapshot of the catalog, newest first
pub type FileList = Arc<[PathBuf]>;

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub dir: PathBuf,
    pub debounce: Duration,
    pub rescan_interval: Duration,
    /// Use filesystem notifications; periodic rescans run either way
    pub watch: bool,
}

impl CatalogConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            debounce: Duration::from_millis(100),
            rescan_interval: Duration::from_millis(3000),
            watch: true,
        }
    }
}

/// Always-current list of log files
pub struct FileCatalog {
    dir: PathBuf,
    snapshot: watch::Receiver<FileList>,
    publisher: Arc<watch::Sender<FileList>>,
    task: JoinHandle<()>,
}

impl FileCatalog {
    /// Scan the directory once, then keep the list fresh in the background
    ///
    /// A missing or unreadable directory yields an empty list; later scans
    /// pick the files up once it appears.
    pub async fn start(config: CatalogConfig) -> Self {
        let initial = match scan_dir(&config.dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %config.dir.display(), error = %e, "Initial log directory scan failed");
                Vec::new()
            }
        };
        tracing::info!(dir = %config.dir.display(), files = initial.len(), "File catalog started");

        let (tx, snapshot) = watch::channel(FileList::from(initial));
        let publisher = Arc::new(tx);
        let task = tokio::spawn(refresh_loop(config.clone(), Arc::clone(&publisher)));

        Self {
            dir: config.dir,
            snapshot,
            publisher,
            task,
        }
    }

    /// Current files, newest first
    pub fn files(&self) -> FileList {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescan now and publish the result
    pub async fn refresh(&self) -> std::io::Result<usize> {
        refresh(&self.dir, &self.publisher).await
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<FileList> {
        self.publisher.subscribe()
    }

    /// Stop watching; the last snapshot stays readable
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for FileCatalog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// List log files in `dir`, newest (lexicographically highest) first
pub async fn scan_dir(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_log_file(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(files)
}

fn is_log_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == LOG_EXTENSION)
        .unwrap_or(false)
}

async fn refresh(dir: &Path, publisher: &watch::Sender<FileList>) -> std::io::Result<usize> {
    let files = scan_dir(dir).await?;
    let count = files.len();
    publisher.send_replace(FileList::from(files));
    tracing::debug!(dir = %dir.display(), files = count, "Catalog refreshed");
    Ok(count)
}

async fn refresh_loop(config: CatalogConfig, publisher: Arc<watch::Sender<FileList>>) {
    let pending = Arc::new(AtomicBool::new(false));
    let _watcher = if config.watch {
        match start_watcher(&config.dir, Arc::clone(&pending)) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(dir = %config.dir.display(), error = %e, "File notifications unavailable, relying on periodic rescans");
                None
            }
        }
    } else {
        None
    };

    rescan_loop(&config, &publisher, &pending).await;
}

/// Refresh on pending notifications, and at the latest one
/// `rescan_interval` after the previous scan
async fn rescan_loop(config: &CatalogConfig, publisher: &watch::Sender<FileList>, pending: &AtomicBool) {
    let mut debounce = tokio::time::interval(config.debounce);
    debounce.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let fallback = tokio::time::sleep(config.rescan_interval);
    tokio::pin!(fallback);

    loop {
        let due = tokio::select! {
            _ = debounce.tick() => pending.swap(false, Ordering::AcqRel),
            _ = &mut fallback => true,
        };
        if !due {
            continue;
        }

        if let Err(e) = refresh(&config.dir, publisher).await {
            tracing::warn!(dir = %config.dir.display(), error = %e, "Log directory scan failed");
        }
        fallback.as_mut().reset(Instant::now() + config.rescan_interval);
    }
}

fn start_watcher(dir: &Path, pending: Arc<AtomicBool>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            let relevant = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
            );
            if relevant && event.paths.iter().any(|p| is_log_file(p)) {
                pending.store(true, Ordering::Release);
            }
        }
        Err(e) => tracing::debug!(error = %e, "Watch error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }

    async fn wait_for_file(catalog: &FileCatalog, name: &str, limit: Duration) -> bool {
        let deadline = std::time::Instant::now() + limit;
        while std::time::Instant::now() < deadline {
            if names(&catalog.files()).iter().any(|n| n == name) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_scan_keeps_log_files_newest_first() {
        let dir = tempdir().unwrap();
        for name in ["run_2024_01.mcap", "run_2024_03.mcap", "notes.txt", "run_2024_02.mcap"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let files = scan_dir(dir.path()).await.unwrap();
        assert_eq!(
            names(&files),
            vec!["run_2024_03.mcap", "run_2024_02.mcap", "run_2024_01.mcap"]
        );
    }

    #[tokio::test]
    async fn test_missing_directory_starts_empty() {
        let dir = tempdir().unwrap();
        let catalog = FileCatalog::start(CatalogConfig::new(dir.path().join("absent"))).await;

        assert!(catalog.files().is_empty());
        assert!(catalog.refresh().await.is_err());
        assert!(catalog.files().is_empty());
    }

    #[tokio::test]
    async fn test_manual_refresh_publishes_snapshot() {
        let dir = tempdir().unwrap();
        let mut config = CatalogConfig::new(dir.path());
        config.watch = false;
        config.rescan_interval = Duration::from_secs(3600);
        let catalog = FileCatalog::start(config).await;
        let mut updates = catalog.subscribe();

        std::fs::write(dir.path().join("a.mcap"), b"").unwrap();
        assert_eq!(catalog.refresh().await.unwrap(), 1);
        assert!(updates.has_changed().unwrap());
        assert_eq!(names(&updates.borrow_and_update()), vec!["a.mcap"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_notification_triggers_refresh() {
        let dir = tempdir().unwrap();
        let mut config = CatalogConfig::new(dir.path());
        config.rescan_interval = Duration::from_secs(3600);
        let catalog = FileCatalog::start(config).await;
        assert!(catalog.files().is_empty());

        // Give the watcher a moment to register
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("fresh.mcap"), b"").unwrap();

        assert!(wait_for_file(&catalog, "fresh.mcap", Duration::from_secs(5)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fallback_counts_from_last_refresh() {
        let dir = tempdir().unwrap();
        let mut config = CatalogConfig::new(dir.path());
        config.debounce = Duration::from_millis(20);
        config.rescan_interval = Duration::from_millis(600);
        let catalog = FileCatalog::start(config.clone()).await;
        catalog.stop();

        let pending = Arc::new(AtomicBool::new(false));
        let task = {
            let publisher = Arc::clone(&catalog.publisher);
            let pending = Arc::clone(&pending);
            tokio::spawn(async move { rescan_loop(&config, &publisher, &pending).await })
        };

        // A notification-driven refresh just after the first fallback point
        tokio::time::sleep(Duration::from_millis(620)).await;
        std::fs::write(dir.path().join("a.mcap"), b"").unwrap();
        pending.store(true, Ordering::Release);
        assert!(wait_for_file(&catalog, "a.mcap", Duration::from_secs(1)).await);
        let refreshed = std::time::Instant::now();

        // Nothing signals this one; the fallback must find it one interval later
        std::fs::write(dir.path().join("b.mcap"), b"").unwrap();
        assert!(wait_for_file(&catalog, "b.mcap", Duration::from_secs(3)).await);
        assert!(refreshed.elapsed() < Duration::from_millis(900));

        task.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fallback_rescan_without_notifications() {
        let dir = tempdir().unwrap();
        let mut config = CatalogConfig::new(dir.path());
        config.watch = false;
        config.rescan_interval = Duration::from_millis(200);
        let catalog = FileCatalog::start(config).await;

        std::fs::write(dir.path().join("late.mcap"), b"").unwrap();
        assert!(wait_for_file(&catalog, "late.mcap", Duration::from_secs(3)).await);

        // Snapshots taken earlier are unaffected by later refreshes
        let before = catalog.files();
        std::fs::write(dir.path().join("later.mcap"), b"").unwrap();
        assert!(wait_for_file(&catalog, "later.mcap", Duration::from_secs(3)).await);
        assert_eq!(names(&before), vec!["late.mcap"]);
    }
}
