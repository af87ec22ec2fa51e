//! Periodic scan loop and the eviction candidate stream
//!
//! One background task owns the scan loop. Per cycle it rebuilds a full
//! snapshot, selects the least-recently-touched prefix that brings the
//! total back under budget, and hands the candidates to a short-lived
//! streaming task while the interval sleep runs concurrently. The next
//! cycle starts only after both the sleep has elapsed and streaming has
//! drained, so the effective period is max(interval, consumer drain time).

use crate::error::{MonitorError, Result};
use crate::fs::{CacheFs, DirFs};
use crate::scan;
use crate::types::EvictionCandidate;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);
/// 50 GB, applied when the configured budget is zero.
const DEFAULT_MAX_SIZE_BYTES: u64 = 50_000_000_000;

/// Configuration for the eviction monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between scan cycles. Zero selects the 3 s default.
    pub interval: Duration,
    /// Total payload byte budget. Zero selects the 50 GB default.
    pub max_size_bytes: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

impl MonitorConfig {
    fn normalized(mut self) -> Self {
        if self.interval == Duration::ZERO {
            self.interval = DEFAULT_INTERVAL;
        }
        if self.max_size_bytes == 0 {
            self.max_size_bytes = DEFAULT_MAX_SIZE_BYTES;
        }
        self
    }
}

/// Start monitoring `root_dir`, creating the directory if missing.
pub async fn start(
    root_dir: impl AsRef<Path>,
    config: MonitorConfig,
) -> Result<(Evictions, Shutdown)> {
    tokio::fs::create_dir_all(root_dir.as_ref()).await?;
    let fs: Arc<dyn CacheFs> = Arc::new(DirFs::new(root_dir.as_ref()));
    Ok(start_with_fs(fs, config))
}

/// Start the scan loop over an explicit filesystem capability.
pub fn start_with_fs(fs: Arc<dyn CacheFs>, config: MonitorConfig) -> (Evictions, Shutdown) {
    let config = config.normalized();
    info!(
        interval = ?config.interval,
        max_size_bytes = config.max_size_bytes,
        "cache monitor started"
    );

    // Capacity 1 is the closest bounded equivalent of a rendezvous
    // channel: at most one undelivered candidate in flight, and the
    // producer blocks on an unconsumed one.
    let (tx, rx) = mpsc::channel(1);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    tokio::spawn(scan_loop(Arc::clone(&fs), config, tx, cancel_rx.clone()));

    let evictions = Evictions {
        fs,
        rx,
        cancel: cancel_rx,
        current: None,
        err: None,
    };
    (evictions, Shutdown { tx: cancel_tx })
}

/// Handle that stops the scan loop.
///
/// Dropping the handle without calling [`Shutdown::shutdown`] also stops
/// the monitor.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Request shutdown. Candidates already in flight may still be
    /// delivered before the stream ends.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Pull interface over the candidate stream.
pub struct Evictions {
    fs: Arc<dyn CacheFs>,
    rx: mpsc::Receiver<Result<EvictionCandidate>>,
    cancel: watch::Receiver<bool>,
    current: Option<EvictionCandidate>,
    err: Option<MonitorError>,
}

impl Evictions {
    /// Wait for the next valid candidate.
    ///
    /// Candidates are re-validated against the filesystem at delivery
    /// time; an entry deleted between selection and delivery is silently
    /// skipped. Returns `false` once the stream has ended, either by
    /// shutdown or because the engine hit a fatal error (check
    /// [`Evictions::last_error`] to tell the two apart).
    pub async fn advance(&mut self) -> bool {
        loop {
            let msg = tokio::select! {
                msg = self.rx.recv() => msg,
                _ = self.cancel.wait_for(|cancelled| *cancelled) => {
                    self.current = None;
                    return false;
                }
            };

            match msg {
                Some(Ok(candidate)) => match self.fs.stat(&candidate.key).await {
                    Ok(_) => {
                        self.current = Some(candidate);
                        return true;
                    }
                    // Deleted between selection and delivery, or the stat
                    // itself failed; either way skip and keep waiting.
                    Err(_) => continue,
                },
                Some(Err(err)) => {
                    self.err = Some(err);
                    self.current = None;
                    return false;
                }
                None => {
                    self.current = None;
                    return false;
                }
            }
        }
    }

    /// The most recently advanced-to candidate. `None` before the first
    /// successful [`Evictions::advance`] or after it returned `false`.
    pub fn current(&self) -> Option<&EvictionCandidate> {
        self.current.as_ref()
    }

    /// The fatal engine error, if any. `None` on clean exhaustion via
    /// shutdown.
    pub fn last_error(&self) -> Option<&MonitorError> {
        self.err.as_ref()
    }
}

/// Drive an eviction stream on its own task, invoking `f` per candidate.
///
/// Resolves once the stream ends, yielding the engine's fatal error if one
/// occurred.
pub fn run_background<F>(mut evictions: Evictions, mut f: F) -> tokio::task::JoinHandle<Result<()>>
where
    F: FnMut(&EvictionCandidate) + Send + 'static,
{
    tokio::spawn(async move {
        while evictions.advance().await {
            if let Some(candidate) = evictions.current() {
                f(candidate);
            }
        }
        match evictions.err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })
}

async fn scan_loop(
    fs: Arc<dyn CacheFs>,
    config: MonitorConfig,
    tx: mpsc::Sender<Result<EvictionCandidate>>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        if *cancel.borrow() || cancel.has_changed().is_err() {
            debug!("shutdown observed, stopping monitor");
            return;
        }

        let snapshot = match scan::build_snapshot(fs.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "snapshot rebuild failed, stopping monitor");
                tokio::select! {
                    res = tx.send(Err(err)) => { let _ = res; }
                    _ = cancel.wait_for(|cancelled| *cancelled) => {}
                }
                return;
            }
        };

        let selected = scan::select_evictions(snapshot, config.max_size_bytes);
        debug!(candidates = selected.len(), "scan cycle complete");

        // Stream concurrently with the interval sleep so slow consumers
        // stretch the cycle instead of adding to it.
        let stream_tx = tx.clone();
        let mut stream_cancel = cancel.clone();
        let streamer = tokio::spawn(async move {
            for entry in selected {
                let candidate = EvictionCandidate { key: entry.key };
                tokio::select! {
                    res = stream_tx.send(Ok(candidate)) => {
                        if res.is_err() {
                            // Consumer dropped the stream.
                            return;
                        }
                    }
                    _ = stream_cancel.wait_for(|cancelled| *cancelled) => return,
                }
            }
        });

        tokio::time::sleep(config.interval).await;
        let _ = streamer.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_654_550_000 + secs, 0).unwrap()
    }

    /// Seed a payload and its recency marker in one go.
    fn seed(fs: &MemFs, key: &str, size: u64, touched: DateTime<Utc>) {
        fs.add(key, size, touched);
        fs.add(&format!("{key}.mon"), 0, touched);
    }

    fn unseed(fs: &MemFs, key: &str) {
        fs.remove_entry(key);
        fs.remove_entry(&format!("{key}.mon"));
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(50),
            max_size_bytes: 1000,
        }
    }

    #[test]
    fn test_config_default() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3));
        assert_eq!(config.max_size_bytes, 50_000_000_000);
    }

    #[test]
    fn test_config_zero_values_take_defaults() {
        let config = MonitorConfig {
            interval: Duration::ZERO,
            max_size_bytes: 0,
        }
        .normalized();
        assert_eq!(config.interval, Duration::from_secs(3));
        assert_eq!(config.max_size_bytes, 50_000_000_000);
    }

    #[tokio::test]
    async fn test_evicts_oldest_entries_until_under_budget() {
        let fs = Arc::new(MemFs::new());
        seed(&fs, "a", 100, at(11));
        seed(&fs, "b", 100, at(10));
        seed(&fs, "c", 200, at(9));
        seed(&fs, "d", 400, at(8));
        seed(&fs, "e", 200, at(7));
        seed(&fs, "f", 1, at(6));

        // Total is 1001 against a budget of 1000; evicting the oldest
        // entry "f" alone gets back under budget.
        let (mut evictions, shutdown) = start_with_fs(fs.clone(), fast_config());

        assert!(evictions.advance().await);
        assert_eq!(evictions.current().unwrap().key, "f");

        // Not deleted yet, so the next cycle proposes "f" again.
        assert!(evictions.advance().await);
        assert_eq!(evictions.current().unwrap().key, "f");

        // Apply the eviction and add two fresh entries with the oldest
        // timestamps; total is now 1101 and both must go, oldest first.
        unseed(&fs, "f");
        seed(&fs, "g", 50, at(0));
        seed(&fs, "h", 51, at(1));

        assert!(evictions.advance().await);
        assert_eq!(evictions.current().unwrap().key, "g");

        unseed(&fs, "g");

        assert!(evictions.advance().await);
        assert_eq!(evictions.current().unwrap().key, "h");

        shutdown.shutdown();

        // "h" may still be delivered a few times right after shutdown,
        // but the stream must end within a bounded number of pulls.
        let mut ended = false;
        for _ in 0..100 {
            if !evictions.advance().await {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert!(evictions.current().is_none());
        assert!(evictions.last_error().is_none());
    }

    #[tokio::test]
    async fn test_no_candidates_under_budget() {
        let fs = Arc::new(MemFs::new());
        seed(&fs, "a", 400, at(1));
        seed(&fs, "b", 500, at(2));

        let (mut evictions, shutdown) = start_with_fs(fs, fast_config());

        let waited =
            tokio::time::timeout(Duration::from_millis(300), evictions.advance()).await;
        assert!(waited.is_err(), "no candidate should be produced");

        shutdown.shutdown();
        assert!(!evictions.advance().await);
        assert!(evictions.last_error().is_none());
    }

    #[tokio::test]
    async fn test_candidate_deleted_before_delivery_is_skipped() {
        let fs = Arc::new(MemFs::new());
        seed(&fs, "stale", 600, at(1));
        seed(&fs, "fresh", 1200, at(2));

        let (mut evictions, shutdown) = start_with_fs(fs.clone(), fast_config());

        // Remove the oldest entry before ever pulling; an in-flight
        // "stale" candidate must be revalidated away and "fresh" (alone
        // still over budget) delivered instead.
        unseed(&fs, "stale");

        assert!(evictions.advance().await);
        assert_eq!(evictions.current().unwrap().key, "fresh");

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_walk_failure_surfaces_through_last_error() {
        let fs = Arc::new(MemFs::new());
        fs.fail_walks();

        let (mut evictions, _shutdown) = start_with_fs(fs, fast_config());

        assert!(!evictions.advance().await);
        assert!(matches!(
            evictions.last_error(),
            Some(MonitorError::Walk(_))
        ));
        assert!(evictions.current().is_none());
    }

    #[tokio::test]
    async fn test_dropping_shutdown_handle_ends_stream() {
        let fs = Arc::new(MemFs::new());
        seed(&fs, "a", 2000, at(1));

        let (mut evictions, shutdown) = start_with_fs(fs, fast_config());
        drop(shutdown);

        let mut ended = false;
        for _ in 0..100 {
            if !evictions.advance().await {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert!(evictions.last_error().is_none());
    }

    #[tokio::test]
    async fn test_run_background_applies_evictions() {
        use std::sync::Mutex;

        let fs = Arc::new(MemFs::new());
        seed(&fs, "old", 600, at(1));
        seed(&fs, "new", 600, at(2));

        let (evictions, shutdown) = start_with_fs(fs.clone(), fast_config());

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_task = Arc::clone(&seen);
        let task_fs = Arc::clone(&fs);
        let handle = run_background(evictions, move |candidate| {
            seen_in_task.lock().unwrap().push(candidate.key.clone());
            // Act on the proposal: drop payload and marker.
            task_fs.remove_entry(&candidate.key);
            task_fs.remove_entry(&format!("{}.mon", candidate.key));
        });

        // 1200 total against a 1000 budget: only "old" needs to go.
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.shutdown();
        handle.await.unwrap().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], "old");
    }

    #[tokio::test]
    async fn test_monitors_a_real_directory() {
        use crate::cache::Cache;
        use crate::fs::DirFs;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("old"), b"12345678").unwrap();
        std::fs::write(dir.path().join("new"), b"12345678").unwrap();

        let fs: Arc<dyn CacheFs> = Arc::new(DirFs::new(dir.path()));
        let cache = Cache::new(Arc::clone(&fs));
        cache.put("old").await.unwrap();
        cache.put("new").await.unwrap();
        // Age the first marker so "old" is unambiguously least recent.
        fs.set_mtime("old.mon", at(0)).await.unwrap();

        let config = MonitorConfig {
            interval: Duration::from_millis(50),
            max_size_bytes: 10,
        };
        let (mut evictions, shutdown) = start(dir.path(), config).await.unwrap();

        // 16 payload bytes against a 10 byte budget: evicting the 8-byte
        // "old" suffices.
        assert!(evictions.advance().await);
        assert_eq!(evictions.current().unwrap().key, "old");

        shutdown.shutdown();
        for _ in 0..100 {
            if !evictions.advance().await {
                break;
            }
        }
        assert!(evictions.last_error().is_none());
    }
}
