#![allow(dead_code)]

use async_trait::async_trait;
use photowall_sync::application::ports::CounterSource;
use photowall_sync::{
    AppError, ConnectionPool, Photo, SqliteBackend, SyncBackend, SyncConfig, SyncCoordinator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

pub const EVENT: &str = "wedding-2026";

pub struct SyncTestContext {
    pub backend: Arc<SqliteBackend>,
    pub counters: Arc<CountingCounters>,
    pub coordinator: SyncCoordinator,
    _dir: TempDir,
}

/// 再取得の呼び出し回数を数える CounterSource のラッパー
pub struct CountingCounters {
    inner: Arc<SqliteBackend>,
    calls: AtomicUsize,
    ids_requested: AtomicUsize,
}

impl CountingCounters {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn ids_requested(&self) -> usize {
        self.ids_requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterSource for CountingCounters {
    async fn counts_for(&self, photo_ids: &[String]) -> Result<Vec<(String, i64)>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ids_requested
            .fetch_add(photo_ids.len(), Ordering::SeqCst);
        self.inner.counts_for(photo_ids).await
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        batch_window_ms: 200,
        poll_interval_secs: 1,
        degraded_poll_interval_secs: 1,
        reconnect_initial_delay_ms: 20,
        reconnect_max_delay_ms: 200,
        load_retry_delay_ms: 10,
        ..SyncConfig::default()
    }
}

pub async fn setup(config: SyncConfig) -> SyncTestContext {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite:{}", dir.path().join("photowall.db").display());
    let pool = ConnectionPool::new(&url, 5).await.expect("sqlite pool");
    pool.migrate().await.expect("migrations");

    let backend = Arc::new(SqliteBackend::new(pool));
    let counters = Arc::new(CountingCounters {
        inner: Arc::clone(&backend),
        calls: AtomicUsize::new(0),
        ids_requested: AtomicUsize::new(0),
    });
    let ports = SyncBackend {
        counters: counters.clone(),
        ..SyncBackend::from_shared(Arc::clone(&backend))
    };

    SyncTestContext {
        coordinator: SyncCoordinator::new(ports, config),
        backend,
        counters,
        _dir: dir,
    }
}

pub fn photo(id: &str, timestamp: i64) -> Photo {
    Photo::new(id, format!("https://cdn.example/{id}.jpg"), timestamp).with_event(EVENT)
}

/// スナップショットが条件を満たすまで待つ
pub async fn eventually<F>(coordinator: &SyncCoordinator, timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut(&[Photo]) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate(&coordinator.snapshot().await) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub fn likes_of(snapshot: &[Photo], id: &str) -> Option<i64> {
    snapshot
        .iter()
        .find(|photo| photo.id == id)
        .map(|photo| photo.likes_count)
}

pub async fn wait_for_push(coordinator: &SyncCoordinator) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while coordinator.feed_status().await != Some(photowall_sync::FeedStatus::Connected) {
        assert!(Instant::now() < deadline, "change feed never connected");
        sleep(Duration::from_millis(10)).await;
    }
}
