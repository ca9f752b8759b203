mod apply_loop;
mod backoff;
mod batcher;
mod dispatcher;
mod loader;
mod poller;
mod state;
mod subscriber;

pub use apply_loop::MutationIntent;
pub use backoff::ExponentialBackoff;
pub use batcher::{ReconcileBatch, RetryDecision, UpdateBatcher};
pub use loader::PaginatedLoader;
pub use state::{FeedStatus, LoadMoreOutcome, SyncState};

use crate::application::ports::{PhotoPage, SyncBackend};
use crate::domain::entities::{Photo, PhotoPatch};
use crate::domain::value_objects::SessionScope;
use crate::infrastructure::cache::{PhotoSnapshot, SharedPhotoStore};
use crate::shared::config::SyncConfig;
use crate::shared::error::AppError;
use crate::shared::metrics::{SyncMetrics, SyncMetricsSnapshot};
use apply_loop::{ApplyCommand, ApplyLoop};
use dispatcher::NotificationDispatcher;
use poller::FallbackPoller;
use state::Pagination;
use std::sync::Arc;
use subscriber::ChangeFeedSubscriber;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct LiveSession {
    scope: SessionScope,
    cancel: CancellationToken,
    commands: mpsc::Sender<ApplyCommand>,
    pagination: Arc<Mutex<Pagination>>,
    feed_status: watch::Receiver<FeedStatus>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 同期エンジンのコンポジションルート。
///
/// セッションスコープの有効化でストアを初期ロードし、変更フィード購読と
/// フォールバックポーラーを起動する。スコープ切り替え時は必ず完全に
/// 撤収してから次のスコープをロードする。
pub struct SyncCoordinator {
    backend: SyncBackend,
    loader: PaginatedLoader,
    config: SyncConfig,
    store: SharedPhotoStore,
    metrics: Arc<SyncMetrics>,
    state: watch::Sender<SyncState>,
    /// activate / deactivate を直列化する。ロード中も session は短時間しか握らない
    lifecycle: Mutex<()>,
    session: Mutex<Option<LiveSession>>,
}

impl SyncCoordinator {
    pub fn new(backend: SyncBackend, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            loader: PaginatedLoader::new(Arc::clone(&backend.photos)),
            backend,
            config,
            store: SharedPhotoStore::new(),
            metrics: Arc::new(SyncMetrics::new()),
            state,
            lifecycle: Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    /// 読み取り専用のストアハンドル
    pub fn store(&self) -> SharedPhotoStore {
        self.store.clone()
    }

    pub async fn snapshot(&self) -> PhotoSnapshot {
        self.store.snapshot().await
    }

    /// ストア変更（リビジョン）の購読
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub async fn feed_status(&self) -> Option<FeedStatus> {
        let session = self.session.lock().await;
        session.as_ref().map(|live| *live.feed_status.borrow())
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// スコープを有効化する。既存のセッションは先に撤収する
    pub async fn activate(&self, scope: SessionScope) -> Result<(), AppError> {
        self.config.validate().map_err(|reason| {
            error!(scope = %scope, %reason, "Refusing to activate with invalid sync config");
            AppError::ConfigurationError(reason)
        })?;

        let _lifecycle = self.lifecycle.lock().await;
        let previous = self.session.lock().await.take();
        if let Some(current) = previous {
            info!(from = %current.scope, to = %scope, "Switching session scope");
            self.teardown(current).await;
        }

        self.state.send_replace(SyncState::Loading(scope.clone()));
        info!(scope = %scope, "Loading session");

        let first_page = match self.load_with_retry(&scope, 1).await {
            Ok(page) => page,
            Err(err) => {
                error!(scope = %scope, error = %err, "Initial load failed");
                self.state.send_replace(SyncState::Idle);
                return Err(err);
            }
        };

        // セッション全体のトークン。各タスクには子トークンを渡す
        let cancel = CancellationToken::new();
        let (commands, commands_rx) = mpsc::channel(self.config.command_buffer);
        let apply_loop = ApplyLoop::new(
            scope.clone(),
            self.store.clone(),
            Arc::clone(&self.backend.counters),
            &self.config,
            commands.clone(),
            commands_rx,
            Arc::clone(&self.metrics),
            cancel.child_token(),
        );
        let mut tasks = vec![tokio::spawn(apply_loop.run())];

        let (feed_status_tx, feed_status) = watch::channel(FeedStatus::Connecting);
        let mut live = LiveSession {
            scope: scope.clone(),
            cancel: cancel.clone(),
            commands: commands.clone(),
            pagination: Arc::new(Mutex::new(Pagination {
                next_page: 2,
                has_more: first_page.has_more,
            })),
            feed_status,
            tasks: Vec::new(),
        };

        let seeded = match send_and_wait(&commands, |done| ApplyCommand::Seed {
            photos: first_page.items,
            done,
        })
        .await
        {
            Ok(seeded) => seeded,
            Err(err) => {
                live.tasks = tasks;
                self.teardown(live).await;
                return Err(err);
            }
        };

        let dispatcher = NotificationDispatcher::new(
            scope.clone(),
            commands,
            Arc::clone(&self.backend.replay),
            Arc::clone(&self.metrics),
            cancel.child_token(),
        );
        let subscriber = ChangeFeedSubscriber::new(
            Arc::clone(&self.backend.feed),
            dispatcher.clone(),
            feed_status_tx,
            ExponentialBackoff::new(
                self.config.reconnect_initial_delay(),
                self.config.reconnect_max_delay(),
            ),
            Arc::clone(&self.metrics),
            cancel.child_token(),
        );
        let poller = FallbackPoller::new(
            Arc::clone(&self.backend.replay),
            dispatcher,
            live.feed_status.clone(),
            self.config.poll_interval(),
            self.config.degraded_poll_interval(),
            Arc::clone(&self.metrics),
            cancel.child_token(),
        );
        tasks.push(tokio::spawn(subscriber.run()));
        tasks.push(tokio::spawn(poller.run()));
        live.tasks = tasks;

        *self.session.lock().await = Some(live);
        self.state.send_replace(SyncState::Live(scope.clone()));
        info!(scope = %scope, seeded, "Session live");
        Ok(())
    }

    /// 現在のセッションを撤収する（購読解除・タイマー停止・ストアのクリア）
    pub async fn deactivate(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.session.lock().await.take();
        if let Some(current) = current {
            self.teardown(current).await;
        }
    }

    /// 次のページを読み込み、未登録の写真だけをストアに加える
    pub async fn load_more(&self) -> Result<LoadMoreOutcome, AppError> {
        let (scope, pagination, commands, cancel) = {
            let session = self.session.lock().await;
            let live = session
                .as_ref()
                .ok_or_else(|| AppError::InvalidState("No live session".to_string()))?;
            (
                live.scope.clone(),
                Arc::clone(&live.pagination),
                live.commands.clone(),
                live.cancel.clone(),
            )
        };

        // 同じページを同時に要求しないよう、取得中はロックを保持する
        let mut pagination = pagination.lock().await;
        if !pagination.has_more {
            return Ok(LoadMoreOutcome {
                page: None,
                added: 0,
                has_more: false,
            });
        }

        let page_number = pagination.next_page;
        let page = self.load_with_retry(&scope, page_number).await?;
        if cancel.is_cancelled() {
            return Err(AppError::InvalidState(format!(
                "Session {scope} ended while loading page {page_number}"
            )));
        }

        let added = send_and_wait(&commands, |done| ApplyCommand::Merge {
            photos: page.items,
            done,
        })
        .await?;

        pagination.next_page = page_number + 1;
        pagination.has_more = page.has_more;
        info!(scope = %scope, page = page_number, added, has_more = page.has_more, "Loaded more photos");

        Ok(LoadMoreOutcome {
            page: Some(page_number),
            added,
            has_more: page.has_more,
        })
    }

    pub async fn add_photo(&self, photo: Photo) -> Result<bool, AppError> {
        self.send_intent(MutationIntent::Add(photo)).await
    }

    pub async fn update_photo(&self, id: &str, patch: PhotoPatch) -> Result<bool, AppError> {
        self.send_intent(MutationIntent::Update {
            id: id.to_string(),
            patch,
        })
        .await
    }

    pub async fn remove_photo(&self, id: &str) -> Result<bool, AppError> {
        self.send_intent(MutationIntent::Remove { id: id.to_string() })
            .await
    }

    async fn send_intent(&self, intent: MutationIntent) -> Result<bool, AppError> {
        let commands = {
            let session = self.session.lock().await;
            session
                .as_ref()
                .map(|live| live.commands.clone())
                .ok_or_else(|| AppError::InvalidState("No live session".to_string()))?
        };
        send_and_wait(&commands, |done| ApplyCommand::Intent { intent, done }).await
    }

    async fn load_with_retry(&self, scope: &SessionScope, page: u32) -> Result<PhotoPage, AppError> {
        let attempts = self.config.initial_load_retries + 1;
        let mut attempt = 1;
        loop {
            match self.loader.load(scope, page, self.config.page_size).await {
                Ok(result) => return Ok(result),
                Err(err @ AppError::InvalidInput(_)) => return Err(err),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    let delay = self.config.load_retry_delay() * attempt;
                    warn!(
                        scope = %scope,
                        page,
                        attempt,
                        error = %err,
                        ?delay,
                        "Paged load failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn teardown(&self, mut live: LiveSession) {
        live.cancel.cancel();
        for task in std::mem::take(&mut live.tasks) {
            if let Err(err) = task.await {
                warn!(scope = %live.scope, error = %err, "Sync task ended abnormally");
            }
        }
        self.store.clear().await;
        self.state.send_replace(SyncState::Idle);
        info!(scope = %live.scope, "Session torn down");
    }
}

async fn send_and_wait<T, F>(commands: &mpsc::Sender<ApplyCommand>, build: F) -> Result<T, AppError>
where
    F: FnOnce(oneshot::Sender<T>) -> ApplyCommand,
{
    let (done, result) = oneshot::channel();
    commands
        .send(build(done))
        .await
        .map_err(|_| AppError::InvalidState("Apply loop has stopped".to_string()))?;
    result
        .await
        .map_err(|_| AppError::InvalidState("Apply loop dropped the request".to_string()))
}
