use super::batcher::{ReconcileBatch, RetryDecision, UpdateBatcher};
use crate::application::ports::CounterSource;
use crate::domain::entities::{ChangeEvent, Photo, PhotoPatch};
use crate::domain::value_objects::SessionScope;
use crate::infrastructure::cache::SharedPhotoStore;
use crate::shared::config::SyncConfig;
use crate::shared::error::AppError;
use crate::shared::metrics::SyncMetrics;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// アプリケーションからの明示的な変更要求
#[derive(Debug, Clone, PartialEq)]
pub enum MutationIntent {
    Add(Photo),
    Update { id: String, patch: PhotoPatch },
    Remove { id: String },
}

/// 単一の適用経路に流れるコマンド
#[derive(Debug)]
pub(crate) enum ApplyCommand {
    /// 初期ロード結果をそのまま upsert する
    Seed {
        photos: Vec<Photo>,
        done: oneshot::Sender<usize>,
    },
    /// 追加ページを未登録分だけ取り込む
    Merge {
        photos: Vec<Photo>,
        done: oneshot::Sender<usize>,
    },
    Event(ChangeEvent),
    Intent {
        intent: MutationIntent,
        done: oneshot::Sender<bool>,
    },
    Reconciled {
        generation: u64,
        ids: Vec<String>,
        outcome: Result<Vec<(String, i64)>, AppError>,
    },
}

/// ストアへの変更をすべて直列化するタスク。
///
/// コマンド受信・バッチウィンドウ満了・キャンセルを select で待ち受ける。
/// 再取得は別タスクで実行し、結果はコマンドとしてこのループに戻る。
pub(crate) struct ApplyLoop {
    scope: SessionScope,
    store: SharedPhotoStore,
    batcher: UpdateBatcher,
    tombstones: HashSet<String>,
    counters: Arc<dyn CounterSource>,
    reconcile_timeout: Duration,
    commands_tx: mpsc::Sender<ApplyCommand>,
    commands_rx: mpsc::Receiver<ApplyCommand>,
    metrics: Arc<SyncMetrics>,
    cancel: CancellationToken,
}

impl ApplyLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scope: SessionScope,
        store: SharedPhotoStore,
        counters: Arc<dyn CounterSource>,
        config: &SyncConfig,
        commands_tx: mpsc::Sender<ApplyCommand>,
        commands_rx: mpsc::Receiver<ApplyCommand>,
        metrics: Arc<SyncMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scope,
            store,
            batcher: UpdateBatcher::new(
                config.batch_window(),
                config.reconcile_chunk_size,
                config.max_reconcile_retries,
            ),
            tombstones: HashSet::new(),
            counters,
            reconcile_timeout: config.reconcile_timeout(),
            commands_tx,
            commands_rx,
            metrics,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(scope = %self.scope, "Apply loop started");

        loop {
            let deadline = self.batcher.deadline();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = wait_until(deadline) => self.flush(),
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.batcher.clear();
        debug!(scope = %self.scope, "Apply loop stopped");
    }

    async fn handle(&mut self, command: ApplyCommand) {
        match command {
            ApplyCommand::Seed { photos, done } => {
                let applied = self.seed(photos, false).await;
                let _ = done.send(applied);
            }
            ApplyCommand::Merge { photos, done } => {
                let applied = self.seed(photos, true).await;
                let _ = done.send(applied);
            }
            ApplyCommand::Event(event) => {
                if self.apply_event(event).await {
                    self.metrics.notifications.record_success();
                }
            }
            ApplyCommand::Intent { intent, done } => {
                let changed = self.apply_intent(intent).await;
                let _ = done.send(changed);
            }
            ApplyCommand::Reconciled {
                generation,
                ids,
                outcome,
            } => self.apply_reconciled(generation, ids, outcome).await,
        }
    }

    async fn seed(&mut self, photos: Vec<Photo>, keep_existing: bool) -> usize {
        let tombstones = &self.tombstones;
        let photos: Vec<Photo> = photos
            .into_iter()
            .filter(|photo| !tombstones.contains(&photo.id))
            .collect();

        self.store
            .mutate(move |store| {
                let mut applied = 0;
                for photo in photos {
                    let changed = if keep_existing {
                        store.insert_if_absent(photo)
                    } else {
                        store.upsert(photo)
                    };
                    if changed {
                        applied += 1;
                    }
                }
                (applied, applied > 0)
            })
            .await
    }

    /// 通知を適用する。削除済みや未表示の写真宛てで無視した場合は false
    async fn apply_event(&mut self, event: ChangeEvent) -> bool {
        match event {
            ChangeEvent::Created(photo) => self.merge_created(photo).await,
            ChangeEvent::Refreshed { id, patch } => {
                self.store
                    .mutate(|store| {
                        let changed = store.patch(&id, &patch);
                        ((), changed)
                    })
                    .await;
                true
            }
            ChangeEvent::Deleted { id } => {
                self.remove(id).await;
                true
            }
            ChangeEvent::CounterChanged { photo_id } => {
                if self.tombstones.contains(&photo_id) {
                    debug!(photo_id = %photo_id, "Ignoring counter change for deleted photo");
                    return false;
                }
                if !self.store.contains(&photo_id).await {
                    debug!(photo_id = %photo_id, "Ignoring counter change for photo not in view");
                    return false;
                }
                if self.batcher.mark_dirty(&photo_id, Instant::now()) {
                    debug!(photo_id = %photo_id, "Opened reconcile window");
                }
                true
            }
        }
    }

    async fn apply_intent(&mut self, intent: MutationIntent) -> bool {
        match intent {
            MutationIntent::Add(photo) => self.upsert(photo).await,
            MutationIntent::Update { id, patch } => {
                if patch.is_empty() {
                    debug!(photo_id = %id, "Ignoring empty update intent");
                    return false;
                }
                self.store
                    .mutate(|store| {
                        let changed = store.patch(&id, &patch);
                        (changed, changed)
                    })
                    .await
            }
            MutationIntent::Remove { id } => self.remove(id).await,
        }
    }

    async fn upsert(&mut self, photo: Photo) -> bool {
        if self.tombstones.contains(&photo.id) {
            debug!(photo_id = %photo.id, "Ignoring insert for deleted photo");
            return false;
        }
        self.store
            .mutate(|store| {
                let changed = store.upsert(photo);
                (changed, changed)
            })
            .await
    }

    /// 変更フィード由来の INSERT。既存エントリには説明系フィールドだけをマージし、
    /// いいね数は再取得で確定した値を保持する
    async fn merge_created(&mut self, photo: Photo) -> bool {
        if self.tombstones.contains(&photo.id) {
            debug!(photo_id = %photo.id, "Ignoring insert for deleted photo");
            return false;
        }
        self.store
            .mutate(|store| {
                let changed = if store.contains(&photo.id) {
                    store.patch(&photo.id, &PhotoPatch::descriptive_from(&photo))
                } else {
                    store.upsert(photo)
                };
                ((), changed)
            })
            .await;
        true
    }

    async fn remove(&mut self, id: String) -> bool {
        // 削除は保留中の再取得より優先される
        self.batcher.forget(&id);
        let removed = self
            .store
            .mutate(|store| {
                let removed = store.remove(&id).is_some();
                (removed, removed)
            })
            .await;
        self.tombstones.insert(id);
        removed
    }

    fn flush(&mut self) {
        let Some(batch) = self.batcher.take_batch() else {
            return;
        };
        self.metrics.record_batch_flushed();
        debug!(
            scope = %self.scope,
            generation = batch.generation,
            ids = batch.ids().count(),
            "Flushing reconcile batch"
        );
        self.dispatch_reads(batch);
    }

    fn dispatch_reads(&self, batch: ReconcileBatch) {
        let generation = batch.generation;
        for ids in batch.chunks {
            let counters = Arc::clone(&self.counters);
            let results = self.commands_tx.clone();
            let cancel = self.cancel.clone();
            let timeout = self.reconcile_timeout;

            tokio::spawn(async move {
                let read = tokio::time::timeout(timeout, counters.counts_for(&ids));
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => return,
                    outcome = read => outcome.map_err(AppError::from).and_then(|result| result),
                };
                let _ = results
                    .send(ApplyCommand::Reconciled {
                        generation,
                        ids,
                        outcome,
                    })
                    .await;
            });
        }
    }

    async fn apply_reconciled(
        &mut self,
        generation: u64,
        ids: Vec<String>,
        outcome: Result<Vec<(String, i64)>, AppError>,
    ) {
        match outcome {
            Ok(counts) => {
                self.metrics.reconcile_reads.record_success();

                let requested: HashSet<&String> = ids.iter().collect();
                let mut updates = Vec::with_capacity(counts.len());
                let mut answered = HashSet::new();
                for (id, count) in counts {
                    if !requested.contains(&id) {
                        continue;
                    }
                    answered.insert(id.clone());
                    if self.batcher.accept(&id, generation) {
                        updates.push((id, count));
                    } else {
                        debug!(photo_id = %id, generation, "Discarding superseded reconcile result");
                    }
                }
                for id in ids.iter().filter(|id| !answered.contains(*id)) {
                    debug!(photo_id = %id, "Photo no longer exists upstream; skipping reconcile");
                }

                self.store
                    .mutate(move |store| {
                        let mut changed = false;
                        for (id, count) in updates {
                            changed |= store.patch(&id, &PhotoPatch::likes(count));
                        }
                        ((), changed)
                    })
                    .await;
            }
            Err(err) => {
                self.metrics.reconcile_reads.record_failure();
                warn!(generation, ids = ids.len(), error = %err, "Reconcile read failed");

                let now = Instant::now();
                for id in ids {
                    match self.batcher.record_failure(&id, generation, now) {
                        RetryDecision::Requeued { attempt } => {
                            info!(photo_id = %id, attempt, "Requeued photo for next reconcile window");
                        }
                        RetryDecision::Exhausted => {
                            error!(photo_id = %id, "Giving up on reconcile after max retries");
                        }
                        RetryDecision::Superseded => {}
                    }
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
