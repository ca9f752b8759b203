use super::dispatcher::{DeliveryPath, DispatchOutcome, NotificationDispatcher};
use super::state::FeedStatus;
use crate::application::ports::ReplayQueue;
use crate::shared::metrics::SyncMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// プッシュ経路の取りこぼしを拾う低頻度ポーラー。
///
/// 未処理の通知を同じ適用経路で再生し、処理済みマークで二重適用を防ぐ。
/// プッシュが切断されている間は短い間隔でポーリングする。
pub(crate) struct FallbackPoller {
    replay: Arc<dyn ReplayQueue>,
    dispatcher: NotificationDispatcher,
    feed_status: watch::Receiver<FeedStatus>,
    interval: Duration,
    degraded_interval: Duration,
    metrics: Arc<SyncMetrics>,
    cancel: CancellationToken,
}

impl FallbackPoller {
    pub(crate) fn new(
        replay: Arc<dyn ReplayQueue>,
        dispatcher: NotificationDispatcher,
        feed_status: watch::Receiver<FeedStatus>,
        interval: Duration,
        degraded_interval: Duration,
        metrics: Arc<SyncMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            replay,
            dispatcher,
            feed_status,
            interval,
            degraded_interval,
            metrics,
            cancel,
        }
    }

    fn current_interval(&self) -> Duration {
        if *self.feed_status.borrow() == FeedStatus::Connected {
            self.interval
        } else {
            self.degraded_interval
        }
    }

    pub(crate) async fn run(mut self) {
        let mut status_open = true;
        let mut last_poll = Instant::now();

        loop {
            // 状態変化では間隔だけを再計算し、前回ポーリングからの経過は維持する
            let next_poll = last_poll + self.current_interval();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                changed = self.feed_status.changed(), if status_open => {
                    if changed.is_err() {
                        status_open = false;
                    }
                }
                _ = tokio::time::sleep_until(next_poll) => {
                    if !self.poll_once().await {
                        break;
                    }
                    last_poll = Instant::now();
                }
            }
        }

        debug!(scope = %self.dispatcher.scope(), "Fallback poller stopped");
    }

    /// 1回分のポーリング。適用ループが終了していれば false
    pub(crate) async fn poll_once(&self) -> bool {
        let scope = self.dispatcher.scope();
        let pending = match self.replay.poll_unprocessed(scope).await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(scope = %scope, error = %err, "Fallback poll failed");
                return true;
            }
        };

        if pending.is_empty() {
            return true;
        }

        let mut replayed = 0usize;
        for raw in pending {
            if raw.replay_id.is_none() {
                warn!(scope = %scope, table = %raw.table, "Replay queue returned notification without id");
                continue;
            }
            match self.dispatcher.dispatch(raw, DeliveryPath::Replay).await {
                DispatchOutcome::Forwarded => {
                    replayed += 1;
                    self.metrics.record_replayed();
                }
                DispatchOutcome::Dropped => {}
                DispatchOutcome::Closed => return false,
            }
        }

        if replayed > 0 {
            info!(scope = %scope, replayed, "Replayed missed notifications");
        }
        true
    }
}
