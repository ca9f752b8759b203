use super::apply_loop::ApplyCommand;
use crate::application::ports::ReplayQueue;
use crate::domain::entities::{ChangeEvent, RawNotification};
use crate::domain::value_objects::SessionScope;
use crate::shared::metrics::SyncMetrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryPath {
    Push,
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    Forwarded,
    Dropped,
    /// 適用ループが終了している
    Closed,
}

/// プッシュ経路と再生経路で共有する通知の入口。
///
/// スコープ確認とデコードを行い、結果を単一の適用経路へ送る。
#[derive(Clone)]
pub(crate) struct NotificationDispatcher {
    scope: SessionScope,
    commands: mpsc::Sender<ApplyCommand>,
    replay: Arc<dyn ReplayQueue>,
    metrics: Arc<SyncMetrics>,
    cancel: CancellationToken,
}

impl NotificationDispatcher {
    pub(crate) fn new(
        scope: SessionScope,
        commands: mpsc::Sender<ApplyCommand>,
        replay: Arc<dyn ReplayQueue>,
        metrics: Arc<SyncMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scope,
            commands,
            replay,
            metrics,
            cancel,
        }
    }

    pub(crate) fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub(crate) async fn dispatch(&self, raw: RawNotification, path: DeliveryPath) -> DispatchOutcome {
        if self.cancel.is_cancelled() {
            debug!(scope = %self.scope, ?path, "Discarding notification after teardown");
            self.metrics.notifications.record_failure();
            return DispatchOutcome::Closed;
        }

        if !self.scope.matches(&raw.scope) {
            warn!(
                scope = %self.scope,
                notification_scope = %raw.scope,
                table = %raw.table,
                ?path,
                "Discarding out-of-scope notification"
            );
            self.metrics.notifications.record_failure();
            return DispatchOutcome::Dropped;
        }

        let event = match ChangeEvent::decode(&raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    scope = %self.scope,
                    table = %raw.table,
                    kind = raw.kind.as_str(),
                    ?path,
                    error = %err,
                    "Dropping malformed notification"
                );
                self.metrics.notifications.record_failure();
                // 不正な通知は何度再生しても適用できない
                self.mark_processed(raw.replay_id).await;
                return DispatchOutcome::Dropped;
            }
        };

        debug!(
            scope = %self.scope,
            ?path,
            photo_id = event.entity_id(),
            "Dispatching notification"
        );
        if self.commands.send(ApplyCommand::Event(event)).await.is_err() {
            return DispatchOutcome::Closed;
        }

        self.mark_processed(raw.replay_id).await;
        DispatchOutcome::Forwarded
    }

    async fn mark_processed(&self, replay_id: Option<i64>) {
        let Some(replay_id) = replay_id else {
            return;
        };
        if let Err(err) = self.replay.mark_processed(replay_id).await {
            warn!(replay_id, error = %err, "Failed to mark notification processed");
        }
    }
}
