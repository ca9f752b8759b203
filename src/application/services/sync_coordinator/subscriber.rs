use super::backoff::ExponentialBackoff;
use super::dispatcher::{DeliveryPath, DispatchOutcome, NotificationDispatcher};
use super::state::FeedStatus;
use crate::application::ports::ChangeFeed;
use crate::shared::metrics::SyncMetrics;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum StreamEnd {
    Cancelled,
    ApplyClosed,
    Disconnected(String),
}

/// セッションごとに1本の変更フィード購読を維持する。
///
/// チャネルエラーや終端で切断状態に移り、バックオフ後に再購読する。
/// 切断中はフォールバックポーラーが配信を肩代わりする。
pub(crate) struct ChangeFeedSubscriber {
    feed: Arc<dyn ChangeFeed>,
    dispatcher: NotificationDispatcher,
    status: watch::Sender<FeedStatus>,
    backoff: ExponentialBackoff,
    metrics: Arc<SyncMetrics>,
    cancel: CancellationToken,
}

impl ChangeFeedSubscriber {
    pub(crate) fn new(
        feed: Arc<dyn ChangeFeed>,
        dispatcher: NotificationDispatcher,
        status: watch::Sender<FeedStatus>,
        backoff: ExponentialBackoff,
        metrics: Arc<SyncMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            feed,
            dispatcher,
            status,
            backoff,
            metrics,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        let scope = self.dispatcher.scope().clone();

        loop {
            self.set_status(FeedStatus::Connecting);

            let subscribed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                subscribed = self.feed.subscribe(&scope) => subscribed,
            };

            match subscribed {
                Ok(stream) => {
                    self.set_status(FeedStatus::Connected);
                    self.backoff.reset();
                    info!(scope = %scope, "Change feed subscribed");

                    match self.consume(stream).await {
                        StreamEnd::Cancelled | StreamEnd::ApplyClosed => break,
                        StreamEnd::Disconnected(reason) => {
                            warn!(scope = %scope, %reason, "Change feed disconnected");
                        }
                    }
                }
                Err(err) => {
                    warn!(scope = %scope, error = %err, "Failed to subscribe to change feed");
                }
            }

            self.set_status(FeedStatus::Disconnected);
            self.metrics.record_reconnect();

            let delay = self.backoff.next_delay();
            debug!(scope = %scope, attempt = self.backoff.attempt(), ?delay, "Scheduling resubscribe");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_status(FeedStatus::Disconnected);
        debug!(scope = %scope, "Change feed subscriber stopped");
    }

    async fn consume(&self, mut stream: crate::application::ports::ChangeStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(raw)) => {
                    if self.dispatcher.dispatch(raw, DeliveryPath::Push).await
                        == DispatchOutcome::Closed
                    {
                        return StreamEnd::ApplyClosed;
                    }
                }
                Some(Err(err)) => return StreamEnd::Disconnected(err.to_string()),
                None => return StreamEnd::Disconnected("stream ended".to_string()),
            }
        }
    }

    fn set_status(&self, status: FeedStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
