use crate::application::ports::{ChangeFeed, ChangeStream, FeedError};
use crate::domain::entities::RawNotification;
use crate::domain::value_objects::SessionScope;
use crate::shared::error::AppError;
use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// プロセス内の変更フィード。
///
/// 書き込み側が `publish` した通知を購読者ごとにスコープで絞り込んで配信する。
/// 受信が追いつかず取りこぼした場合はチャネルエラーとしてストリームを終える。
#[derive(Clone)]
pub struct LocalChangeFeed {
    sender: broadcast::Sender<RawNotification>,
    delivering: Arc<AtomicBool>,
}

impl LocalChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            delivering: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 通知を配信し、受け取った購読者数を返す
    pub fn publish(&self, notification: RawNotification) -> usize {
        if !self.delivering.load(Ordering::Relaxed) {
            debug!(
                table = %notification.table,
                scope = %notification.scope,
                "Push delivery suspended; notification left for replay"
            );
            return 0;
        }
        self.sender.send(notification).unwrap_or(0)
    }

    /// プッシュ配信の一時停止・再開。停止中の変更は change_log からのみ取得できる
    pub fn set_delivery_enabled(&self, enabled: bool) {
        self.delivering.store(enabled, Ordering::Relaxed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn subscribe(&self, scope: &SessionScope) -> Result<ChangeStream, AppError> {
        let receiver = self.sender.subscribe();
        let scope = scope.clone();

        let stream = stream::unfold(Some(receiver), move |state| {
            let scope = scope.clone();
            async move {
                let Some(mut receiver) = state else {
                    return None;
                };
                loop {
                    match receiver.recv().await {
                        Ok(raw) if scope.matches(&raw.scope) => {
                            return Some((Ok(raw), Some(receiver)));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            return Some((Err(FeedError::Lagged(skipped)), None));
                        }
                        Err(RecvError::Closed) => {
                            return Some((
                                Err(FeedError::Closed("local change feed dropped".to_string())),
                                None,
                            ));
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
