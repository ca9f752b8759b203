use crate::domain::entities::RawNotification;
use crate::domain::value_objects::SessionScope;
use crate::shared::error::AppError;
use async_trait::async_trait;

/// プッシュ経路で取りこぼした通知を再生するためのポート。
///
/// 返される通知は必ず `replay_id` を持つ。`mark_processed` は冪等であること。
#[async_trait]
pub trait ReplayQueue: Send + Sync {
    async fn poll_unprocessed(&self, scope: &SessionScope)
        -> Result<Vec<RawNotification>, AppError>;

    async fn mark_processed(&self, replay_id: i64) -> Result<(), AppError>;
}
