use crate::domain::entities::RawNotification;
use crate::domain::value_objects::SessionScope;
use crate::shared::error::AppError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Change feed channel closed: {0}")]
    Closed(String),

    #[error("Change feed lagged, {0} notifications skipped")]
    Lagged(u64),

    #[error("Change feed transport error: {0}")]
    Transport(String),
}

/// 購読中の通知ストリーム。drop すると購読が閉じられる
pub type ChangeStream = BoxStream<'static, Result<RawNotification, FeedError>>;

/// 行レベル変更通知のプッシュ購読ポート。
///
/// ストリームが `Err` を返すか終端した場合はチャネルレベルの切断として扱う。
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, scope: &SessionScope) -> Result<ChangeStream, AppError>;
}
