use crate::shared::error::AppError;
use async_trait::async_trait;

/// いいね数などカウンターの正となる値を取得するポート
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// 複数IDをまとめて取得する。結果に含まれないIDはバックエンド上に存在しない。
    async fn counts_for(&self, photo_ids: &[String]) -> Result<Vec<(String, i64)>, AppError>;
}
