use crate::domain::entities::Photo;
use crate::domain::value_objects::SessionScope;
use crate::shared::error::AppError;
use async_trait::async_trait;

/// ページ単位の取得結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoPage {
    pub items: Vec<Photo>,
    pub has_more: bool,
}

/// バックエンドからの一括／ページ取得ポート。
///
/// 読み取り専用かつ冪等であり、再試行しても安全であること。
#[async_trait]
pub trait PhotoSource: Send + Sync {
    /// `page` は 1 始まり。新しい順（timestamp 降順）で返す。
    async fn fetch_page(
        &self,
        scope: &SessionScope,
        page: u32,
        page_size: u32,
    ) -> Result<PhotoPage, AppError>;
}
