use crate::application::ports::{PhotoPage, PhotoSource};
use crate::domain::value_objects::SessionScope;
use crate::shared::error::AppError;
use std::sync::Arc;
use tracing::debug;

/// 初期ロードと「さらに読み込む」用のページ取得。
///
/// 状態は持たない。失敗はそのまま呼び出し側へ返し、再試行方針はコーディネーターが決める。
#[derive(Clone)]
pub struct PaginatedLoader {
    source: Arc<dyn PhotoSource>,
}

impl PaginatedLoader {
    pub fn new(source: Arc<dyn PhotoSource>) -> Self {
        Self { source }
    }

    pub async fn load(
        &self,
        scope: &SessionScope,
        page: u32,
        page_size: u32,
    ) -> Result<PhotoPage, AppError> {
        if page == 0 {
            return Err(AppError::InvalidInput(
                "Page numbers start at 1".to_string(),
            ));
        }
        if page_size == 0 {
            return Err(AppError::InvalidInput(
                "Page size must be greater than 0".to_string(),
            ));
        }

        let mut result = self.source.fetch_page(scope, page, page_size).await?;

        // スコープ外の行が混ざっていても取り込まない
        let before = result.items.len();
        result.items.retain(|photo| {
            photo
                .event_id
                .as_deref()
                .map_or(true, |event_id| scope.matches(event_id))
        });
        if result.items.len() != before {
            tracing::warn!(
                scope = %scope,
                page,
                discarded = before - result.items.len(),
                "Discarded out-of-scope photos from paged fetch"
            );
        }

        debug!(
            scope = %scope,
            page,
            page_size,
            items = result.items.len(),
            has_more = result.has_more,
            "Loaded photo page"
        );
        Ok(result)
    }
}
