use crate::domain::value_objects::SessionScope;
use serde::Serialize;

/// セッションスコープごとのライフサイクル状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "scope", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Loading(SessionScope),
    Live(SessionScope),
}

impl SyncState {
    pub fn scope(&self) -> Option<&SessionScope> {
        match self {
            SyncState::Idle => None,
            SyncState::Loading(scope) | SyncState::Live(scope) => Some(scope),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SyncState::Live(_))
    }
}

/// プッシュ購読の接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// 追加ページ読み込みの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadMoreOutcome {
    /// 取得したページ番号（これ以上ない場合は None）
    pub page: Option<u32>,
    pub added: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Pagination {
    pub next_page: u32,
    pub has_more: bool,
}
