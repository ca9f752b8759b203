pub mod change_feed;
pub mod counter_source;
pub mod photo_source;
pub mod replay_queue;

pub use change_feed::{ChangeFeed, ChangeStream, FeedError};
pub use counter_source::CounterSource;
pub use photo_source::{PhotoPage, PhotoSource};
pub use replay_queue::ReplayQueue;

use std::sync::Arc;

/// 同期エンジンが利用するバックエンドポート一式
#[derive(Clone)]
pub struct SyncBackend {
    pub photos: Arc<dyn PhotoSource>,
    pub feed: Arc<dyn ChangeFeed>,
    pub replay: Arc<dyn ReplayQueue>,
    pub counters: Arc<dyn CounterSource>,
}

impl SyncBackend {
    /// 4つのポートをすべて実装する単一のバックエンドから構築
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: PhotoSource + ChangeFeed + ReplayQueue + CounterSource + 'static,
    {
        Self {
            photos: backend.clone(),
            feed: backend.clone(),
            replay: backend.clone(),
            counters: backend,
        }
    }
}
