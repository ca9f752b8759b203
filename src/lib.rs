//! イベント写真ウォール向けのリアルタイム同期エンジン。
//!
//! 初期ロードしたスナップショットに変更フィードの通知を適用し、高頻度の
//! カウンター変更はバッチでまとめて正の値を再取得する。プッシュ経路の取りこぼしは
//! フォールバックポーラーが再生する。

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;

pub use application::ports::SyncBackend;
pub use application::services::{FeedStatus, LoadMoreOutcome, SyncCoordinator, SyncState};
pub use domain::{ChangeEvent, ChangeKind, Photo, PhotoPatch, RawNotification, SessionScope};
pub use infrastructure::cache::{PhotoSnapshot, SharedPhotoStore};
pub use infrastructure::database::{ConnectionPool, SqliteBackend};
pub use shared::{AppConfig, AppError, SyncConfig};
