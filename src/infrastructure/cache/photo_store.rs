use crate::domain::entities::{Photo, PhotoPatch};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// ソート済みの読み取りビュー
pub type PhotoSnapshot = Arc<[Photo]>;

/// IDをキーとした写真のインメモリキャッシュ。
///
/// 存在しないIDへの操作はすべて黙って無視する（再生経路で既に削除済みのIDが届くため）。
/// ソート済みビューは読み取り時に遅延計算し、次の変更まで保持する。
#[derive(Debug, Default)]
pub struct PhotoStore {
    entries: HashMap<String, Photo>,
    sorted: Option<PhotoSnapshot>,
}

impl PhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// IDで挿入または置換。内容が同一なら何もしない
    pub fn upsert(&mut self, photo: Photo) -> bool {
        if self.entries.get(&photo.id) == Some(&photo) {
            return false;
        }
        self.entries.insert(photo.id.clone(), photo);
        self.invalidate();
        true
    }

    /// 未登録の場合のみ挿入
    pub fn insert_if_absent(&mut self, photo: Photo) -> bool {
        if self.entries.contains_key(&photo.id) {
            return false;
        }
        self.entries.insert(photo.id.clone(), photo);
        self.invalidate();
        true
    }

    /// 既存エントリにフィールドをマージ
    pub fn patch(&mut self, id: &str, patch: &PhotoPatch) -> bool {
        let changed = match self.entries.get_mut(id) {
            Some(photo) => photo.apply_patch(patch),
            None => false,
        };
        if changed {
            self.invalidate();
        }
        changed
    }

    pub fn remove(&mut self, id: &str) -> Option<Photo> {
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.invalidate();
        }
        removed
    }

    pub fn clear(&mut self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        self.entries.clear();
        self.invalidate();
        true
    }

    pub fn get(&self, id: &str) -> Option<&Photo> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cached_snapshot(&self) -> Option<PhotoSnapshot> {
        self.sorted.clone()
    }

    /// timestamp 降順のビュー
    pub fn snapshot(&mut self) -> PhotoSnapshot {
        if let Some(sorted) = &self.sorted {
            return sorted.clone();
        }
        let mut photos: Vec<Photo> = self.entries.values().cloned().collect();
        photos.sort_by(newest_first);
        let sorted: PhotoSnapshot = photos.into();
        self.sorted = Some(sorted.clone());
        sorted
    }

    fn invalidate(&mut self) {
        self.sorted = None;
    }
}

fn newest_first(a: &Photo, b: &Photo) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.id.cmp(&b.id))
}

/// 適用ループと読み取り側で共有するストアハンドル。
///
/// 書き込みは適用ループのみが行う。変更があるたびにリビジョンが進む。
#[derive(Clone)]
pub struct SharedPhotoStore {
    inner: Arc<RwLock<PhotoStore>>,
    revision: Arc<watch::Sender<u64>>,
}

impl SharedPhotoStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(PhotoStore::new())),
            revision: Arc::new(revision),
        }
    }

    /// 現在のソート済みビューを取得
    pub async fn snapshot(&self) -> PhotoSnapshot {
        {
            let store = self.inner.read().await;
            if let Some(sorted) = store.cached_snapshot() {
                return sorted;
            }
        }
        let mut store = self.inner.write().await;
        store.snapshot()
    }

    pub async fn get(&self, id: &str) -> Option<Photo> {
        let store = self.inner.read().await;
        store.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        let store = self.inner.read().await;
        store.contains(id)
    }

    pub async fn len(&self) -> usize {
        let store = self.inner.read().await;
        store.len()
    }

    /// 変更通知を購読
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// ストアを変更し、変更があればリビジョンを進める
    pub(crate) async fn mutate<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut PhotoStore) -> (R, bool),
    {
        let (result, changed) = {
            let mut store = self.inner.write().await;
            f(&mut store)
        };
        if changed {
            self.revision.send_modify(|revision| *revision += 1);
        }
        result
    }

    pub(crate) async fn clear(&self) {
        self.mutate(|store| ((), store.clear())).await;
    }
}

impl Default for SharedPhotoStore {
    fn default() -> Self {
        Self::new()
    }
}
