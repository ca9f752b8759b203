use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// ウィンドウ単位でまとめられた再取得要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileBatch {
    /// ウィンドウの世代番号（単調増加）
    pub generation: u64,
    pub chunks: Vec<Vec<String>>,
}

impl ReconcileBatch {
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.chunks.iter().flatten()
    }
}

/// 再取得失敗時の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 次のウィンドウに再投入した
    Requeued { attempt: u32 },
    /// 上限に達したため破棄した
    Exhausted,
    /// より新しい世代が既に適用済み、または削除済み
    Superseded,
}

/// 高頻度のカウンター変更をIDごとに集約するバッチャー。
///
/// 最初のIDが入った時点でウィンドウを開始し、後続のIDは同じウィンドウにまとめる
/// （延長はしない）。世代番号により古い再取得結果が新しい値を上書きしないようにする。
#[derive(Debug)]
pub struct UpdateBatcher {
    window: Duration,
    chunk_size: usize,
    max_retries: u32,
    dirty: BTreeSet<String>,
    deadline: Option<Instant>,
    generation: u64,
    /// IDごとの適用済み世代（削除時は現在の世代で封鎖する）
    watermarks: HashMap<String, u64>,
    retries: HashMap<String, u32>,
}

impl UpdateBatcher {
    pub fn new(window: Duration, chunk_size: usize, max_retries: u32) -> Self {
        Self {
            window,
            chunk_size: chunk_size.max(1),
            max_retries,
            dirty: BTreeSet::new(),
            deadline: None,
            generation: 0,
            watermarks: HashMap::new(),
            retries: HashMap::new(),
        }
    }

    /// IDをダーティとしてマーク。新しいウィンドウを開始した場合は true
    pub fn mark_dirty(&mut self, id: &str, now: Instant) -> bool {
        self.dirty.insert(id.to_string());
        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
            return true;
        }
        false
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.dirty.contains(id)
    }

    /// ダーティ集合を入れ替えて、新しい世代のバッチを払い出す
    pub fn take_batch(&mut self) -> Option<ReconcileBatch> {
        self.deadline = None;
        if self.dirty.is_empty() {
            return None;
        }

        let ids: Vec<String> = std::mem::take(&mut self.dirty).into_iter().collect();
        self.generation += 1;

        Some(ReconcileBatch {
            generation: self.generation,
            chunks: ids
                .chunks(self.chunk_size)
                .map(|chunk| chunk.to_vec())
                .collect(),
        })
    }

    /// 再取得結果を適用してよいか判定し、よければ世代を記録する
    pub fn accept(&mut self, id: &str, generation: u64) -> bool {
        if self.is_superseded(id, generation) {
            return false;
        }
        self.watermarks.insert(id.to_string(), generation);
        self.retries.remove(id);
        true
    }

    pub fn record_failure(&mut self, id: &str, generation: u64, now: Instant) -> RetryDecision {
        if self.is_superseded(id, generation) {
            return RetryDecision::Superseded;
        }

        let attempt = self.retries.entry(id.to_string()).or_insert(0);
        *attempt += 1;
        if *attempt > self.max_retries {
            let attempt = *attempt;
            self.retries.remove(id);
            tracing::debug!(photo_id = id, attempt, "reconcile retries exhausted");
            return RetryDecision::Exhausted;
        }

        let attempt = *attempt;
        self.mark_dirty(id, now);
        RetryDecision::Requeued { attempt }
    }

    /// 削除されたIDを忘れる。処理中の再取得結果はすべて破棄される
    pub fn forget(&mut self, id: &str) {
        self.dirty.remove(id);
        self.retries.remove(id);
        self.watermarks.insert(id.to_string(), self.generation);
        if self.dirty.is_empty() {
            self.deadline = None;
        }
    }

    pub fn clear(&mut self) {
        self.dirty.clear();
        self.deadline = None;
        self.watermarks.clear();
        self.retries.clear();
    }

    fn is_superseded(&self, id: &str, generation: u64) -> bool {
        self.watermarks
            .get(id)
            .is_some_and(|&watermark| generation <= watermark)
    }
}
