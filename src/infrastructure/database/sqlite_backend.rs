use super::connection_pool::ConnectionPool;
use super::local_feed::LocalChangeFeed;
use crate::application::ports::{
    ChangeFeed, ChangeStream, CounterSource, PhotoPage, PhotoSource, ReplayQueue,
};
use crate::domain::entities::notification::{LIKES_TABLE, PHOTOS_TABLE};
use crate::domain::entities::{ChangeKind, MediaType, Photo, RawNotification};
use crate::domain::value_objects::SessionScope;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

const REPLAY_BATCH_LIMIT: i64 = 500;

/// SQLite 上の写真ウォール用バックエンド。
///
/// 書き込みヘルパーは同一トランザクションで `change_log` に変更を記録し、
/// コミット後に `LocalChangeFeed` へ配信する。未処理の記録は再生キューとして返す。
#[derive(Clone)]
pub struct SqliteBackend {
    pool: ConnectionPool,
    feed: LocalChangeFeed,
}

impl SqliteBackend {
    pub fn new(pool: ConnectionPool) -> Self {
        Self::with_feed(pool, LocalChangeFeed::default())
    }

    pub fn with_feed(pool: ConnectionPool, feed: LocalChangeFeed) -> Self {
        Self { pool, feed }
    }

    pub fn feed(&self) -> &LocalChangeFeed {
        &self.feed
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// 写真を登録し、change_log のIDを返す
    pub async fn insert_photo(&self, photo: &Photo) -> Result<i64, AppError> {
        let event_id = photo
            .event_id
            .clone()
            .ok_or_else(|| AppError::InvalidInput("Photo must belong to an event".to_string()))?;
        let now = Utc::now().timestamp_millis();

        let mut tx = self.pool.get_pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO photos (
                id, event_id, url, caption, author, tags, user_description,
                timestamp, media_type, duration, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&photo.id)
        .bind(&event_id)
        .bind(&photo.url)
        .bind(&photo.caption)
        .bind(&photo.author)
        .bind(serde_json::to_string(&photo.tags)?)
        .bind(&photo.user_description)
        .bind(photo.timestamp)
        .bind(photo.media_type.as_str())
        .bind(photo.duration)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut stored = photo.clone();
        stored.likes_count = 0;
        let payload = serde_json::to_value(&stored)?;
        let notification =
            append_change(&mut tx, &event_id, ChangeKind::Insert, PHOTOS_TABLE, payload).await?;
        tx.commit().await?;

        Ok(self.publish(notification))
    }

    /// 説明系フィールドを更新する。対象がなければ false
    pub async fn update_photo_metadata(&self, photo: &Photo) -> Result<bool, AppError> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.get_pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE photos
            SET caption = ?,
                author = ?,
                tags = ?,
                user_description = ?,
                duration = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&photo.caption)
        .bind(&photo.author)
        .bind(serde_json::to_string(&photo.tags)?)
        .bind(&photo.user_description)
        .bind(photo.duration)
        .bind(now)
        .bind(&photo.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let row = sqlx::query(&format!("{PHOTO_SELECT} WHERE p.id = ?"))
            .bind(&photo.id)
            .fetch_one(&mut *tx)
            .await?;
        let updated = row_to_photo(&row)?;
        let event_id = updated.event_id.clone().unwrap_or_default();
        let payload = serde_json::to_value(&updated)?;
        let notification =
            append_change(&mut tx, &event_id, ChangeKind::Update, PHOTOS_TABLE, payload).await?;
        tx.commit().await?;

        self.publish(notification);
        Ok(true)
    }

    pub async fn delete_photo(&self, photo_id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;

        let event_id: Option<String> = sqlx::query("SELECT event_id FROM photos WHERE id = ?")
            .bind(photo_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.try_get("event_id"))
            .transpose()?;
        let Some(event_id) = event_id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM likes WHERE photo_id = ?")
            .bind(photo_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM photos WHERE id = ?")
            .bind(photo_id)
            .execute(&mut *tx)
            .await?;

        let payload = json!({ "id": photo_id, "event_id": event_id });
        let notification =
            append_change(&mut tx, &event_id, ChangeKind::Delete, PHOTOS_TABLE, payload).await?;
        tx.commit().await?;

        self.publish(notification);
        Ok(true)
    }

    /// いいねを追加し、いいねのIDを返す
    pub async fn add_like(&self, photo_id: &str) -> Result<String, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;

        let event_id: String = sqlx::query("SELECT event_id FROM photos WHERE id = ?")
            .bind(photo_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Photo not found: {photo_id}")))?
            .try_get("event_id")?;

        let like_id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO likes (id, photo_id, created_at) VALUES (?, ?, ?)")
            .bind(&like_id)
            .bind(photo_id)
            .bind(Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;

        let payload = json!({ "id": like_id, "photo_id": photo_id });
        let notification =
            append_change(&mut tx, &event_id, ChangeKind::Insert, LIKES_TABLE, payload).await?;
        tx.commit().await?;

        self.publish(notification);
        Ok(like_id)
    }

    pub async fn remove_like(&self, like_id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;

        let row = sqlx::query(
            r#"
            SELECT l.photo_id, p.event_id
            FROM likes l
            JOIN photos p ON p.id = l.photo_id
            WHERE l.id = ?
            "#,
        )
        .bind(like_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let photo_id: String = row.try_get("photo_id")?;
        let event_id: String = row.try_get("event_id")?;

        sqlx::query("DELETE FROM likes WHERE id = ?")
            .bind(like_id)
            .execute(&mut *tx)
            .await?;

        let payload = json!({ "id": like_id, "photo_id": photo_id });
        let notification =
            append_change(&mut tx, &event_id, ChangeKind::Delete, LIKES_TABLE, payload).await?;
        tx.commit().await?;

        self.publish(notification);
        Ok(true)
    }

    fn publish(&self, notification: RawNotification) -> i64 {
        let replay_id = notification.replay_id.unwrap_or_default();
        let delivered = self.feed.publish(notification);
        debug!(replay_id, delivered, "Published change notification");
        replay_id
    }
}

const PHOTO_SELECT: &str = r#"
    SELECT p.id, p.event_id, p.url, p.caption, p.author, p.tags, p.user_description,
           p.timestamp, p.media_type, p.duration,
           (SELECT COUNT(*) FROM likes l WHERE l.photo_id = p.id) AS likes_count
    FROM photos p
"#;

fn row_to_photo(row: &SqliteRow) -> Result<Photo, AppError> {
    let tags: String = row.try_get("tags")?;
    let media_type: String = row.try_get("media_type")?;
    let media_type = MediaType::from_str(&media_type)
        .ok_or_else(|| AppError::ValidationError(format!("Unknown media type: {media_type}")))?;

    Ok(Photo {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        url: row.try_get("url")?,
        caption: row.try_get("caption")?,
        author: row.try_get("author")?,
        tags: serde_json::from_str(&tags)?,
        user_description: row.try_get("user_description")?,
        timestamp: row.try_get("timestamp")?,
        likes_count: row.try_get("likes_count")?,
        media_type,
        duration: row.try_get("duration")?,
    })
}

async fn append_change(
    tx: &mut Transaction<'_, Sqlite>,
    event_id: &str,
    kind: ChangeKind,
    table: &str,
    payload: Value,
) -> Result<RawNotification, AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO change_log (event_id, kind, table_name, payload, processed, created_at)
        VALUES (?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(event_id)
    .bind(kind.as_str())
    .bind(table)
    .bind(payload.to_string())
    .bind(Utc::now().timestamp_millis())
    .execute(&mut **tx)
    .await?;

    Ok(RawNotification::new(kind, table, event_id, payload).with_replay_id(result.last_insert_rowid()))
}

#[async_trait]
impl PhotoSource for SqliteBackend {
    async fn fetch_page(
        &self,
        scope: &SessionScope,
        page: u32,
        page_size: u32,
    ) -> Result<PhotoPage, AppError> {
        if page == 0 || page_size == 0 {
            return Err(AppError::InvalidInput(format!(
                "Invalid page request: page={page}, page_size={page_size}"
            )));
        }
        let offset = i64::from(page - 1) * i64::from(page_size);

        let rows = sqlx::query(&format!(
            "{PHOTO_SELECT} WHERE p.event_id = ? ORDER BY p.timestamp DESC, p.id ASC LIMIT ? OFFSET ?"
        ))
        .bind(scope.as_str())
        .bind(i64::from(page_size) + 1)
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;

        let has_more = rows.len() > page_size as usize;
        let items = rows
            .iter()
            .take(page_size as usize)
            .map(row_to_photo)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PhotoPage { items, has_more })
    }
}

#[async_trait]
impl ChangeFeed for SqliteBackend {
    async fn subscribe(&self, scope: &SessionScope) -> Result<ChangeStream, AppError> {
        self.feed.subscribe(scope).await
    }
}

#[async_trait]
impl ReplayQueue for SqliteBackend {
    async fn poll_unprocessed(
        &self,
        scope: &SessionScope,
    ) -> Result<Vec<RawNotification>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, kind, table_name, payload
            FROM change_log
            WHERE event_id = ? AND processed = 0
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(scope.as_str())
        .bind(REPLAY_BATCH_LIMIT)
        .fetch_all(self.pool.get_pool())
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let kind: String = row.try_get("kind")?;
            let Some(kind) = ChangeKind::from_str(&kind) else {
                warn!(replay_id = id, kind = %kind, "Skipping change_log row with unknown kind");
                self.mark_processed(id).await?;
                continue;
            };
            let payload: String = row.try_get("payload")?;
            // 壊れた payload はデコード段階で破棄・処理済みにされる
            let payload = serde_json::from_str(&payload).unwrap_or(Value::Null);

            pending.push(
                RawNotification::new(
                    kind,
                    row.try_get::<String, _>("table_name")?,
                    row.try_get::<String, _>("event_id")?,
                    payload,
                )
                .with_replay_id(id),
            );
        }
        Ok(pending)
    }

    async fn mark_processed(&self, replay_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE change_log SET processed = 1 WHERE id = ?")
            .bind(replay_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CounterSource for SqliteBackend {
    async fn counts_for(&self, photo_ids: &[String]) -> Result<Vec<(String, i64)>, AppError> {
        if photo_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; photo_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT p.id AS id, COUNT(l.id) AS likes_count
            FROM photos p
            LEFT JOIN likes l ON l.photo_id = p.id
            WHERE p.id IN ({placeholders})
            GROUP BY p.id
            "#
        );
        let mut query = sqlx::query(&sql);
        for id in photo_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(self.pool.get_pool()).await?;
        rows.iter()
            .map(|row| -> Result<(String, i64), AppError> {
                Ok((row.try_get("id")?, row.try_get("likes_count")?))
            })
            .collect()
    }
}
