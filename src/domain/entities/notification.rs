use super::photo::{Photo, PhotoPatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const PHOTOS_TABLE: &str = "photos";
pub const LIKES_TABLE: &str = "likes";
pub const REACTIONS_TABLE: &str = "reactions";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// 変更フィードから届く行レベル通知（デコード前）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawNotification {
    pub kind: ChangeKind,
    pub table: String,
    pub scope: String,
    pub payload: Value,
    /// ポーリング再生キュー上のID。処理済みマークに使う
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_id: Option<i64>,
}

impl RawNotification {
    pub fn new(kind: ChangeKind, table: impl Into<String>, scope: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            table: table.into(),
            scope: scope.into(),
            payload,
            replay_id: None,
        }
    }

    pub fn with_replay_id(mut self, replay_id: i64) -> Self {
        self.replay_id = Some(replay_id);
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Unsupported table: {0}")]
    UnsupportedTable(String),

    #[error("Missing field `{0}` in payload")]
    MissingField(&'static str),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// 境界で一度だけデコードされた変更イベント
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Created(Photo),
    Refreshed { id: String, patch: PhotoPatch },
    Deleted { id: String },
    CounterChanged { photo_id: String },
}

impl ChangeEvent {
    /// 影響を受けるエンティティID
    pub fn entity_id(&self) -> &str {
        match self {
            ChangeEvent::Created(photo) => &photo.id,
            ChangeEvent::Refreshed { id, .. } => id,
            ChangeEvent::Deleted { id } => id,
            ChangeEvent::CounterChanged { photo_id } => photo_id,
        }
    }

    pub fn decode(raw: &RawNotification) -> Result<Self, DecodeError> {
        match raw.table.as_str() {
            PHOTOS_TABLE => match raw.kind {
                ChangeKind::Insert => Ok(ChangeEvent::Created(decode_photo(&raw.payload)?)),
                ChangeKind::Update => {
                    let photo = decode_photo(&raw.payload)?;
                    Ok(ChangeEvent::Refreshed {
                        patch: PhotoPatch::descriptive_from(&photo),
                        id: photo.id,
                    })
                }
                ChangeKind::Delete => Ok(ChangeEvent::Deleted {
                    id: string_field(&raw.payload, "id")?,
                }),
            },
            LIKES_TABLE | REACTIONS_TABLE => Ok(ChangeEvent::CounterChanged {
                photo_id: string_field(&raw.payload, "photo_id")?,
            }),
            other => Err(DecodeError::UnsupportedTable(other.to_string())),
        }
    }
}

fn decode_photo(payload: &Value) -> Result<Photo, DecodeError> {
    let photo: Photo = serde_json::from_value(payload.clone())
        .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;
    if photo.id.is_empty() {
        return Err(DecodeError::MissingField("id"));
    }
    Ok(photo)
}

fn string_field(payload: &Value, key: &'static str) -> Result<String, DecodeError> {
    match payload.get(key) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        Some(Value::Number(value)) => Ok(value.to_string()),
        Some(Value::Null) | None => Err(DecodeError::MissingField(key)),
        Some(other) => Err(DecodeError::InvalidPayload(format!(
            "`{key}` has unexpected type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(kind: ChangeKind, table: &str, payload: Value) -> RawNotification {
        RawNotification::new(kind, table, "event-1", payload)
    }

    #[test]
    fn photo_insert_decodes_to_created() {
        let event = ChangeEvent::decode(&raw(
            ChangeKind::Insert,
            "photos",
            json!({"id": "p1", "url": "u", "timestamp": 10}),
        ))
        .unwrap();

        match event {
            ChangeEvent::Created(photo) => {
                assert_eq!(photo.id, "p1");
                assert_eq!(photo.timestamp, 10);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn photo_update_never_carries_likes() {
        let event = ChangeEvent::decode(&raw(
            ChangeKind::Update,
            "photos",
            json!({"id": "p1", "url": "u", "timestamp": 10, "likes_count": 40, "caption": "hi"}),
        ))
        .unwrap();

        let ChangeEvent::Refreshed { id, patch } = event else {
            panic!("expected refresh");
        };
        assert_eq!(id, "p1");
        assert_eq!(patch.caption.as_deref(), Some("hi"));
        assert_eq!(patch.likes_count, None);
    }

    #[test]
    fn photo_delete_uses_old_record_id() {
        let event =
            ChangeEvent::decode(&raw(ChangeKind::Delete, "photos", json!({"id": "p9"}))).unwrap();
        assert_eq!(event, ChangeEvent::Deleted { id: "p9".to_string() });
    }

    #[test]
    fn likes_and_reactions_become_counter_changes_for_any_kind() {
        for kind in [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete] {
            for table in ["likes", "reactions"] {
                let event =
                    ChangeEvent::decode(&raw(kind, table, json!({"photo_id": "p1", "id": 7})))
                        .unwrap();
                assert_eq!(
                    event,
                    ChangeEvent::CounterChanged {
                        photo_id: "p1".to_string()
                    }
                );
            }
        }
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert_eq!(
            ChangeEvent::decode(&raw(ChangeKind::Delete, "photos", json!({}))),
            Err(DecodeError::MissingField("id"))
        );
        assert!(matches!(
            ChangeEvent::decode(&raw(ChangeKind::Insert, "photos", json!({"id": "p1"}))),
            Err(DecodeError::InvalidPayload(_))
        ));
        assert!(matches!(
            ChangeEvent::decode(&raw(ChangeKind::Insert, "likes", json!({"photo_id": ["x"]}))),
            Err(DecodeError::InvalidPayload(_))
        ));
        assert_eq!(
            ChangeEvent::decode(&raw(ChangeKind::Insert, "comments", json!({}))),
            Err(DecodeError::UnsupportedTable("comments".to_string()))
        );
    }

    #[test]
    fn raw_notification_round_trips_kind_in_uppercase() {
        let value = serde_json::to_value(raw(ChangeKind::Insert, "likes", json!({}))).unwrap();
        assert_eq!(value["kind"], "INSERT");
        assert!(value.get("replay_id").is_none());
    }
}
