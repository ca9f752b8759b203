use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Photo,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "photo" => Some(MediaType::Photo),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }
}

/// 写真ウォールに表示されるメディア1件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Photo {
    pub id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user_description: Option<String>,
    /// 作成時刻（UNIXミリ秒）。表示順のキー
    pub timestamp: i64,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(rename = "type", default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl Photo {
    pub fn new(id: impl Into<String>, url: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            event_id: None,
            url: url.into(),
            caption: None,
            author: None,
            tags: Vec::new(),
            user_description: None,
            timestamp,
            likes_count: 0,
            media_type: MediaType::Photo,
            duration: None,
        }
    }

    pub fn with_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_likes(mut self, likes_count: i64) -> Self {
        self.likes_count = likes_count;
        self
    }

    /// パッチをマージし、値が変わったかどうかを返す
    pub fn apply_patch(&mut self, patch: &PhotoPatch) -> bool {
        let mut changed = false;
        changed |= assign(&mut self.caption, patch.caption.clone().map(Some));
        changed |= assign(&mut self.author, patch.author.clone().map(Some));
        changed |= assign(&mut self.tags, patch.tags.clone());
        changed |= assign(
            &mut self.user_description,
            patch.user_description.clone().map(Some),
        );
        changed |= assign(&mut self.duration, patch.duration.map(Some));
        changed |= assign(&mut self.likes_count, patch.likes_count);
        changed
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) if *slot != value => {
            *slot = value;
            true
        }
        _ => false,
    }
}

/// 既存エントリへの部分更新。`None` のフィールドは変更しない
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes_count: Option<i64>,
}

impl PhotoPatch {
    pub fn likes(likes_count: i64) -> Self {
        Self {
            likes_count: Some(likes_count),
            ..Default::default()
        }
    }

    /// 説明系フィールドのみを取り出す（カウンターは再取得経路が所有する）
    pub fn descriptive_from(photo: &Photo) -> Self {
        Self {
            caption: photo.caption.clone(),
            author: photo.author.clone(),
            tags: Some(photo.tags.clone()),
            user_description: photo.user_description.clone(),
            duration: photo.duration,
            likes_count: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_wire_row_with_type_field() {
        let photo: Photo = serde_json::from_value(json!({
            "id": "p1",
            "url": "https://cdn.example/p1.jpg",
            "timestamp": 100,
            "likes_count": 2,
            "type": "video",
            "duration": 12.5
        }))
        .unwrap();

        assert_eq!(photo.id, "p1");
        assert_eq!(photo.media_type, MediaType::Video);
        assert_eq!(photo.duration, Some(12.5));
        assert!(photo.tags.is_empty());
    }

    #[test]
    fn apply_patch_reports_changes_only_when_values_differ() {
        let mut photo = Photo::new("p1", "u", 1).with_likes(3);

        assert!(!photo.apply_patch(&PhotoPatch::likes(3)));
        assert!(photo.apply_patch(&PhotoPatch::likes(4)));
        assert_eq!(photo.likes_count, 4);

        let patch = PhotoPatch {
            caption: Some("sunset".to_string()),
            ..Default::default()
        };
        assert!(photo.apply_patch(&patch));
        assert_eq!(photo.caption.as_deref(), Some("sunset"));
        assert_eq!(photo.likes_count, 4);
    }

    #[test]
    fn descriptive_patch_leaves_likes_untouched() {
        let mut source = Photo::new("p1", "u", 1).with_likes(99);
        source.caption = Some("new caption".to_string());
        let patch = PhotoPatch::descriptive_from(&source);

        let mut target = Photo::new("p1", "u", 1).with_likes(5);
        target.apply_patch(&patch);
        assert_eq!(target.likes_count, 5);
        assert_eq!(target.caption.as_deref(), Some("new caption"));
    }
}
