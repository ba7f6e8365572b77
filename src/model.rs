use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// Type tag naming one kind of host entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentType {
    pub id: i64,
    pub app_label: String,
    pub model: String,
}

/// Polymorphic reference to any persisted host entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub content_type_id: i64,
    pub object_id: String,
}

impl EntityRef {
    pub fn new(content_type_id: i64, object_id: impl Into<String>) -> Self {
        EntityRef {
            content_type_id,
            object_id: object_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: i64,
    pub user_id: UserId,
    pub content_type_id: i64,
    pub object_id: String,
    pub folder_id: Option<i64>,
    pub score: f64,
    pub shared: bool,
    pub created_on: DateTime<Utc>,
}

impl Favorite {
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.content_type_id, self.object_id.clone())
    }
}

/// Per-object entry of the batch view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStats {
    pub count: i64,
    pub is_favorite: bool,
    pub content_type_id: i64,
}

/// Payload returned by the add/remove endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub score: Option<f64>,
    #[serde(rename = "score__avg")]
    pub score_avg: Option<f64>,
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FavoritePage {
    pub favorites: Vec<Favorite>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub has_next: bool,
}
