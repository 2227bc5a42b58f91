use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildProfile {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub age: Option<i32>,
    /// Open key-value map of free-form preference strings.
    pub favorites: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
