use crate::entity::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Deleted,
    StageChanged,
}

/// One entry of the backend's activity feed. Clients poll it and treat every
/// entry as an invalidation of the affected collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i64,
    pub kind: EntityKind,
    pub record_id: String,
    pub action: ActivityAction,
    pub description: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Id of the newest feed entry; 0 for an empty feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCursor {
    pub latest_id: i64,
}
