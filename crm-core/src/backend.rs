//! The remote store seen from the client.
//!
//! The backend is an opaque collaborator: REST endpoints, a hosted database
//! client, or the in-memory store used for demos and tests. Everything above
//! this trait talks to it only through these calls.

use crate::error::CrmError;
use crate::filter::Filter;
use crm_schema::{Activity, Draft, EntityKind, Pipeline, Record};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 25;

// ── ListQuery ────────────────────────────────────────────────────────────────

/// One page of a filtered collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter: None,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ListQuery {
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::default()
        }
    }

    /// Stable text form, used as the cache key for this page.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Offset/limit of this page over a result set of `total` rows.
    pub fn window(&self, total: usize) -> std::ops::Range<usize> {
        let size = self.page_size.max(1) as usize;
        let start = (self.page as usize).saturating_mul(size).min(total);
        let end = start.saturating_add(size).min(total);
        start..end
    }
}

// ── CrmBackend ───────────────────────────────────────────────────────────────

/// Remote CRUD over CRM records.
///
/// Mutations follow partial-patch semantics: `patch` merges the given JSON
/// object into the stored record and returns the authoritative result. There
/// is no atomic array append and no transaction spanning several calls.
pub trait CrmBackend {
    /// One page of records matching `query`.
    async fn list<R: Record>(&self, query: &ListQuery) -> Result<Vec<R>, CrmError>;

    /// A single record by id.
    async fn fetch<R: Record>(&self, id: &str) -> Result<R, CrmError>;

    /// Create from a draft; the backend assigns id and timestamps.
    async fn create<D: Draft>(&self, draft: &D) -> Result<D::Output, CrmError>;

    /// Merge `body` (a JSON object) into the record.
    async fn patch<R: Record>(&self, id: &str, body: &serde_json::Value) -> Result<R, CrmError>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), CrmError>;

    /// The deal pipeline configuration.
    async fn stages(&self) -> Result<Pipeline, CrmError>;

    /// Activity feed entries with an id greater than `after`.
    async fn activity_after(&self, after: i64) -> Result<Vec<Activity>, CrmError>;

    /// Id of the newest feed entry, without reading the feed.
    async fn latest_activity_id(&self) -> Result<i64, CrmError>;
}

// ── Patch semantics ──────────────────────────────────────────────────────────

/// Keys only the backend may write. Client values for them are ignored.
pub const SERVER_OWNED_KEYS: [&str; 4] = ["id", "orgId", "createdAt", "updatedAt"];

/// Shallow merge of a JSON object patch into a stored record. Top-level keys
/// in `patch` replace the stored value; `null` clears it. Server-owned keys
/// are skipped.
pub fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) else {
        return;
    };
    for (key, value) in patch {
        if SERVER_OWNED_KEYS.contains(&key.as_str()) {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_skips_server_owned_keys() {
        let mut record = json!({"id": "c-1", "orgId": "org-1", "status": "lead", "tags": ["a"]});
        merge_patch(
            &mut record,
            &json!({"id": "evil", "orgId": "other", "status": "customer", "tags": []}),
        );
        assert_eq!(
            record,
            json!({"id": "c-1", "orgId": "org-1", "status": "customer", "tags": []})
        );
    }

    #[test]
    fn window_clamps_to_total() {
        let query = ListQuery {
            page: 2,
            page_size: 10,
            ..ListQuery::default()
        };
        assert_eq!(query.window(25), 20..25);
        assert_eq!(query.window(5), 5..5);
    }

    #[test]
    fn cache_key_distinguishes_pages() {
        let first = ListQuery::default();
        let second = ListQuery {
            page: 1,
            ..ListQuery::default()
        };
        assert_ne!(first.cache_key(), second.cache_key());
    }
}
