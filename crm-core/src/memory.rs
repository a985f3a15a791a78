//! In-process backend for demos, offline use and tests.
//!
//! Records are kept as JSON so patches merge exactly the way the REST server
//! merges them. Every call is journaled so tests can assert on traffic.

use crate::backend::{merge_patch, CrmBackend, ListQuery};
use crate::error::CrmError;
use chrono::Utc;
use crm_schema::{Activity, ActivityAction, Draft, EntityKind, Pipeline, Record};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    List { kind: EntityKind, page: u32 },
    Fetch { kind: EntityKind, id: String },
    Create { kind: EntityKind },
    Patch { kind: EntityKind, id: String, body: serde_json::Value },
    Delete { kind: EntityKind, id: String },
    Stages,
    Activity { after: i64 },
    LatestActivity,
}

impl BackendCall {
    /// Whether the call writes backend state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            BackendCall::Create { .. } | BackendCall::Patch { .. } | BackendCall::Delete { .. }
        )
    }
}

/// Calls kept in the journal; older ones are dropped.
pub const CALL_JOURNAL_LIMIT: usize = 1024;

#[derive(Default)]
struct MemoryState {
    records: HashMap<EntityKind, Vec<serde_json::Value>>,
    activity: Vec<Activity>,
    calls: VecDeque<BackendCall>,
    failing: HashSet<String>,
    next_id: u64,
}

pub struct InMemoryBackend {
    org_id: String,
    pipeline: RwLock<Pipeline>,
    state: RwLock<MemoryState>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_pipeline(Pipeline::standard())
    }

    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        Self {
            org_id: "org-demo".to_string(),
            pipeline: RwLock::new(pipeline),
            state: RwLock::new(MemoryState::default()),
        }
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Insert records as they are, without journaling or activity.
    pub fn seed<R: Record>(&self, records: Vec<R>) {
        let mut state = self.state.write();
        let rows = state.records.entry(R::KIND).or_default();
        for record in records {
            match serde_json::to_value(&record) {
                Ok(value) => {
                    rows.retain(|row| row_id(row) != Some(record.id()));
                    rows.push(value);
                }
                Err(err) => tracing::warn!(id = record.id(), %err, "seed record skipped"),
            }
        }
    }

    /// Direct read that bypasses the call journal.
    pub fn get<R: Record>(&self, id: &str) -> Option<R> {
        let state = self.state.read();
        state
            .records
            .get(&R::KIND)?
            .iter()
            .find(|row| row_id(row) == Some(id))
            .and_then(|row| serde_json::from_value(row.clone()).ok())
    }

    pub fn all<R: Record>(&self) -> Vec<R> {
        let state = self.state.read();
        state
            .records
            .get(&R::KIND)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| serde_json::from_value(row.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.read().calls.iter().cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.state.write().calls.clear();
    }

    /// Make every patch and delete of `id` fail with a 503.
    pub fn fail_mutations_for(&self, id: impl Into<String>) {
        self.state.write().failing.insert(id.into());
    }

    pub fn heal(&self, id: &str) {
        self.state.write().failing.remove(id);
    }

    /// Append an activity entry as if another client had changed `record_id`.
    pub fn push_activity(&self, kind: EntityKind, record_id: &str, action: ActivityAction) -> i64 {
        let mut state = self.state.write();
        append_activity(&mut state, kind, record_id, action, None)
    }

    fn record(&self, call: BackendCall) {
        let mut state = self.state.write();
        if state.calls.len() == CALL_JOURNAL_LIMIT {
            state.calls.pop_front();
        }
        state.calls.push_back(call);
    }

    fn check_failing(&self, id: &str) -> Result<(), CrmError> {
        if self.state.read().failing.contains(id) {
            return Err(CrmError::Http {
                status: 503,
                message: format!("injected failure for '{id}'"),
            });
        }
        Ok(())
    }
}

fn row_id(row: &serde_json::Value) -> Option<&str> {
    row.get("id").and_then(serde_json::Value::as_str)
}

fn append_activity(
    state: &mut MemoryState,
    kind: EntityKind,
    record_id: &str,
    action: ActivityAction,
    details: Option<serde_json::Value>,
) -> i64 {
    let id = state.activity.last().map(|a| a.id).unwrap_or(0) + 1;
    let verb = match action {
        ActivityAction::Created => "created",
        ActivityAction::Updated => "updated",
        ActivityAction::Deleted => "deleted",
        ActivityAction::StageChanged => "moved",
    };
    state.activity.push(Activity {
        id,
        kind,
        record_id: record_id.to_string(),
        action,
        description: format!("{kind} {record_id} {verb}"),
        details,
        timestamp: Utc::now(),
    });
    id
}

impl CrmBackend for InMemoryBackend {
    async fn list<R: Record>(&self, query: &ListQuery) -> Result<Vec<R>, CrmError> {
        self.record(BackendCall::List {
            kind: R::KIND,
            page: query.page,
        });
        let state = self.state.read();
        let rows: Vec<&serde_json::Value> = state
            .records
            .get(&R::KIND)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filter.as_ref().map_or(true, |f| f.matches(row)))
                    .collect()
            })
            .unwrap_or_default();
        rows[query.window(rows.len())]
            .iter()
            .map(|row| serde_json::from_value((*row).clone()).map_err(CrmError::from))
            .collect()
    }

    async fn fetch<R: Record>(&self, id: &str) -> Result<R, CrmError> {
        self.record(BackendCall::Fetch {
            kind: R::KIND,
            id: id.to_string(),
        });
        self.get(id).ok_or_else(|| CrmError::NotFound {
            kind: R::KIND,
            id: id.to_string(),
        })
    }

    async fn create<D: Draft>(&self, draft: &D) -> Result<D::Output, CrmError> {
        let kind = <D::Output as Record>::KIND;
        self.record(BackendCall::Create { kind });
        draft.validate(&self.pipeline.read())?;

        let mut state = self.state.write();
        state.next_id += 1;
        let id = format!("{}-{}", kind.as_str(), state.next_id);
        let record = draft.clone().into_record(id.clone(), self.org_id.clone(), Utc::now());
        let value = serde_json::to_value(&record)?;
        state.records.entry(kind).or_default().push(value);
        append_activity(&mut state, kind, &id, ActivityAction::Created, None);
        tracing::debug!(%kind, %id, "record created");
        Ok(record)
    }

    async fn patch<R: Record>(&self, id: &str, body: &serde_json::Value) -> Result<R, CrmError> {
        self.record(BackendCall::Patch {
            kind: R::KIND,
            id: id.to_string(),
            body: body.clone(),
        });
        self.check_failing(id)?;
        if !body.is_object() {
            return Err(CrmError::Http {
                status: 400,
                message: "patch body must be a JSON object".into(),
            });
        }

        let new_stage = body.get("stage").and_then(serde_json::Value::as_str);
        if let (EntityKind::Deal, Some(stage)) = (R::KIND, new_stage) {
            if !self.pipeline.read().contains(stage) {
                return Err(CrmError::UnknownStage(stage.to_string()));
            }
        }

        let mut state = self.state.write();
        let row = state
            .records
            .get_mut(&R::KIND)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
            .ok_or_else(|| CrmError::NotFound {
                kind: R::KIND,
                id: id.to_string(),
            })?;

        let old_stage = row.get("stage").cloned();
        let mut merged = row.clone();
        merge_patch(&mut merged, body);
        if let Some(object) = merged.as_object_mut() {
            object.insert("updatedAt".into(), serde_json::to_value(Utc::now())?);
        }
        let record: R = serde_json::from_value(merged.clone())?;
        *row = merged;

        let stage_moved = R::KIND == EntityKind::Deal
            && new_stage.is_some()
            && old_stage.as_ref().and_then(serde_json::Value::as_str) != new_stage;
        if stage_moved {
            let details = serde_json::json!({ "from": old_stage, "to": new_stage });
            append_activity(&mut state, R::KIND, id, ActivityAction::StageChanged, Some(details));
        } else {
            append_activity(&mut state, R::KIND, id, ActivityAction::Updated, None);
        }
        Ok(record)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), CrmError> {
        self.record(BackendCall::Delete {
            kind,
            id: id.to_string(),
        });
        self.check_failing(id)?;
        let mut state = self.state.write();
        let rows = state.records.entry(kind).or_default();
        let before = rows.len();
        rows.retain(|row| row_id(row) != Some(id));
        if rows.len() == before {
            return Err(CrmError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        append_activity(&mut state, kind, id, ActivityAction::Deleted, None);
        Ok(())
    }

    async fn stages(&self) -> Result<Pipeline, CrmError> {
        self.record(BackendCall::Stages);
        Ok(self.pipeline.read().clone())
    }

    async fn activity_after(&self, after: i64) -> Result<Vec<Activity>, CrmError> {
        self.record(BackendCall::Activity { after });
        Ok(self
            .state
            .read()
            .activity
            .iter()
            .filter(|a| a.id > after)
            .cloned()
            .collect())
    }

    async fn latest_activity_id(&self) -> Result<i64, CrmError> {
        self.record(BackendCall::LatestActivity);
        Ok(self.state.read().activity.last().map_or(0, |a| a.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Criterion, Filter, Operator};
    use crm_schema::{Contact, ContactDraft, Deal, DealDraft};
    use futures::executor::block_on;
    use serde_json::json;

    fn contact_draft(first: &str, status: &str) -> ContactDraft {
        ContactDraft {
            owner_id: "u-1".into(),
            first_name: first.into(),
            email: format!("{}@example.com", first.to_lowercase()),
            status: Some(status.into()),
            ..ContactDraft::default()
        }
    }

    #[test]
    fn create_validates_before_storing() {
        let backend = InMemoryBackend::new();
        let bad = ContactDraft {
            owner_id: "u-1".into(),
            first_name: "Ada".into(),
            email: "not-an-email".into(),
            ..ContactDraft::default()
        };
        assert!(matches!(
            block_on(backend.create(&bad)),
            Err(CrmError::Validation(_))
        ));
        assert!(backend.all::<Contact>().is_empty());
    }

    #[test]
    fn list_filters_then_pages() {
        let backend = InMemoryBackend::new();
        for (name, status) in [("Ann", "lead"), ("Bob", "customer"), ("Cy", "lead"), ("Di", "lead")] {
            block_on(backend.create(&contact_draft(name, status))).expect("create");
        }
        let query = ListQuery {
            filter: Some(Filter {
                conditions: vec![Criterion {
                    field: "status".into(),
                    operator: Operator::Equals,
                    value: "lead".into(),
                    logical_operator: None,
                }],
            }),
            page: 1,
            page_size: 2,
        };
        let page: Vec<Contact> = block_on(backend.list(&query)).expect("list");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].first_name, "Di");
    }

    #[test]
    fn patch_merges_and_keeps_server_fields() {
        let backend = InMemoryBackend::new();
        let created = block_on(backend.create(&contact_draft("Ann", "lead"))).expect("create");
        let patched: Contact = block_on(backend.patch(
            &created.id,
            &json!({"status": "customer", "orgId": "elsewhere"}),
        ))
        .expect("patch");
        assert_eq!(patched.status, "customer");
        assert_eq!(patched.org_id, "org-demo");
        assert!(patched.updated_at >= created.updated_at);
    }

    #[test]
    fn deal_patch_rejects_unknown_stage_and_journals_moves() {
        let backend = InMemoryBackend::new();
        let deal = block_on(backend.create(&DealDraft {
            owner_id: "u-1".into(),
            title: "Pilot".into(),
            value: 500.0,
            stage: "new".into(),
            ..DealDraft::default()
        }))
        .expect("create");

        let bad = block_on(backend.patch::<Deal>(&deal.id, &json!({"stage": "won"})));
        assert!(matches!(bad, Err(CrmError::UnknownStage(_))));

        block_on(backend.patch::<Deal>(&deal.id, &json!({"stage": "proposal"}))).expect("patch");
        let feed = block_on(backend.activity_after(0)).expect("feed");
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[1].action, ActivityAction::StageChanged);
        assert_eq!(block_on(backend.activity_after(1)).expect("feed").len(), 1);
    }

    #[test]
    fn delete_of_missing_record_is_not_found() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            block_on(backend.delete(EntityKind::Task, "nope")),
            Err(CrmError::NotFound { .. })
        ));
    }

    #[test]
    fn injected_failures_hit_mutations_only() {
        let backend = InMemoryBackend::new();
        let created = block_on(backend.create(&contact_draft("Ann", "lead"))).expect("create");
        backend.fail_mutations_for(created.id.clone());
        assert!(block_on(backend.fetch::<Contact>(&created.id)).is_ok());
        assert!(block_on(backend.patch::<Contact>(&created.id, &json!({"status": "x"}))).is_err());
        backend.heal(&created.id);
        assert!(block_on(backend.patch::<Contact>(&created.id, &json!({"status": "x"}))).is_ok());
        assert_eq!(
            backend.calls().iter().filter(|c| c.is_mutation()).count(),
            3
        );
    }

    #[test]
    fn call_journal_keeps_only_recent_calls() {
        let backend = InMemoryBackend::new();
        for after in 0..CALL_JOURNAL_LIMIT as i64 + 5 {
            block_on(backend.activity_after(after)).expect("feed");
        }
        let calls = backend.calls();
        assert_eq!(calls.len(), CALL_JOURNAL_LIMIT);
        assert_eq!(calls[0], BackendCall::Activity { after: 5 });
    }
}
