//! Bulk actions over a selection.
//!
//! One backend call (or fetch + patch for tags) per selected id, fanned out
//! with bounded concurrency. Results are reported per id; nothing is rolled
//! back when some items fail.
//!
//! Tag edits are read-modify-write of the whole record because the backend
//! has no atomic array append. A concurrent edit of the same record between
//! the fetch and the patch is lost.

use crate::backend::CrmBackend;
use crate::error::CrmError;
use chrono::Utc;
use crm_effects::{Effect, Effectful, Recovery};
use crm_effects_derive::Effectful;
use crm_schema::draft::dedup_tags;
use crm_schema::{EntityKind, Record};
use futures::future::{AbortHandle, Abortable};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_BULK_CONCURRENCY: usize = 8;

// ── BulkAction ───────────────────────────────────────────────────────────────

/// Wire form: `{"type": "add_tag", "data": {"tag": "vip"}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Effectful)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BulkAction {
    #[effect(Mutate)]
    AddTag { tag: String },
    #[effect(Mutate)]
    RemoveTag { tag: String },
    #[effect(Mutate)]
    AssignOwner {
        #[serde(rename = "ownerId")]
        owner_id: String,
    },
    #[effect(Mutate)]
    ChangeStage {
        #[serde(rename = "stageId")]
        stage_id: String,
    },
    #[effect(Mutate)]
    MarkComplete,
    #[effect(Mutate)]
    MarkIncomplete,
    #[effect(Observe)]
    Export,
    #[effect(Irreversible)]
    Delete,
}

impl BulkAction {
    pub fn kind_name(&self) -> &'static str {
        match self {
            BulkAction::AddTag { .. } => "add_tag",
            BulkAction::RemoveTag { .. } => "remove_tag",
            BulkAction::AssignOwner { .. } => "assign_owner",
            BulkAction::ChangeStage { .. } => "change_stage",
            BulkAction::MarkComplete => "mark_complete",
            BulkAction::MarkIncomplete => "mark_incomplete",
            BulkAction::Export => "export",
            BulkAction::Delete => "delete",
        }
    }

    pub fn supported_for(&self, kind: EntityKind) -> bool {
        match self {
            BulkAction::AddTag { .. } | BulkAction::RemoveTag { .. } => kind != EntityKind::Task,
            BulkAction::ChangeStage { .. } => kind == EntityKind::Deal,
            BulkAction::MarkComplete | BulkAction::MarkIncomplete => kind == EntityKind::Task,
            BulkAction::AssignOwner { .. } | BulkAction::Export | BulkAction::Delete => true,
        }
    }

    /// Payload checks that need no backend state.
    pub fn validate(&self) -> Result<(), CrmError> {
        let blank = match self {
            BulkAction::AddTag { tag } | BulkAction::RemoveTag { tag } => {
                tag.trim().is_empty().then_some("tag")
            }
            BulkAction::AssignOwner { owner_id } => owner_id.trim().is_empty().then_some("ownerId"),
            BulkAction::ChangeStage { stage_id } => stage_id.trim().is_empty().then_some("stageId"),
            _ => None,
        };
        match blank {
            Some(field) => Err(crm_schema::ValidationError::MissingField(field).into()),
            None => Ok(()),
        }
    }
}

// ── BulkReport ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ItemStatus<R> {
    /// The backend accepted the call. Carries the returned record when there
    /// is one (patches, export); deletes carry nothing.
    Done(Option<R>),
    /// Nothing to change, so no call was made.
    Unchanged,
    Failed { error: CrmError, recovery: Recovery },
    /// Aborted by a newer bulk action or an explicit cancel.
    Cancelled,
}

#[derive(Debug)]
pub struct BulkItem<R> {
    pub id: String,
    pub status: ItemStatus<R>,
}

/// Per-id outcome of one bulk action, in selection order.
#[derive(Debug)]
pub struct BulkReport<R> {
    pub action: BulkAction,
    pub kind: EntityKind,
    pub generation: u64,
    pub items: Vec<BulkItem<R>>,
}

impl<R> BulkReport<R> {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.status, ItemStatus::Done(_) | ItemStatus::Unchanged))
            .count()
    }

    pub fn failed(&self) -> Vec<&BulkItem<R>> {
        self.items
            .iter()
            .filter(|item| matches!(item.status, ItemStatus::Failed { .. }))
            .collect()
    }

    pub fn cancelled(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.status, ItemStatus::Cancelled))
            .count()
    }

    pub fn is_complete_success(&self) -> bool {
        self.succeeded() == self.total()
    }

    pub fn records(&self) -> Vec<&R> {
        self.items
            .iter()
            .filter_map(|item| match &item.status {
                ItemStatus::Done(Some(record)) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn into_records(self) -> Vec<R> {
        self.items
            .into_iter()
            .filter_map(|item| match item.status {
                ItemStatus::Done(Some(record)) => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Ids worth offering a retry for: cancelled items and failures whose
    /// recovery is not manual review.
    pub fn retryable_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| match &item.status {
                ItemStatus::Cancelled => true,
                ItemStatus::Failed { recovery, .. } => *recovery != Recovery::ManualReview,
                _ => false,
            })
            .map(|item| item.id.clone())
            .collect()
    }

    /// All-or-nothing view: any failed item fails the whole action.
    pub fn into_result(self) -> Result<Self, CrmError> {
        let failed = self.failed().len();
        if failed > 0 {
            return Err(CrmError::BulkFailed {
                action: self.action.kind_name(),
                failed,
                total: self.total(),
            });
        }
        if self.cancelled() > 0 {
            return Err(CrmError::Cancelled);
        }
        Ok(self)
    }
}

// ── BulkDispatcher ───────────────────────────────────────────────────────────

/// Runs bulk actions. Starting a new mutating action on a kind aborts the
/// unfinished items of the previous one on that same kind. Read-only actions
/// (export) never supersede anything and are never superseded.
#[derive(Debug)]
pub struct BulkDispatcher {
    concurrency: usize,
    generation: AtomicU64,
    in_flight: Mutex<HashMap<EntityKind, (u64, AbortHandle)>>,
}

impl Default for BulkDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BULK_CONCURRENCY)
    }
}

impl BulkDispatcher {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Abort every mutating bulk action still running. Returns whether there
    /// was one.
    pub fn cancel_in_flight(&self) -> bool {
        let running: Vec<_> = self.in_flight.lock().drain().collect();
        for (kind, (generation, handle)) in &running {
            handle.abort();
            tracing::debug!(%kind, generation, "bulk action cancelled");
        }
        !running.is_empty()
    }

    /// Abort the mutating bulk action running on `kind`, if any.
    pub fn cancel_kind(&self, kind: EntityKind) -> bool {
        match self.in_flight.lock().remove(&kind) {
            Some((generation, handle)) => {
                handle.abort();
                tracing::debug!(%kind, generation, "bulk action cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn dispatch<R, B>(
        &self,
        backend: &B,
        ids: &[String],
        action: &BulkAction,
    ) -> Result<BulkReport<R>, CrmError>
    where
        R: Record,
        B: CrmBackend,
    {
        if ids.is_empty() {
            return Err(CrmError::EmptySelection);
        }
        if !action.supported_for(R::KIND) {
            return Err(CrmError::Unsupported {
                action: action.kind_name(),
                kind: R::KIND,
            });
        }
        action.validate()?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (handle, registration) = AbortHandle::new_pair();
        let tracked = action.effect() != Effect::Observe;
        if tracked {
            if let Some((previous, old)) = self.in_flight.lock().insert(R::KIND, (generation, handle)) {
                old.abort();
                tracing::debug!(kind = %R::KIND, previous, generation, "superseded bulk action");
            }
        }

        tracing::info!(
            action = action.kind_name(),
            kind = %R::KIND,
            total = ids.len(),
            generation,
            "bulk action started"
        );

        let recovery = action.effect().recovery();
        let mut outcomes: Vec<Option<ItemStatus<R>>> = ids.iter().map(|_| None).collect();
        let work = stream::iter(ids.iter().enumerate())
            .map(|(index, id)| async move { (index, apply_one::<R, B>(backend, id, action).await) })
            .buffer_unordered(self.concurrency);
        let mut work = Abortable::new(work, registration);

        while let Some((index, result)) = work.next().await {
            outcomes[index] = Some(match result {
                Ok(status) => status,
                Err(error) => {
                    tracing::warn!(id = %ids[index], %error, "bulk item failed");
                    let recovery = error.recovery_hint(recovery);
                    ItemStatus::Failed { error, recovery }
                }
            });
        }

        if tracked {
            let mut in_flight = self.in_flight.lock();
            if matches!(in_flight.get(&R::KIND), Some((current, _)) if *current == generation) {
                in_flight.remove(&R::KIND);
            }
        }

        let items: Vec<BulkItem<R>> = ids
            .iter()
            .zip(outcomes)
            .map(|(id, status)| BulkItem {
                id: id.clone(),
                status: status.unwrap_or(ItemStatus::Cancelled),
            })
            .collect();
        let report = BulkReport {
            action: action.clone(),
            kind: R::KIND,
            generation,
            items,
        };

        tracing::info!(
            action = action.kind_name(),
            kind = %R::KIND,
            succeeded = report.succeeded(),
            failed = report.failed().len(),
            cancelled = report.cancelled(),
            "bulk action settled"
        );
        Ok(report)
    }
}

async fn apply_one<R, B>(backend: &B, id: &str, action: &BulkAction) -> Result<ItemStatus<R>, CrmError>
where
    R: Record,
    B: CrmBackend,
{
    match action {
        BulkAction::AddTag { tag } | BulkAction::RemoveTag { tag } => {
            let mut record: R = backend.fetch(id).await?;
            let Some(tags) = record.tags_mut() else {
                return Err(CrmError::Unsupported {
                    action: action.kind_name(),
                    kind: R::KIND,
                });
            };
            let tag = tag.trim();
            let next = match action {
                BulkAction::AddTag { .. } => {
                    let mut next = tags.clone();
                    next.push(tag.to_string());
                    dedup_tags(next)
                }
                _ => dedup_tags(tags.iter().filter(|t| t.trim() != tag).cloned().collect()),
            };
            if next == *tags {
                return Ok(ItemStatus::Unchanged);
            }
            *tags = next;
            let body = serde_json::to_value(&record)?;
            let updated: R = backend.patch(id, &body).await?;
            Ok(ItemStatus::Done(Some(updated)))
        }
        BulkAction::AssignOwner { owner_id } => {
            let updated: R = backend.patch(id, &json!({ "ownerId": owner_id })).await?;
            Ok(ItemStatus::Done(Some(updated)))
        }
        BulkAction::ChangeStage { stage_id } => {
            let body = json!({ "stage": stage_id, "lastActivityAt": Utc::now() });
            let updated: R = backend.patch(id, &body).await?;
            Ok(ItemStatus::Done(Some(updated)))
        }
        BulkAction::MarkComplete | BulkAction::MarkIncomplete => {
            let completed = matches!(action, BulkAction::MarkComplete);
            let updated: R = backend.patch(id, &json!({ "completed": completed })).await?;
            Ok(ItemStatus::Done(Some(updated)))
        }
        BulkAction::Export => {
            let record: R = backend.fetch(id).await?;
            Ok(ItemStatus::Done(Some(record)))
        }
        BulkAction::Delete => {
            backend.delete(R::KIND, id).await?;
            Ok(ItemStatus::Done(None))
        }
    }
}
