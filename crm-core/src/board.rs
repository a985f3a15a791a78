//! Deal board: deals grouped by pipeline stage, moved by drag and drop.
//!
//! Any stage may move to any other. A move is applied locally first, then
//! sent as a PATCH, then confirmed or rolled back. Each deal keeps only its
//! latest move pending, and a rollback always lands on the last stage the
//! backend acknowledged. A late success for an older move becomes the new
//! rollback target; a late failure changes nothing.

use crate::backend::CrmBackend;
use crate::error::CrmError;
use chrono::{DateTime, Utc};
use crm_effects::{Compensable, Optimistic};
use crm_effects_derive::Effectful;
use crm_schema::{Deal, EntityKind, Pipeline, StageConfig};
use serde::Serialize;
use std::collections::HashMap;

// ── StageMove ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Effectful)]
#[effect(Mutate)]
pub struct StageMove {
    pub deal_id: String,
    pub to: String,
    pub at: DateTime<Utc>,
}

impl StageMove {
    /// `{stage, lastActivityAt}`
    pub fn patch_body(&self) -> serde_json::Value {
        serde_json::json!({ "stage": self.to, "lastActivityAt": self.at })
    }
}

impl Compensable for StageMove {
    type Target = Deal;
    type Snapshot = (String, Option<DateTime<Utc>>);

    fn snapshot(&self, deal: &Deal) -> Self::Snapshot {
        (deal.stage.clone(), deal.last_activity_at)
    }

    fn apply(&self, deal: &mut Deal) {
        deal.stage = self.to.clone();
        deal.last_activity_at = Some(self.at);
    }

    fn compensate(&self, deal: &mut Deal, (stage, last_activity_at): Self::Snapshot) {
        deal.stage = stage;
        deal.last_activity_at = last_activity_at;
    }
}

/// Handle for a move that has been applied locally and not yet answered.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveTicket {
    pub seq: u64,
    pub stage_move: StageMove,
}

#[derive(Debug)]
pub enum MoveOutcome {
    /// Dropped on its own column. No request was made.
    Unchanged,
    Confirmed(Deal),
    /// The backend refused; the card is back where it was.
    RolledBack(CrmError),
    /// A newer move of the same deal was started before this one answered.
    Superseded,
}

// ── DealBoard ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardColumn {
    pub stage: StageConfig,
    pub deals: Vec<Deal>,
    pub count: usize,
    pub total_value: f64,
}

struct PendingMove {
    seq: u64,
    optimistic: Optimistic<StageMove>,
}

pub struct DealBoard {
    pipeline: Pipeline,
    deals: Vec<Deal>,
    pending: HashMap<String, PendingMove>,
    /// Latest settled move per deal: `(seq, confirmed)`.
    settled: HashMap<String, (u64, bool)>,
    next_seq: u64,
}

impl DealBoard {
    pub fn new(pipeline: Pipeline, deals: Vec<Deal>) -> Self {
        Self {
            pipeline,
            deals,
            pending: HashMap::new(),
            settled: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn deals(&self) -> &[Deal] {
        &self.deals
    }

    pub fn deal(&self, deal_id: &str) -> Option<&Deal> {
        self.deals.iter().find(|d| d.id == deal_id)
    }

    pub fn has_pending(&self, deal_id: &str) -> bool {
        self.pending.contains_key(deal_id)
    }

    /// Columns in pipeline order. Deals on a stage the pipeline does not
    /// know are left out.
    pub fn columns(&self) -> Vec<BoardColumn> {
        self.pipeline
            .stages()
            .iter()
            .map(|stage| {
                let deals: Vec<Deal> = self
                    .deals
                    .iter()
                    .filter(|d| d.stage == stage.id)
                    .cloned()
                    .collect();
                BoardColumn {
                    stage: stage.clone(),
                    count: deals.len(),
                    total_value: deals.iter().map(|d| d.value).sum(),
                    deals,
                }
            })
            .collect()
    }

    /// Refetched deals replace local state. Pending moves are dropped; the
    /// refreshed list is authoritative.
    pub fn replace_deals(&mut self, deals: Vec<Deal>) {
        self.deals = deals;
        self.pending.clear();
        self.settled.clear();
    }

    pub fn replace_pipeline(&mut self, pipeline: Pipeline) {
        self.pipeline = pipeline;
    }

    /// Apply a drop locally. `Ok(None)` when the card was dropped on its
    /// current stage.
    ///
    /// A move started while another one of the same deal is pending replaces
    /// it. The older move is unwound first so the new snapshot is the last
    /// acknowledged state, not the older optimistic one.
    pub fn begin_move(&mut self, deal_id: &str, target_stage: &str) -> Result<Option<MoveTicket>, CrmError> {
        if !self.pipeline.contains(target_stage) {
            return Err(CrmError::UnknownStage(target_stage.to_string()));
        }
        let deal = self
            .deals
            .iter_mut()
            .find(|d| d.id == deal_id)
            .ok_or_else(|| CrmError::NotFound {
                kind: EntityKind::Deal,
                id: deal_id.to_string(),
            })?;
        if deal.stage == target_stage {
            return Ok(None);
        }

        let stage_move = StageMove {
            deal_id: deal_id.to_string(),
            to: target_stage.to_string(),
            at: Utc::now(),
        };
        tracing::debug!(deal = deal_id, from = %deal.stage, to = target_stage, "stage move applied");
        if let Some(mut previous) = self.pending.remove(deal_id) {
            previous.optimistic.rollback(deal);
        }
        let optimistic = Optimistic::apply(stage_move.clone(), deal);
        self.next_seq += 1;
        let seq = self.next_seq;
        self.pending
            .insert(deal_id.to_string(), PendingMove { seq, optimistic });
        Ok(Some(MoveTicket { seq, stage_move }))
    }

    /// Backend acknowledged. Adopts the returned record when the ticket is
    /// still the latest move of its deal; an older ticket only moves the
    /// rollback target of whatever is still pending.
    pub fn confirm(&mut self, ticket: &MoveTicket, saved: Option<Deal>) -> bool {
        let Some(mut pending) = self.take_latest(ticket) else {
            self.absorb_stale_success(ticket, saved);
            return false;
        };
        pending.optimistic.confirm();
        self.settled
            .insert(ticket.stage_move.deal_id.clone(), (ticket.seq, true));
        if let Some(saved) = saved {
            if let Some(deal) = self.deals.iter_mut().find(|d| d.id == saved.id) {
                *deal = saved;
            }
        }
        true
    }

    /// Backend refused. Restores the snapshot when the ticket is still the
    /// latest move of its deal.
    pub fn rollback(&mut self, ticket: &MoveTicket) -> bool {
        let Some(mut pending) = self.take_latest(ticket) else {
            return false;
        };
        let deal_id = &ticket.stage_move.deal_id;
        let Some(deal) = self.deals.iter_mut().find(|d| &d.id == deal_id) else {
            return false;
        };
        let restored = pending.optimistic.rollback(deal);
        self.settled.insert(deal_id.clone(), (ticket.seq, false));
        tracing::debug!(deal = %deal_id, stage = %deal.stage, "stage move rolled back");
        restored
    }

    /// Settle a ticket with the backend's answer.
    pub fn finish_move(&mut self, ticket: &MoveTicket, result: Result<Deal, CrmError>) -> MoveOutcome {
        match result {
            Ok(deal) => {
                if self.confirm(ticket, Some(deal.clone())) {
                    MoveOutcome::Confirmed(deal)
                } else {
                    MoveOutcome::Superseded
                }
            }
            Err(error) => {
                tracing::warn!(deal = %ticket.stage_move.deal_id, %error, "stage move rejected");
                if self.rollback(ticket) {
                    MoveOutcome::RolledBack(error)
                } else {
                    MoveOutcome::Superseded
                }
            }
        }
    }

    /// The backend stored an older move after a newer one was started.
    /// A pending newer move is re-based onto the saved record; a newer move
    /// that was already rolled back leaves the saved record in place.
    fn absorb_stale_success(&mut self, ticket: &MoveTicket, saved: Option<Deal>) {
        let Some(saved) = saved else {
            return;
        };
        let deal_id = &ticket.stage_move.deal_id;
        let Some(deal) = self.deals.iter_mut().find(|d| &d.id == deal_id) else {
            return;
        };
        if let Some(pending) = self.pending.get_mut(deal_id) {
            if pending.seq > ticket.seq {
                pending.optimistic.rollback(deal);
                *deal = saved;
                let change = pending.optimistic.change().clone();
                pending.optimistic = Optimistic::apply(change, deal);
                tracing::debug!(deal = %deal_id, seq = ticket.seq, "pending move re-based");
            }
            return;
        }
        if matches!(self.settled.get(deal_id), Some(&(seq, false)) if seq > ticket.seq) {
            *deal = saved;
            self.settled.insert(deal_id.clone(), (ticket.seq, true));
            tracing::debug!(deal = %deal_id, stage = %deal.stage, "late confirmation adopted");
        }
    }

    fn take_latest(&mut self, ticket: &MoveTicket) -> Option<PendingMove> {
        let deal_id = &ticket.stage_move.deal_id;
        match self.pending.get(deal_id) {
            Some(pending) if pending.seq == ticket.seq => self.pending.remove(deal_id),
            _ => None,
        }
    }
}

/// Send an applied move to the backend.
pub async fn send_move<B: CrmBackend>(backend: &B, ticket: &MoveTicket) -> Result<Deal, CrmError> {
    backend
        .patch::<Deal>(&ticket.stage_move.deal_id, &ticket.stage_move.patch_body())
        .await
}

/// Drop handler: apply, PATCH, then confirm or roll back.
pub async fn drop_card<B: CrmBackend>(
    board: &mut DealBoard,
    backend: &B,
    deal_id: &str,
    target_stage: &str,
) -> Result<MoveOutcome, CrmError> {
    let Some(ticket) = board.begin_move(deal_id, target_stage)? else {
        return Ok(MoveOutcome::Unchanged);
    };
    let result = send_move(backend, &ticket).await;
    Ok(board.finish_move(&ticket, result))
}
