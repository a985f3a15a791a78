use crate::state::AppState;
use crm_core::{
    drop_card, to_csv, BoardColumn, BulkAction, BulkReport, CheckState, CrmBackend, CrmError,
    DealBoard, FilterCondition, InvalidationKey, ItemStatus, ListQuery, ListView, MoveOutcome,
};
use crm_effects::Recovery;
use crm_schema::{Contact, Deal, Draft, Record};
use serde::Serialize;
use tokio::sync::Mutex;

/// Deals fetched for the board in one page.
pub const BOARD_PAGE_SIZE: u32 = 500;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPageDto<R> {
    pub rows: Vec<R>,
    pub page: u32,
    pub page_size: u32,
    pub selected_ids: Vec<String>,
    pub check_state: CheckState,
    pub active_filters: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailureDto {
    pub id: String,
    pub error: String,
    pub recovery: Recovery,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResultDto {
    pub action: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<BulkFailureDto>,
    pub cancelled: usize,
    pub retryable_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardDto {
    pub columns: Vec<BoardColumn>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResultDto {
    pub outcome: String,
    pub error: Option<String>,
    pub board: BoardDto,
}

fn err(e: CrmError) -> String {
    e.to_string()
}

fn page_of<R: Record>(view: &ListView<R>) -> ListPageDto<R> {
    ListPageDto {
        rows: view.rows().to_vec(),
        page: view.query().page,
        page_size: view.query().page_size,
        selected_ids: view.selection().ids(),
        check_state: view.selection().check_state(),
        active_filters: view.filter().active_count(),
    }
}

fn bulk_result<R>(report: &BulkReport<R>) -> BulkResultDto {
    BulkResultDto {
        action: report.action.kind_name().to_string(),
        total: report.total(),
        succeeded: report.succeeded(),
        failed: report
            .failed()
            .into_iter()
            .filter_map(|item| match &item.status {
                ItemStatus::Failed { error, recovery } => Some(BulkFailureDto {
                    id: item.id.clone(),
                    error: error.to_string(),
                    recovery: *recovery,
                }),
                _ => None,
            })
            .collect(),
        cancelled: report.cancelled(),
        retryable_ids: report.retryable_ids(),
    }
}

pub fn sign_in<B>(state: &AppState<B>, token: String) -> Result<(), String> {
    state.session.sign_in(token, None, None);
    if state.session.is_authenticated() {
        Ok(())
    } else {
        Err(err(CrmError::NotAuthenticated))
    }
}

/// Refresh the view, moving to `page` first when given.
pub async fn list_records<R: Record, B: CrmBackend>(
    state: &AppState<B>,
    view: &Mutex<ListView<R>>,
    page: Option<u32>,
) -> Result<ListPageDto<R>, String> {
    let mut view = view.lock().await;
    match page {
        Some(page) => view.set_page(&state.repo, page).await.map_err(err)?,
        None => view.refresh(&state.repo).await.map_err(err)?,
    }
    Ok(page_of(&view))
}

pub async fn select_record<R: Record>(
    view: &Mutex<ListView<R>>,
    id: String,
    selected: bool,
) -> Result<ListPageDto<R>, String> {
    let mut view = view.lock().await;
    if !view.selection().rendered().iter().any(|r| *r == id) {
        return Err(format!("{} '{id}' is not on the current page", R::KIND));
    }
    view.selection_mut().select_item(&id, selected);
    Ok(page_of(&view))
}

pub async fn select_all<R: Record>(view: &Mutex<ListView<R>>, selected: bool) -> ListPageDto<R> {
    let mut view = view.lock().await;
    view.selection_mut().select_all(selected);
    page_of(&view)
}

/// Replace the filter conditions and reload from the first page.
pub async fn apply_filter<R: Record, B: CrmBackend>(
    state: &AppState<B>,
    view: &Mutex<ListView<R>>,
    conditions: Vec<FilterCondition>,
) -> Result<ListPageDto<R>, String> {
    let mut view = view.lock().await;
    view.filter_mut().load(conditions);
    view.apply_filter(&state.repo).await.map_err(err)?;
    Ok(page_of(&view))
}

pub async fn run_bulk<R: Record, B: CrmBackend>(
    state: &AppState<B>,
    view: &Mutex<ListView<R>>,
    action: BulkAction,
) -> Result<BulkResultDto, String> {
    let mut view = view.lock().await;
    let report = view
        .apply_bulk(&state.repo, &state.dispatcher, &action)
        .await
        .map_err(err)?;
    let result = bulk_result(&report);
    tracing::info!(
        kind = %R::KIND,
        action = %result.action,
        succeeded = result.succeeded,
        failed = result.failed.len(),
        "bulk action finished"
    );
    Ok(result)
}

/// Validate against the current pipeline, then create.
pub async fn create_record<D: Draft, B: CrmBackend>(
    state: &AppState<B>,
    draft: D,
) -> Result<D::Output, String> {
    let pipeline = state.repo.stages().await.map_err(err)?;
    draft.validate(&pipeline).map_err(|e| err(e.into()))?;
    let kind = <D::Output as Record>::KIND;
    state
        .repo
        .mutate_then_invalidate(&[InvalidationKey::Kind(kind)], state.repo.backend().create(&draft))
        .await
        .map_err(err)
}

pub async fn create_contact<B: CrmBackend>(
    state: &AppState<B>,
    draft: crm_schema::ContactDraft,
) -> Result<Contact, String> {
    create_record(state, draft).await
}

pub async fn update_record<R: Record, B: CrmBackend>(
    state: &AppState<B>,
    id: String,
    patch: serde_json::Value,
) -> Result<R, String> {
    if !patch.is_object() {
        return Err("update must be a JSON object".into());
    }
    state
        .repo
        .mutate_then_invalidate(
            &[InvalidationKey::Record(R::KIND, id.clone())],
            state.repo.backend().patch::<R>(&id, &patch),
        )
        .await
        .map_err(err)
}

/// CSV of the selected contacts. A read: the selection and cache stay.
pub async fn export_contacts_csv<B: CrmBackend>(state: &AppState<B>) -> Result<String, String> {
    let mut view = state.contacts.lock().await;
    let report = view
        .apply_bulk(&state.repo, &state.dispatcher, &BulkAction::Export)
        .await
        .map_err(err)?;
    let report = report.into_result().map_err(err)?;
    to_csv(&report.into_records()).map_err(err)
}

async fn reload_board<B: CrmBackend>(state: &AppState<B>, board: &mut DealBoard) -> Result<(), CrmError> {
    let pipeline = state.repo.stages().await?;
    let deals: Vec<Deal> = state
        .repo
        .list(&ListQuery::with_page_size(BOARD_PAGE_SIZE))
        .await?;
    board.replace_pipeline(pipeline);
    board.replace_deals(deals);
    Ok(())
}

pub async fn get_board<B: CrmBackend>(state: &AppState<B>) -> Result<BoardDto, String> {
    let mut board = state.board.lock().await;
    reload_board(state, &mut board).await.map_err(err)?;
    Ok(BoardDto {
        columns: board.columns(),
    })
}

/// Drop `deal_id` on `stage`. A refused move is rolled back and reported in
/// the result rather than as an error.
pub async fn move_deal<B: CrmBackend>(
    state: &AppState<B>,
    deal_id: String,
    stage: String,
) -> Result<MoveResultDto, String> {
    let mut board = state.board.lock().await;
    if board.deal(&deal_id).is_none() {
        reload_board(state, &mut board).await.map_err(err)?;
    }
    let outcome = drop_card(&mut board, state.repo.backend(), &deal_id, &stage)
        .await
        .map_err(err)?;

    let (outcome, error) = match outcome {
        MoveOutcome::Unchanged => ("unchanged", None),
        MoveOutcome::Confirmed(_) => {
            state
                .repo
                .invalidate(InvalidationKey::Record(crm_schema::EntityKind::Deal, deal_id.clone()));
            ("confirmed", None)
        }
        MoveOutcome::RolledBack(e) => {
            tracing::warn!(deal = %deal_id, %stage, error = %e, "deal move rolled back");
            ("rolled_back", Some(e.to_string()))
        }
        MoveOutcome::Superseded => ("superseded", None),
    };
    Ok(MoveResultDto {
        outcome: outcome.to_string(),
        error,
        board: BoardDto {
            columns: board.columns(),
        },
    })
}
