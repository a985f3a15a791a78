//! What the contacts screen can do, independent of the DOM.

use crm_core::{
    to_csv, BulkAction, BulkDispatcher, CheckState, CrmBackend, CrmError, FieldDef,
    FilterCondition, ListView, LogicalOperator, Operator, Repository,
};
use crm_schema::Contact;

#[derive(Clone, Debug, PartialEq)]
pub enum ListOp {
    Refresh,
    Page(u32),
    Toggle(String),
    SelectAll(bool),
    AddCondition,
    SetField(usize, String),
    SetOperator(usize, Operator),
    SetValue(usize, String),
    SetLogical(usize, LogicalOperator),
    RemoveCondition(usize),
    ApplyFilter,
    ClearFilter,
    Bulk(BulkAction),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConditionRow {
    pub index: usize,
    pub condition: FilterCondition,
    pub operators: Vec<Operator>,
}

/// Everything the table, bulk bar and filter panel render.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactsSnapshot {
    pub rows: Vec<Contact>,
    pub selected: Vec<String>,
    pub check: CheckState,
    pub page: u32,
    pub fields: Vec<FieldDef>,
    pub conditions: Vec<ConditionRow>,
    pub active_filters: usize,
}

impl Default for ContactsSnapshot {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            selected: Vec::new(),
            check: CheckState::Unchecked,
            page: 0,
            fields: Vec::new(),
            conditions: Vec::new(),
            active_filters: 0,
        }
    }
}

impl ContactsSnapshot {
    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.iter().any(|s| s == id)
    }
}

pub fn snapshot(view: &ListView<Contact>) -> ContactsSnapshot {
    let builder = view.filter();
    ContactsSnapshot {
        rows: view.rows().to_vec(),
        selected: view.selection().ids(),
        check: view.selection().check_state(),
        page: view.query().page,
        fields: builder.fields().to_vec(),
        conditions: builder
            .conditions()
            .iter()
            .enumerate()
            .map(|(index, condition)| ConditionRow {
                index,
                condition: condition.clone(),
                operators: builder.operators_for(index).to_vec(),
            })
            .collect(),
        active_filters: builder.active_count(),
    }
}

/// Result of an op worth telling the user about.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    Message(String),
    Download(String),
}

/// Run one op against the view. Only bulk actions produce a notice.
pub async fn perform<B: CrmBackend>(
    repo: &Repository<B>,
    dispatcher: &BulkDispatcher,
    view: &mut ListView<Contact>,
    op: ListOp,
) -> Result<Option<Notice>, CrmError> {
    match op {
        ListOp::Refresh => view.refresh(repo).await?,
        ListOp::Page(page) => view.set_page(repo, page).await?,
        ListOp::Toggle(id) => {
            view.selection_mut().toggle(&id);
        }
        ListOp::SelectAll(selected) => view.selection_mut().select_all(selected),
        ListOp::AddCondition => {
            view.filter_mut().add_condition();
        }
        ListOp::SetField(i, field) => view.filter_mut().set_field(i, &field)?,
        ListOp::SetOperator(i, op) => view.filter_mut().set_operator(i, op)?,
        ListOp::SetValue(i, value) => view.filter_mut().set_value(i, value)?,
        ListOp::SetLogical(i, op) => view.filter_mut().set_logical_operator(i, op)?,
        ListOp::RemoveCondition(i) => {
            view.filter_mut().remove_condition(i);
        }
        ListOp::ApplyFilter => view.apply_filter(repo).await?,
        ListOp::ClearFilter => {
            view.filter_mut().clear();
            view.apply_filter(repo).await?;
        }
        ListOp::Bulk(action) => {
            let report = view.apply_bulk(repo, dispatcher, &action).await?;
            if matches!(action, BulkAction::Export) {
                let report = report.into_result()?;
                return Ok(Some(Notice::Download(to_csv(&report.into_records())?)));
            }
            let failed = report.failed();
            let message = if failed.is_empty() {
                format!("{}: {} updated", action.kind_name(), report.succeeded())
            } else {
                format!(
                    "{}: {} updated, {} failed ({})",
                    action.kind_name(),
                    report.succeeded(),
                    failed.len(),
                    failed
                        .iter()
                        .map(|item| item.id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            return Ok(Some(Notice::Message(message)));
        }
    }
    Ok(None)
}

/// Wire name of an operator, used as the `<option>` value.
pub fn operator_key(op: Operator) -> String {
    serde_json::to_value(op)
        .ok()
        .and_then(|v| v.as_str().map(ToString::to_string))
        .unwrap_or_default()
}

pub fn parse_operator(key: &str) -> Option<Operator> {
    serde_json::from_value(serde_json::Value::String(key.to_string())).ok()
}

/// Whole currency units with thousands separators, e.g. `$12,000`.
pub fn money(value: f64) -> String {
    let whole = value.round() as i64;
    let digits = whole.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    let sign = if whole < 0 { "-" } else { "" };
    format!("{sign}${out}")
}
