use crate::routes::{ApiError, ServerState};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use crm_schema::{Contact, ContactDraft, Draft, Envelope, Pipeline};

pub const INBOUND_TAG: &str = "inbound";

/// Turns an inbound lead payload into a contact draft.
pub trait LeadAdapter: Send + Sync + 'static {
    fn source(&self) -> &'static str;

    fn parse(&self, payload: &serde_json::Value, owner_id: &str) -> Result<ContactDraft, String>;
}

/// Flat JSON: `{firstName|first_name|name, lastName, email, phone, company, tags}`.
pub struct GenericLeadAdapter;

/// Form builder submissions: `{"fields": [{"name": "email", "value": "..."}]}`
/// or a flat `{"answers": {...}}` map.
pub struct FormLeadAdapter;

impl LeadAdapter for GenericLeadAdapter {
    fn source(&self) -> &'static str {
        "generic"
    }

    fn parse(&self, payload: &serde_json::Value, owner_id: &str) -> Result<ContactDraft, String> {
        if !payload.is_object() {
            return Err("lead payload must be a JSON object".into());
        }
        let field = |keys: &[&str]| first_str(payload, keys);
        let (first_name, last_name) = names(
            field(&["firstName", "first_name"]),
            field(&["lastName", "last_name"]),
            field(&["name", "fullName", "full_name"]),
        );
        let tags = payload
            .get("tags")
            .and_then(serde_json::Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(ContactDraft {
            owner_id: field(&["ownerId", "owner_id"]).unwrap_or_else(|| owner_id.to_string()),
            first_name,
            last_name,
            email: field(&["email", "emailAddress", "email_address"]).unwrap_or_default(),
            phone: field(&["phone", "phoneNumber", "phone_number"]),
            company: field(&["company", "organization"]),
            status: Some("lead".into()),
            tags,
        })
    }
}

impl LeadAdapter for FormLeadAdapter {
    fn source(&self) -> &'static str {
        "form"
    }

    fn parse(&self, payload: &serde_json::Value, owner_id: &str) -> Result<ContactDraft, String> {
        let mut answers = serde_json::Map::new();
        if let Some(fields) = payload.get("fields").and_then(serde_json::Value::as_array) {
            for entry in fields {
                let key = entry
                    .get("name")
                    .or_else(|| entry.get("label"))
                    .and_then(serde_json::Value::as_str);
                if let (Some(key), Some(value)) = (key, entry.get("value")) {
                    answers.insert(normalize_key(key), value.clone());
                }
            }
        } else if let Some(map) = payload.get("answers").and_then(serde_json::Value::as_object) {
            for (key, value) in map {
                answers.insert(normalize_key(key), value.clone());
            }
        } else {
            return Err("form payload missing fields[] or answers{}".into());
        }

        let answers = serde_json::Value::Object(answers);
        let field = |keys: &[&str]| first_str(&answers, keys);
        let (first_name, last_name) = names(
            field(&["first_name", "firstname"]),
            field(&["last_name", "lastname", "surname"]),
            field(&["name", "full_name", "your_name"]),
        );
        let mut tags = Vec::new();
        if let Some(form) = payload
            .get("form_id")
            .or_else(|| payload.get("formId"))
            .and_then(serde_json::Value::as_str)
        {
            tags.push(format!("form:{form}"));
        }

        Ok(ContactDraft {
            owner_id: owner_id.to_string(),
            first_name,
            last_name,
            email: field(&["email", "email_address", "work_email"]).unwrap_or_default(),
            phone: field(&["phone", "phone_number", "mobile"]),
            company: field(&["company", "company_name", "organization"]),
            status: Some("lead".into()),
            tags,
        })
    }
}

pub fn lead_router() -> Router<ServerState> {
    Router::new()
        .route("/webhook/lead/generic", post(handle_generic))
        .route("/webhook/lead/form", post(handle_form))
}

/// Parse with `adapter`, tag the lead as inbound and validate it.
pub fn parse_lead(
    payload: &serde_json::Value,
    adapter: &impl LeadAdapter,
    owner_id: &str,
) -> Result<ContactDraft, String> {
    let mut draft = adapter.parse(payload, owner_id)?;
    draft.tags.push(INBOUND_TAG.to_string());
    draft.tags.push(format!("source:{}", adapter.source()));
    draft.validate(&Pipeline::standard()).map_err(|e| e.to_string())?;
    Ok(draft)
}

async fn handle_generic(
    State(state): State<ServerState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Envelope<Contact>>), ApiError> {
    accept_lead(&state, &payload, &GenericLeadAdapter)
}

async fn handle_form(
    State(state): State<ServerState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Envelope<Contact>>), ApiError> {
    accept_lead(&state, &payload, &FormLeadAdapter)
}

fn accept_lead(
    state: &ServerState,
    payload: &serde_json::Value,
    adapter: &impl LeadAdapter,
) -> Result<(StatusCode, Json<Envelope<Contact>>), ApiError> {
    let draft = parse_lead(payload, adapter, &state.lead_owner).map_err(|reason| {
        tracing::warn!(source = adapter.source(), %reason, "lead rejected");
        ApiError::BadRequest(reason)
    })?;
    let contact = state.store.create(draft)?;
    tracing::info!(source = adapter.source(), id = %contact.id, "inbound lead stored");
    Ok((StatusCode::CREATED, Json(Envelope::ok(contact))))
}

fn first_str(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .filter_map(serde_json::Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Prefer explicit first/last names; otherwise split a full name on its
/// first space.
fn names(first: Option<String>, last: Option<String>, full: Option<String>) -> (String, String) {
    match (first, full) {
        (Some(first), _) => (first, last.unwrap_or_default()),
        (None, Some(full)) => match full.split_once(' ') {
            Some((first, rest)) => (first.to_string(), last.unwrap_or_else(|| rest.trim().to_string())),
            None => (full, last.unwrap_or_default()),
        },
        (None, None) => (String::new(), last.unwrap_or_default()),
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generic_payload_maps_to_contact_draft() {
        let draft = parse_lead(
            &json!({
                "name": "Ada Lovelace",
                "email": "ada@example.com",
                "company": "Analytical Engines",
                "tags": ["conference"]
            }),
            &GenericLeadAdapter,
            "u-owner",
        )
        .expect("lead");
        assert_eq!(draft.first_name, "Ada");
        assert_eq!(draft.last_name, "Lovelace");
        assert_eq!(draft.owner_id, "u-owner");
        assert_eq!(draft.company.as_deref(), Some("Analytical Engines"));
        assert!(draft.tags.contains(&"conference".to_string()));
        assert!(draft.tags.contains(&INBOUND_TAG.to_string()));
        assert!(draft.tags.contains(&"source:generic".to_string()));
    }

    #[test]
    fn form_fields_are_normalized() {
        let draft = parse_lead(
            &json!({
                "form_id": "demo-request",
                "fields": [
                    {"name": "First Name", "value": "Grace"},
                    {"name": "Last Name", "value": "Hopper"},
                    {"label": "Work Email", "value": "grace@example.com"}
                ]
            }),
            &FormLeadAdapter,
            "u-owner",
        )
        .expect("lead");
        assert_eq!(draft.first_name, "Grace");
        assert_eq!(draft.last_name, "Hopper");
        assert_eq!(draft.email, "grace@example.com");
        assert!(draft.tags.contains(&"form:demo-request".to_string()));
    }

    #[test]
    fn lead_without_email_is_rejected() {
        let err = parse_lead(&json!({"name": "Nobody"}), &GenericLeadAdapter, "u-owner")
            .expect_err("invalid");
        assert!(err.contains("email"));
    }

    #[test]
    fn form_without_answers_is_rejected() {
        assert!(parse_lead(&json!({"hello": 1}), &FormLeadAdapter, "u-owner").is_err());
    }
}
