use crate::store::{RecordStore, StoreError};
use crate::webhook;
use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use crm_core::Filter;
use crm_schema::{ActivityCursor, CampaignDraft, ContactDraft, DealDraft, EntityKind, Envelope, TaskDraft};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct ServerState {
    pub store: RecordStore,
    /// Required bearer token. `None` leaves the API open.
    pub token: Option<Arc<str>>,
    /// Owner assigned to inbound leads.
    pub lead_owner: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UnknownCollection(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Store(
                StoreError::Validation(_) | StoreError::UnknownStage(_) | StoreError::Invalid(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(Envelope::<()>::failure(self.to_string()))).into_response()
    }
}

pub fn router(state: ServerState) -> Router {
    let api = Router::new()
        .route("/api/stages", get(list_stages))
        .route("/api/activity", get(list_activity))
        .route("/api/activity/latest", get(latest_activity))
        .route("/api/:collection", get(list_records).post(create_record))
        .route(
            "/api/:collection/:id",
            get(get_record).patch(patch_record).delete(delete_record),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    api.merge(webhook::lead_router()).with_state(state)
}

async fn require_bearer(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.token.as_deref() {
        let provided = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if provided != Some(expected) {
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

/// Contacts and tasks answer inside `{success, data}`; deals and campaigns
/// answer with the bare record.
fn respond(kind: EntityKind, status: StatusCode, data: serde_json::Value) -> Response {
    match kind {
        EntityKind::Contact | EntityKind::Task => (status, Json(Envelope::ok(data))).into_response(),
        EntityKind::Deal | EntityKind::Campaign => (status, Json(data)).into_response(),
    }
}

fn kind_of(collection: &str) -> Result<EntityKind, ApiError> {
    EntityKind::from_collection(collection)
        .ok_or_else(|| ApiError::UnknownCollection(collection.to_string()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    /// JSON-encoded filter chain.
    pub filter: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

async fn list_records(
    State(state): State<ServerState>,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let kind = kind_of(&collection)?;
    let filter = params
        .filter
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| serde_json::from_str::<Filter>(raw))
        .transpose()
        .map_err(|err| ApiError::BadRequest(format!("invalid filter: {err}")))?;
    let rows = state.store.list(
        kind,
        filter.as_ref(),
        params.page.unwrap_or(0),
        params.page_size.unwrap_or(crm_core::DEFAULT_PAGE_SIZE),
    )?;
    Ok(respond(kind, StatusCode::OK, serde_json::Value::Array(rows)))
}

async fn create_record(
    State(state): State<ServerState>,
    Path(collection): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let kind = kind_of(&collection)?;
    let decode_error = |err: serde_json::Error| ApiError::BadRequest(format!("invalid {kind}: {err}"));
    let created = match kind {
        EntityKind::Contact => {
            let draft: ContactDraft = serde_json::from_value(body).map_err(decode_error)?;
            to_json(state.store.create(draft)?)?
        }
        EntityKind::Deal => {
            let draft: DealDraft = serde_json::from_value(body).map_err(decode_error)?;
            to_json(state.store.create(draft)?)?
        }
        EntityKind::Task => {
            let draft: TaskDraft = serde_json::from_value(body).map_err(decode_error)?;
            to_json(state.store.create(draft)?)?
        }
        EntityKind::Campaign => {
            let draft: CampaignDraft = serde_json::from_value(body).map_err(decode_error)?;
            to_json(state.store.create(draft)?)?
        }
    };
    Ok(respond(kind, StatusCode::CREATED, created))
}

async fn get_record(
    State(state): State<ServerState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind = kind_of(&collection)?;
    let record = state.store.get(kind, &id)?;
    Ok(respond(kind, StatusCode::OK, record))
}

async fn patch_record(
    State(state): State<ServerState>,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let kind = kind_of(&collection)?;
    let record = state.store.patch(kind, &id, &body)?;
    tracing::debug!(%kind, %id, "record patched");
    Ok(respond(kind, StatusCode::OK, record))
}

async fn delete_record(
    State(state): State<ServerState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind = kind_of(&collection)?;
    state.store.delete(kind, &id)?;
    tracing::debug!(%kind, %id, "record deleted");
    Ok(match kind {
        EntityKind::Contact | EntityKind::Task => {
            Json(Envelope::ok(serde_json::json!({ "id": id }))).into_response()
        }
        EntityKind::Deal | EntityKind::Campaign => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn list_stages(State(state): State<ServerState>) -> Result<Response, ApiError> {
    let pipeline = state.store.pipeline()?;
    Ok(Json(Envelope::ok(pipeline)).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityParams {
    pub after: Option<i64>,
}

async fn list_activity(
    State(state): State<ServerState>,
    Query(params): Query<ActivityParams>,
) -> Result<Response, ApiError> {
    let feed = state.store.activity_after(params.after.unwrap_or(0))?;
    Ok(Json(Envelope::ok(feed)).into_response())
}

async fn latest_activity(State(state): State<ServerState>) -> Result<Response, ApiError> {
    let cursor = ActivityCursor {
        latest_id: state.store.latest_activity_id()?.unwrap_or(0),
    };
    Ok(Json(Envelope::ok(cursor)).into_response())
}

fn to_json<T: serde::Serialize>(value: T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(value).map_err(|err| ApiError::Store(StoreError::Json(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request as HttpRequest};
    use serde_json::json;
    use tower::ServiceExt;

    fn db_path(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        format!("/tmp/crm-tests/{name}-{nanos}.db")
    }

    fn state(name: &str, token: Option<&str>) -> ServerState {
        ServerState {
            store: RecordStore::open(&db_path(name), "org-test").expect("open"),
            token: token.map(Arc::from),
            lead_owner: "u-inbox".into(),
        }
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json")
        };
        (status, value)
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = router(state("auth", Some("secret")));
        let (status, body) = call(&app, Method::GET, "/api/contacts", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = call(&app, Method::GET, "/api/contacts", Some("secret"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn contacts_are_enveloped_and_deals_are_raw() {
        let app = router(state("shapes", None));
        let (status, contact) = call(
            &app,
            Method::POST,
            "/api/contacts",
            None,
            Some(json!({"ownerId": "u-1", "firstName": "Ann", "email": "ann@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(contact["success"], true);
        assert_eq!(contact["data"]["firstName"], "Ann");

        let (status, deal) = call(
            &app,
            Method::POST,
            "/api/deals",
            None,
            Some(json!({"ownerId": "u-1", "title": "Pilot", "value": 10.0, "stage": "new"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(deal["title"], "Pilot");
        assert!(deal.get("success").is_none());

        let (_, deals) = call(&app, Method::GET, "/api/deals", None, None).await;
        assert_eq!(deals.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn patch_validates_stage() {
        let app = router(state("stage", None));
        let (_, deal) = call(
            &app,
            Method::POST,
            "/api/deals",
            None,
            Some(json!({"ownerId": "u-1", "title": "Pilot", "value": 10.0, "stage": "new"})),
        )
        .await;
        let uri = format!("/api/deals/{}", deal["id"].as_str().expect("id"));

        let (status, _) = call(&app, Method::PATCH, &uri, None, Some(json!({"stage": "won"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, moved) =
            call(&app, Method::PATCH, &uri, None, Some(json!({"stage": "proposal"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["stage"], "proposal");

        let (_, feed) = call(&app, Method::GET, "/api/activity?after=1", None, None).await;
        assert_eq!(feed["data"][0]["action"], "stage_changed");

        let (status, latest) = call(&app, Method::GET, "/api/activity/latest", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest["data"]["latestId"], 2);
    }

    #[tokio::test]
    async fn list_accepts_filter_query() {
        let app = router(state("filter", None));
        for (name, status) in [("Ann", "lead"), ("Bob", "customer")] {
            call(
                &app,
                Method::POST,
                "/api/contacts",
                None,
                Some(json!({
                    "ownerId": "u-1",
                    "firstName": name,
                    "email": format!("{}@example.com", name.to_lowercase()),
                    "status": status
                })),
            )
            .await;
        }
        // [{"field":"status","operator":"equals","value":"lead"}], url-encoded
        let uri = "/api/contacts?filter=%5B%7B%22field%22%3A%22status%22%2C%22operator%22%3A%22equals%22%2C%22value%22%3A%22lead%22%7D%5D";
        let (status, body) = call(&app, Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["data"][0]["firstName"], "Ann");

        let (status, _) = call(&app, Method::GET, "/api/contacts?filter=nope", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_collection_and_record_are_not_found() {
        let app = router(state("missing", None));
        let (status, _) = call(&app, Method::GET, "/api/widgets", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = call(&app, Method::GET, "/api/tasks/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn webhook_stores_inbound_lead_without_bearer() {
        let app = router(state("webhook", Some("secret")));
        let (status, body) = call(
            &app,
            Method::POST,
            "/webhook/lead/generic",
            None,
            Some(json!({"name": "Ada Lovelace", "email": "ada@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["ownerId"], "u-inbox");
        let tags = body["data"]["tags"].as_array().expect("tags");
        assert!(tags.contains(&json!("inbound")));

        let (status, _) = call(
            &app,
            Method::POST,
            "/webhook/lead/form",
            None,
            Some(json!({"fields": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
