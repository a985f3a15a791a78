//! `CrmBackend` over the browser's `fetch`, talking to `crm-server`.

use crm_core::{CrmBackend, CrmError, ListQuery, Session};
use crm_schema::envelope::error_message;
use crm_schema::{normalize, Activity, ActivityCursor, Draft, EntityKind, Pipeline, Record};
use serde::de::DeserializeOwned;
use std::rc::Rc;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Headers, Request, RequestInit, Response};

const TOKEN_KEY: &str = "crm.token";

#[derive(Clone)]
pub struct FetchBackend {
    base_url: String,
    session: Rc<Session>,
}

fn js_err(err: JsValue) -> CrmError {
    CrmError::Network(err.as_string().unwrap_or_else(|| format!("{err:?}")))
}

/// `page`, `pageSize` and the JSON-encoded filter, already percent-encoded
/// by `encode`.
pub fn list_query_string(
    query: &ListQuery,
    encode: impl Fn(&str) -> String,
) -> Result<String, CrmError> {
    let mut out = format!("page={}&pageSize={}", query.page, query.page_size);
    if let Some(filter) = &query.filter {
        push_json_param(&mut out, "filter", filter, &encode)?;
    }
    Ok(out)
}

fn push_json_param(
    out: &mut String,
    name: &str,
    value: &impl serde::Serialize,
    encode: impl Fn(&str) -> String,
) -> Result<(), CrmError> {
    let raw = serde_json::to_string(value)?;
    out.push('&');
    out.push_str(name);
    out.push('=');
    out.push_str(&encode(&raw));
    Ok(())
}

fn encode_component(raw: &str) -> String {
    String::from(js_sys::encode_uri_component(raw))
}

impl FetchBackend {
    pub fn new(base_url: impl Into<String>, session: Rc<Session>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Rc<Session> {
        &self.session
    }

    async fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<serde_json::Value>, CrmError> {
        let token = self.session.require_token()?;
        let window = web_sys::window().ok_or_else(|| CrmError::Network("window not available".into()))?;

        let headers = Headers::new().map_err(js_err)?;
        headers
            .set("Authorization", &format!("Bearer {token}"))
            .map_err(js_err)?;
        let init = RequestInit::new();
        init.set_method(method);
        if let Some(body) = body {
            headers.set("Content-Type", "application/json").map_err(js_err)?;
            init.set_body(&JsValue::from_str(&serde_json::to_string(body)?));
        }
        init.set_headers(&headers);

        let url = format!("{}/api/{path}", self.base_url);
        let request = Request::new_with_str_and_init(&url, &init).map_err(js_err)?;
        let response: Response = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(js_err)?
            .dyn_into()
            .map_err(js_err)?;
        let status = response.status();
        let text = JsFuture::from(response.text().map_err(js_err)?)
            .await
            .map_err(js_err)?
            .as_string()
            .unwrap_or_default();

        if !(200..300).contains(&status) {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| error_message(&v))
                .unwrap_or_else(|| response.status_text());
            return Err(CrmError::Http { status, message });
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, CrmError> {
        let value = self
            .send(method, path, body)
            .await?
            .ok_or(crm_schema::EnvelopeError::MissingData)?;
        Ok(normalize(value)?)
    }
}

fn missing(kind: EntityKind, id: &str, err: CrmError) -> CrmError {
    match err {
        CrmError::Http { status: 404, .. } => CrmError::NotFound {
            kind,
            id: id.to_string(),
        },
        other => other,
    }
}

impl CrmBackend for FetchBackend {
    async fn list<R: Record>(&self, query: &ListQuery) -> Result<Vec<R>, CrmError> {
        let path = format!(
            "{}?{}",
            R::KIND.collection(),
            list_query_string(query, encode_component)?
        );
        self.request("GET", &path, None).await
    }

    async fn fetch<R: Record>(&self, id: &str) -> Result<R, CrmError> {
        let path = format!("{}/{}", R::KIND.collection(), encode_component(id));
        self.request("GET", &path, None)
            .await
            .map_err(|e| missing(R::KIND, id, e))
    }

    async fn create<D: Draft>(&self, draft: &D) -> Result<D::Output, CrmError> {
        let body = serde_json::to_value(draft)?;
        let kind = <D::Output as Record>::KIND;
        self.request("POST", kind.collection(), Some(&body)).await
    }

    async fn patch<R: Record>(&self, id: &str, body: &serde_json::Value) -> Result<R, CrmError> {
        let path = format!("{}/{}", R::KIND.collection(), encode_component(id));
        self.request("PATCH", &path, Some(body))
            .await
            .map_err(|e| missing(R::KIND, id, e))
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), CrmError> {
        let path = format!("{}/{}", kind.collection(), encode_component(id));
        if let Some(body) = self
            .send("DELETE", &path, None)
            .await
            .map_err(|e| missing(kind, id, e))?
        {
            normalize::<serde_json::Value>(body)?;
        }
        Ok(())
    }

    async fn stages(&self) -> Result<Pipeline, CrmError> {
        self.request("GET", "stages", None).await
    }

    async fn activity_after(&self, after: i64) -> Result<Vec<Activity>, CrmError> {
        self.request("GET", &format!("activity?after={after}"), None)
            .await
    }

    async fn latest_activity_id(&self) -> Result<i64, CrmError> {
        let cursor: ActivityCursor = self.request("GET", "activity/latest", None).await?;
        Ok(cursor.latest_id)
    }
}

/// Token saved by an earlier sign-in, if any.
pub fn stored_token() -> Option<String> {
    web_sys::window()?
        .local_storage()
        .ok()??
        .get_item(TOKEN_KEY)
        .ok()?
        .filter(|t| !t.trim().is_empty())
}

pub fn store_token(token: Option<&str>) {
    let Some(storage) = web_sys::window().and_then(|w| w.local_storage().ok().flatten()) else {
        return;
    };
    let _ = match token {
        Some(token) => storage.set_item(TOKEN_KEY, token),
        None => storage.remove_item(TOKEN_KEY),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_core::{Criterion, Filter, Operator};

    #[test]
    fn query_string_without_filter() {
        let query = ListQuery {
            page: 2,
            page_size: 10,
            filter: None,
        };
        assert_eq!(
            list_query_string(&query, |s| s.to_string()).expect("query"),
            "page=2&pageSize=10"
        );
    }

    #[test]
    fn filter_goes_through_the_encoder() {
        let query = ListQuery {
            filter: Some(Filter {
                conditions: vec![Criterion {
                    field: "status".into(),
                    operator: Operator::Equals,
                    value: "lead".into(),
                    logical_operator: None,
                }],
            }),
            ..ListQuery::default()
        };
        let qs = list_query_string(&query, |s| format!("<{}>", s.len())).expect("query");
        assert!(qs.starts_with("page=0&pageSize=25&filter=<"));
    }

    #[test]
    fn unserializable_param_is_an_error_not_a_dropped_filter() {
        let mut out = String::from("page=0");
        let mut bad = std::collections::HashMap::new();
        bad.insert((1u8, 2u8), "x");
        let result = push_json_param(&mut out, "filter", &bad, |s| s.to_string());
        assert!(matches!(result, Err(CrmError::Decode(_))), "{result:?}");
        assert_eq!(out, "page=0");
    }
}
