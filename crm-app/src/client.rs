//! REST client for `crm-server`.
//!
//! Every request carries the session's bearer token and every response goes
//! through [`crm_schema::normalize`], so enveloped and bare payloads decode
//! the same way.

use crm_core::{CrmBackend, CrmError, ListQuery, Session};
use crm_schema::envelope::error_message;
use crm_schema::{normalize, Activity, ActivityCursor, Draft, EntityKind, Pipeline, Record};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    session: Arc<Session>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, session: Arc<Session>) -> Result<Self, CrmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CrmError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// Send with the bearer token. `None` means an empty body (204).
    async fn send(&self, request: RequestBuilder) -> Result<Option<serde_json::Value>, CrmError> {
        let token = self.session.require_token()?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|body| error_message(&body))
                .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            tracing::debug!(status = status.as_u16(), %message, "request failed");
            return Err(CrmError::Http {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn request<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CrmError> {
        let body = self
            .send(request)
            .await?
            .ok_or(crm_schema::EnvelopeError::MissingData)?;
        Ok(normalize(body)?)
    }
}

fn not_found(kind: EntityKind, id: &str) -> impl FnOnce(CrmError) -> CrmError + '_ {
    move |err| match err {
        CrmError::Http { status: 404, .. } => CrmError::NotFound {
            kind,
            id: id.to_string(),
        },
        other => other,
    }
}

impl CrmBackend for HttpBackend {
    async fn list<R: Record>(&self, query: &ListQuery) -> Result<Vec<R>, CrmError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("pageSize", query.page_size.to_string()),
        ];
        if let Some(filter) = &query.filter {
            params.push(("filter", serde_json::to_string(filter)?));
        }
        let request = self
            .client
            .get(self.url(R::KIND.collection()))
            .query(&params);
        self.request(request).await
    }

    async fn fetch<R: Record>(&self, id: &str) -> Result<R, CrmError> {
        let request = self
            .client
            .get(self.url(&format!("{}/{id}", R::KIND.collection())));
        self.request(request).await.map_err(not_found(R::KIND, id))
    }

    async fn create<D: Draft>(&self, draft: &D) -> Result<D::Output, CrmError> {
        let kind = <D::Output as Record>::KIND;
        let request = self.client.post(self.url(kind.collection())).json(draft);
        self.request(request).await
    }

    async fn patch<R: Record>(&self, id: &str, body: &serde_json::Value) -> Result<R, CrmError> {
        let request = self
            .client
            .patch(self.url(&format!("{}/{id}", R::KIND.collection())))
            .json(body);
        self.request(request).await.map_err(not_found(R::KIND, id))
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), CrmError> {
        let request = self
            .client
            .delete(self.url(&format!("{}/{id}", kind.collection())));
        let body = self.send(request).await.map_err(not_found(kind, id))?;
        if let Some(body) = body {
            normalize::<serde_json::Value>(body)?;
        }
        Ok(())
    }

    async fn stages(&self) -> Result<Pipeline, CrmError> {
        self.request(self.client.get(self.url("stages"))).await
    }

    async fn activity_after(&self, after: i64) -> Result<Vec<Activity>, CrmError> {
        let request = self
            .client
            .get(self.url("activity"))
            .query(&[("after", after)]);
        self.request(request).await
    }

    async fn latest_activity_id(&self) -> Result<i64, CrmError> {
        let request = self.client.get(self.url("activity/latest"));
        let cursor: ActivityCursor = self.request(request).await?;
        Ok(cursor.latest_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anonymous_session_never_reaches_the_network() {
        // Nothing listens on port 9; a request would fail with a network error.
        let backend =
            HttpBackend::new("http://127.0.0.1:9/", Arc::new(Session::anonymous())).expect("client");
        assert_eq!(backend.base_url(), "http://127.0.0.1:9");
        let err = backend
            .list::<crm_schema::Contact>(&ListQuery::default())
            .await
            .expect_err("unauthenticated");
        assert!(matches!(err, CrmError::NotAuthenticated));
    }
}
