//! REST backend for the CRM client: records in sqlite, bearer auth, an
//! activity feed for realtime invalidation and inbound lead webhooks.

pub mod routes;
pub mod store;
pub mod webhook;

pub use routes::{router, ApiError, ServerState};
pub use store::{RecordStore, StoreError};

use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub db_path: String,
    pub bind: String,
    pub token: Option<String>,
    pub org_id: String,
    pub lead_owner: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            db_path: get("CRM_DB_PATH").unwrap_or_else(|| "crm.db".into()),
            bind: get("CRM_BIND").unwrap_or_else(|| "0.0.0.0:8080".into()),
            token: get("CRM_API_TOKEN"),
            org_id: get("CRM_ORG_ID").unwrap_or_else(|| "org-default".into()),
            lead_owner: get("CRM_LEAD_OWNER").unwrap_or_else(|| "unassigned".into()),
        }
    }

    pub fn state(&self) -> Result<ServerState, StoreError> {
        Ok(ServerState {
            store: RecordStore::open(&self.db_path, &self.org_id)?,
            token: self.token.as_deref().map(Arc::from),
            lead_owner: self.lead_owner.clone(),
        })
    }
}

/// `CRM_LOG` wins over `RUST_LOG`; default is `info`.
pub fn init_tracing() {
    let filter = std::env::var("CRM_LOG")
        .ok()
        .and_then(|v| tracing_subscriber::EnvFilter::try_new(v).ok())
        .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
