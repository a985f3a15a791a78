//! Realtime updates: poll the activity feed, invalidate what changed and
//! tell the UI.

use crate::state::AppState;
use crm_core::{CrmBackend, InvalidationKey};
use crm_schema::EntityKind;

pub trait EventSink: Send + Sync + 'static {
    fn emit_json(&self, event: &str, payload: serde_json::Value);
}

pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit_json(&self, _event: &str, _payload: serde_json::Value) {}
}

/// Writes every event to the log. Used by the headless client.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit_json(&self, event: &str, payload: serde_json::Value) {
        tracing::info!(event, %payload, "update");
    }
}

/// `contacts-changed`, `deals-changed`, ...
pub fn changed_event(kind: EntityKind) -> String {
    format!("{}-changed", kind.collection())
}

pub fn start<B>(state: &AppState<B>) -> std::thread::JoinHandle<()>
where
    B: CrmBackend + Send + Sync + 'static,
{
    start_with_sink(state, NoopSink)
}

pub fn start_with_sink<B>(state: &AppState<B>, sink: impl EventSink) -> std::thread::JoinHandle<()>
where
    B: CrmBackend + Send + Sync + 'static,
{
    let state = state.clone();
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(%err, "activity poller could not start");
                return;
            }
        };
        runtime.block_on(async move {
            let mut last_id = latest_activity_id(&state).await;
            loop {
                emit_updates(&state, &sink, &mut last_id).await;
                tokio::time::sleep(state.config.poll_interval).await;
            }
        });
    })
}

/// Newest entry already in the feed; older history is not replayed.
async fn latest_activity_id<B: CrmBackend>(state: &AppState<B>) -> i64 {
    match state.repo.backend().latest_activity_id().await {
        Ok(latest) => latest,
        Err(err) => {
            tracing::warn!(%err, "could not read activity feed");
            0
        }
    }
}

/// One poll: every new entry invalidates its record and raises a
/// notification; each touched kind gets one `*-changed` event. Returns the
/// number of entries seen.
pub async fn emit_updates<B: CrmBackend>(
    state: &AppState<B>,
    sink: &impl EventSink,
    last_id: &mut i64,
) -> usize {
    let feed = match state.repo.backend().activity_after(*last_id).await {
        Ok(feed) => feed,
        Err(err) => {
            tracing::debug!(%err, "activity poll failed");
            return 0;
        }
    };

    let mut touched: Vec<EntityKind> = Vec::new();
    for entry in &feed {
        *last_id = (*last_id).max(entry.id);
        state
            .repo
            .invalidate(InvalidationKey::Record(entry.kind, entry.record_id.clone()));
        if !touched.contains(&entry.kind) {
            touched.push(entry.kind);
        }
        sink.emit_json(
            "notification",
            serde_json::json!({
                "id": entry.id,
                "kind": entry.kind,
                "recordId": entry.record_id,
                "action": entry.action,
                "description": entry.description,
                "timestamp": entry.timestamp,
            }),
        );
    }

    for kind in touched {
        sink.emit_json(&changed_event(kind), serde_json::json!({ "kind": kind }));
    }
    feed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crm_core::{BackendCall, InMemoryBackend, Session};
    use crm_schema::ActivityAction;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CaptureSink {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl EventSink for CaptureSink {
        fn emit_json(&self, event: &str, _payload: serde_json::Value) {
            if let Ok(mut guard) = self.seen.lock() {
                guard.push(event.to_string());
            }
        }
    }

    fn state() -> AppState<InMemoryBackend> {
        AppState::new(
            InMemoryBackend::new(),
            Arc::new(Session::with_token("tok")),
            AppConfig::default(),
        )
    }

    #[tokio::test]
    async fn emits_changed_events_per_kind() {
        let state = state();
        let backend = state.repo.backend();
        backend.push_activity(EntityKind::Contact, "c-1", ActivityAction::Created);
        backend.push_activity(EntityKind::Contact, "c-2", ActivityAction::Updated);
        let last = backend.push_activity(EntityKind::Deal, "d-1", ActivityAction::StageChanged);

        let sink = CaptureSink::default();
        let mut last_id = 0;
        let seen_entries = emit_updates(&state, &sink, &mut last_id).await;

        assert_eq!(seen_entries, 3);
        assert_eq!(last_id, last);
        let seen = sink.seen.lock().expect("lock").clone();
        assert_eq!(seen.iter().filter(|e| *e == "notification").count(), 3);
        assert_eq!(seen.iter().filter(|e| *e == "contacts-changed").count(), 1);
        assert!(seen.contains(&"deals-changed".to_string()));
        assert!(!seen.contains(&"tasks-changed".to_string()));
        assert!(state
            .repo
            .invalidations()
            .contains(&InvalidationKey::Record(EntityKind::Deal, "d-1".into())));
    }

    #[tokio::test]
    async fn nothing_new_emits_nothing() {
        let state = state();
        let id = state
            .repo
            .backend()
            .push_activity(EntityKind::Task, "t-1", ActivityAction::Deleted);
        let sink = CaptureSink::default();
        let mut last_id = id;
        assert_eq!(emit_updates(&state, &sink, &mut last_id).await, 0);
        assert!(sink.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn poller_starts_after_existing_history() {
        let state = state();
        state
            .repo
            .backend()
            .push_activity(EntityKind::Contact, "c-1", ActivityAction::Created);
        assert_eq!(latest_activity_id(&state).await, 1);
        let calls = state.repo.backend().calls();
        assert!(calls.contains(&BackendCall::LatestActivity));
        assert!(!calls.iter().any(|c| matches!(c, BackendCall::Activity { .. })));
    }
}
