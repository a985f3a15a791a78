//! Read-through cache in front of a [`CrmBackend`].
//!
//! Nothing is patched in place after a mutation. Callers run the mutation
//! through [`Repository::mutate_then_invalidate`] and re-read; the read misses
//! and goes to the backend.

use crate::backend::{CrmBackend, ListQuery};
use crate::error::CrmError;
use crm_schema::{EntityKind, Pipeline, Record};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InvalidationKey {
    /// Every cached list, record and the pipeline.
    All,
    /// Lists and records of one kind.
    Kind(EntityKind),
    /// One record plus every list of its kind that may contain it.
    Record(EntityKind, String),
}

/// Invalidations kept for inspection; older ones are dropped.
pub const INVALIDATION_LOG_LIMIT: usize = 256;

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct CacheState {
    lists: HashMap<(EntityKind, String), Entry>,
    records: HashMap<(EntityKind, String), Entry>,
    pipeline: Option<Pipeline>,
    log: VecDeque<InvalidationKey>,
}

pub struct Repository<B> {
    backend: B,
    cache: Mutex<CacheState>,
}

impl<B: CrmBackend> Repository<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cache: Mutex::new(CacheState::default()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn list<R: Record>(&self, query: &ListQuery) -> Result<Vec<R>, CrmError> {
        let key = (R::KIND, query.cache_key());
        if let Some(rows) = self.cached::<Vec<R>>(|c| c.lists.get(&key).cloned()) {
            return Ok(rows);
        }
        let rows: Vec<R> = self.backend.list(query).await?;
        tracing::trace!(kind = %R::KIND, rows = rows.len(), "list cached");
        self.cache.lock().lists.insert(key, Arc::new(rows.clone()));
        Ok(rows)
    }

    pub async fn get<R: Record>(&self, id: &str) -> Result<R, CrmError> {
        let key = (R::KIND, id.to_string());
        if let Some(record) = self.cached::<R>(|c| c.records.get(&key).cloned()) {
            return Ok(record);
        }
        let record: R = self.backend.fetch(id).await?;
        self.cache.lock().records.insert(key, Arc::new(record.clone()));
        Ok(record)
    }

    pub async fn stages(&self) -> Result<Pipeline, CrmError> {
        if let Some(pipeline) = self.cache.lock().pipeline.clone() {
            return Ok(pipeline);
        }
        let pipeline = self.backend.stages().await?;
        self.cache.lock().pipeline = Some(pipeline.clone());
        Ok(pipeline)
    }

    pub fn invalidate(&self, key: InvalidationKey) {
        let mut cache = self.cache.lock();
        match &key {
            InvalidationKey::All => {
                cache.lists.clear();
                cache.records.clear();
                cache.pipeline = None;
            }
            InvalidationKey::Kind(kind) => {
                cache.lists.retain(|(k, _), _| k != kind);
                cache.records.retain(|(k, _), _| k != kind);
            }
            InvalidationKey::Record(kind, id) => {
                cache.lists.retain(|(k, _), _| k != kind);
                cache.records.remove(&(*kind, id.clone()));
            }
        }
        tracing::debug!(?key, "cache invalidated");
        if cache.log.len() == INVALIDATION_LOG_LIMIT {
            cache.log.pop_front();
        }
        cache.log.push_back(key);
    }

    /// Run `op`, then invalidate `keys` whether it succeeded or not.
    pub async fn mutate_then_invalidate<T, F>(
        &self,
        keys: &[InvalidationKey],
        op: F,
    ) -> Result<T, CrmError>
    where
        F: Future<Output = Result<T, CrmError>>,
    {
        let result = op.await;
        for key in keys {
            self.invalidate(key.clone());
        }
        result
    }

    /// The most recent invalidations, oldest first.
    pub fn invalidations(&self) -> Vec<InvalidationKey> {
        self.cache.lock().log.iter().cloned().collect()
    }

    /// Drain the invalidation log.
    pub fn take_invalidations(&self) -> Vec<InvalidationKey> {
        self.cache.lock().log.drain(..).collect()
    }

    fn cached<T: Clone + 'static>(&self, lookup: impl FnOnce(&CacheState) -> Option<Entry>) -> Option<T> {
        let entry = {
            let cache = self.cache.lock();
            lookup(&*cache)?
        };
        entry.downcast_ref::<T>().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BackendCall, InMemoryBackend};
    use crm_schema::{Contact, ContactDraft, Deal};
    use futures::executor::block_on;
    use serde_json::json;

    fn repository_with_contact() -> (Repository<InMemoryBackend>, Contact) {
        let repo = Repository::new(InMemoryBackend::new());
        let contact = block_on(repo.backend().create(&ContactDraft {
            owner_id: "u-1".into(),
            first_name: "Ann".into(),
            email: "ann@example.com".into(),
            ..ContactDraft::default()
        }))
        .expect("create");
        repo.backend().clear_calls();
        (repo, contact)
    }

    fn list_calls(repo: &Repository<InMemoryBackend>) -> usize {
        repo.backend()
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::List { .. }))
            .count()
    }

    #[test]
    fn second_read_is_served_from_cache() {
        let (repo, _) = repository_with_contact();
        let query = ListQuery::default();
        let first: Vec<Contact> = block_on(repo.list(&query)).expect("list");
        let second: Vec<Contact> = block_on(repo.list(&query)).expect("list");
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(list_calls(&repo), 1);
    }

    #[test]
    fn kinds_do_not_share_entries() {
        let (repo, _) = repository_with_contact();
        let query = ListQuery::default();
        let _: Vec<Contact> = block_on(repo.list(&query)).expect("list");
        let deals: Vec<Deal> = block_on(repo.list(&query)).expect("list");
        assert!(deals.is_empty());
        assert_eq!(list_calls(&repo), 2);
    }

    #[test]
    fn invalidation_forces_refetch() {
        let (repo, contact) = repository_with_contact();
        let query = ListQuery::default();
        let _: Vec<Contact> = block_on(repo.list(&query)).expect("list");
        repo.invalidate(InvalidationKey::Record(EntityKind::Contact, contact.id.clone()));
        let _: Vec<Contact> = block_on(repo.list(&query)).expect("list");
        assert_eq!(list_calls(&repo), 2);
    }

    #[test]
    fn mutate_then_invalidate_runs_even_on_failure() {
        let (repo, contact) = repository_with_contact();
        repo.backend().fail_mutations_for(contact.id.clone());
        let result = block_on(repo.mutate_then_invalidate(
            &[InvalidationKey::Kind(EntityKind::Contact)],
            repo.backend()
                .patch::<Contact>(&contact.id, &json!({"status": "customer"})),
        ));
        assert!(result.is_err());
        assert_eq!(
            repo.invalidations(),
            vec![InvalidationKey::Kind(EntityKind::Contact)]
        );
    }

    #[test]
    fn pipeline_is_cached_until_full_invalidation() {
        let (repo, _) = repository_with_contact();
        block_on(repo.stages()).expect("stages");
        block_on(repo.stages()).expect("stages");
        repo.invalidate(InvalidationKey::Kind(EntityKind::Deal));
        block_on(repo.stages()).expect("stages");
        repo.invalidate(InvalidationKey::All);
        block_on(repo.stages()).expect("stages");
        let stage_calls = repo
            .backend()
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Stages))
            .count();
        assert_eq!(stage_calls, 2);
    }

    #[test]
    fn invalidation_log_is_bounded_and_drainable() {
        let (repo, _) = repository_with_contact();
        for n in 0..INVALIDATION_LOG_LIMIT + 10 {
            repo.invalidate(InvalidationKey::Record(EntityKind::Contact, format!("c-{n}")));
        }
        let log = repo.invalidations();
        assert_eq!(log.len(), INVALIDATION_LOG_LIMIT);
        assert_eq!(
            log[0],
            InvalidationKey::Record(EntityKind::Contact, "c-10".into())
        );

        assert_eq!(repo.take_invalidations().len(), INVALIDATION_LOG_LIMIT);
        assert!(repo.invalidations().is_empty());
    }
}
