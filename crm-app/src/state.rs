use crate::config::AppConfig;
use crm_core::filter::{campaign_fields, contact_fields, deal_fields, task_fields};
use crm_core::{BulkDispatcher, DealBoard, ListView, Repository, Session};
use crm_schema::{Campaign, Contact, Deal, Pipeline, Task};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything the commands and the poller share. Cheap to clone.
pub struct AppState<B> {
    pub repo: Arc<Repository<B>>,
    pub dispatcher: Arc<BulkDispatcher>,
    pub session: Arc<Session>,
    pub config: AppConfig,
    pub contacts: Arc<Mutex<ListView<Contact>>>,
    pub deals: Arc<Mutex<ListView<Deal>>>,
    pub tasks: Arc<Mutex<ListView<Task>>>,
    pub campaigns: Arc<Mutex<ListView<Campaign>>>,
    pub board: Arc<Mutex<DealBoard>>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            dispatcher: Arc::clone(&self.dispatcher),
            session: Arc::clone(&self.session),
            config: self.config.clone(),
            contacts: Arc::clone(&self.contacts),
            deals: Arc::clone(&self.deals),
            tasks: Arc::clone(&self.tasks),
            campaigns: Arc::clone(&self.campaigns),
            board: Arc::clone(&self.board),
        }
    }
}

impl<B: crm_core::CrmBackend> AppState<B> {
    pub fn new(backend: B, session: Arc<Session>, config: AppConfig) -> Self {
        let page_size = config.page_size;
        Self {
            repo: Arc::new(Repository::new(backend)),
            dispatcher: Arc::new(BulkDispatcher::new(config.bulk_concurrency)),
            session,
            contacts: Arc::new(Mutex::new(ListView::new(contact_fields(), page_size))),
            deals: Arc::new(Mutex::new(ListView::new(deal_fields(), page_size))),
            tasks: Arc::new(Mutex::new(ListView::new(task_fields(), page_size))),
            campaigns: Arc::new(Mutex::new(ListView::new(campaign_fields(), page_size))),
            board: Arc::new(Mutex::new(DealBoard::new(Pipeline::default(), Vec::new()))),
            config,
        }
    }
}
