use crate::backend::{CrmBackend, ListQuery};
use crate::bulk::{BulkAction, BulkDispatcher, BulkReport};
use crate::error::CrmError;
use crate::filter::{FieldDef, FilterBuilder};
use crate::repository::{InvalidationKey, Repository};
use crate::selection::Selection;
use crm_effects::{Effect, Effectful};
use crm_schema::Record;

/// One list screen: query, filter builder, selection and the rendered rows.
///
/// The selection only ever holds ids of `rows`. Filter and page changes
/// clear it; a refresh prunes it.
pub struct ListView<R> {
    query: ListQuery,
    filter: FilterBuilder,
    selection: Selection,
    rows: Vec<R>,
}

impl<R: Record> ListView<R> {
    pub fn new(fields: Vec<FieldDef>, page_size: u32) -> Self {
        Self {
            query: ListQuery::with_page_size(page_size),
            filter: FilterBuilder::new(fields),
            selection: Selection::new(),
            rows: Vec::new(),
        }
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut Selection {
        &mut self.selection
    }

    pub fn filter(&self) -> &FilterBuilder {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut FilterBuilder {
        &mut self.filter
    }

    pub async fn refresh<B: CrmBackend>(&mut self, repo: &Repository<B>) -> Result<(), CrmError> {
        self.rows = repo.list(&self.query).await?;
        self.selection
            .set_rendered(self.rows.iter().map(|r| r.id().to_string()));
        Ok(())
    }

    /// Emit the builder's active conditions as the query filter and go back
    /// to the first page.
    pub async fn apply_filter<B: CrmBackend>(&mut self, repo: &Repository<B>) -> Result<(), CrmError> {
        let filter = self.filter.build();
        self.query.filter = (!filter.is_empty()).then_some(filter);
        self.query.page = 0;
        self.selection.clear();
        self.refresh(repo).await
    }

    pub async fn set_page<B: CrmBackend>(&mut self, repo: &Repository<B>, page: u32) -> Result<(), CrmError> {
        self.query.page = page;
        self.selection.clear();
        self.refresh(repo).await
    }

    /// Run `action` over the selection, invalidate the kind, clear the
    /// selection and refetch. Read-only actions (export) skip all three.
    /// Input errors are returned before anything is sent and leave the
    /// selection alone.
    pub async fn apply_bulk<B: CrmBackend>(
        &mut self,
        repo: &Repository<B>,
        dispatcher: &BulkDispatcher,
        action: &BulkAction,
    ) -> Result<BulkReport<R>, CrmError> {
        let ids = self.selection.ids();
        if ids.is_empty() {
            return Err(CrmError::EmptySelection);
        }
        if !action.supported_for(R::KIND) {
            return Err(CrmError::Unsupported {
                action: action.kind_name(),
                kind: R::KIND,
            });
        }
        action.validate()?;
        if let BulkAction::ChangeStage { stage_id } = action {
            if !repo.stages().await?.contains(stage_id) {
                return Err(CrmError::UnknownStage(stage_id.clone()));
            }
        }

        if action.effect() == Effect::Observe {
            return dispatcher.dispatch::<R, B>(repo.backend(), &ids, action).await;
        }

        let report = repo
            .mutate_then_invalidate(
                &[InvalidationKey::Kind(R::KIND)],
                dispatcher.dispatch::<R, B>(repo.backend(), &ids, action),
            )
            .await;

        self.selection.clear();
        if let Err(err) = self.refresh(repo).await {
            tracing::warn!(kind = %R::KIND, %err, "refresh after bulk action failed");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::ItemStatus;
    use crate::filter::{contact_fields, deal_fields, LogicalOperator, Operator};
    use crate::memory::{BackendCall, InMemoryBackend};
    use crm_schema::{Contact, ContactDraft, Deal, DealDraft, EntityKind};
    use futures::executor::block_on;

    fn repo_with_contacts(names: &[(&str, &str)]) -> Repository<InMemoryBackend> {
        let repo = Repository::new(InMemoryBackend::new());
        for (name, status) in names {
            block_on(repo.backend().create(&ContactDraft {
                owner_id: "u-1".into(),
                first_name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                status: Some(status.to_string()),
                ..ContactDraft::default()
            }))
            .expect("create");
        }
        repo
    }

    #[test]
    fn export_keeps_selection_and_cache() {
        let repo = repo_with_contacts(&[("Ann", "lead"), ("Bob", "lead")]);
        let dispatcher = BulkDispatcher::default();
        let mut view: ListView<Contact> = ListView::new(contact_fields(), 25);
        block_on(view.refresh(&repo)).expect("refresh");
        view.selection_mut().select_all(true);
        repo.backend().clear_calls();

        let report = block_on(view.apply_bulk(&repo, &dispatcher, &BulkAction::Export)).expect("export");

        assert_eq!(report.records().len(), 2);
        assert_eq!(view.selection().count(), 2);
        assert!(repo.invalidations().is_empty());
        assert!(!repo
            .backend()
            .calls()
            .iter()
            .any(|c| matches!(c, BackendCall::List { .. })));
    }

    #[test]
    fn add_tag_to_three_selected_contacts() {
        let repo = repo_with_contacts(&[("Ann", "lead"), ("Bob", "lead"), ("Cy", "lead")]);
        let dispatcher = BulkDispatcher::default();
        let mut view: ListView<Contact> = ListView::new(contact_fields(), 25);
        block_on(view.refresh(&repo)).expect("refresh");
        view.selection_mut().select_all(true);
        assert_eq!(view.selection().count(), 3);

        let action: BulkAction =
            serde_json::from_value(serde_json::json!({"type": "add_tag", "data": {"tag": "vip"}}))
                .expect("action");
        let report = block_on(view.apply_bulk(&repo, &dispatcher, &action)).expect("bulk");

        assert_eq!(report.succeeded(), 3);
        assert!(view.selection().is_empty());
        assert_eq!(view.rows().len(), 3);
        for contact in view.rows() {
            let vip = contact.tags.iter().filter(|t| *t == "vip").count();
            assert_eq!(vip, 1, "{} should carry vip once", contact.id);
        }
        assert_eq!(
            repo.invalidations(),
            vec![InvalidationKey::Kind(EntityKind::Contact)]
        );
    }

    #[test]
    fn refetch_happens_after_partial_failure() {
        let repo = repo_with_contacts(&[("Ann", "lead"), ("Bob", "lead")]);
        let dispatcher = BulkDispatcher::default();
        let mut view: ListView<Contact> = ListView::new(contact_fields(), 25);
        block_on(view.refresh(&repo)).expect("refresh");
        let failing = view.rows()[0].id.clone();
        repo.backend().fail_mutations_for(failing.clone());
        view.selection_mut().select_all(true);
        repo.backend().clear_calls();

        let report = block_on(view.apply_bulk(
            &repo,
            &dispatcher,
            &BulkAction::AssignOwner {
                owner_id: "u-2".into(),
            },
        ))
        .expect("bulk");

        assert!(matches!(
            report.items[0].status,
            ItemStatus::Failed { .. }
        ));
        assert!(view.selection().is_empty());
        let calls = repo.backend().calls();
        assert!(matches!(calls.last(), Some(BackendCall::List { .. })));
        assert_eq!(view.rows()[1].owner_id, "u-2");
    }

    #[test]
    fn input_errors_keep_the_selection() {
        let repo = repo_with_contacts(&[("Ann", "lead")]);
        let dispatcher = BulkDispatcher::default();
        let mut view: ListView<Contact> = ListView::new(contact_fields(), 25);
        block_on(view.refresh(&repo)).expect("refresh");

        let empty = block_on(view.apply_bulk(&repo, &dispatcher, &BulkAction::Export));
        assert!(matches!(empty, Err(CrmError::EmptySelection)));

        view.selection_mut().select_all(true);
        let stage = BulkAction::ChangeStage {
            stage_id: "proposal".into(),
        };
        let unsupported = block_on(view.apply_bulk(&repo, &dispatcher, &stage));
        assert!(matches!(unsupported, Err(CrmError::Unsupported { .. })));
        assert_eq!(view.selection().count(), 1);
        assert!(repo.invalidations().is_empty());
    }

    #[test]
    fn change_stage_checks_pipeline_first() {
        let repo = Repository::new(InMemoryBackend::new());
        block_on(repo.backend().create(&DealDraft {
            owner_id: "u-1".into(),
            title: "Pilot".into(),
            value: 10.0,
            stage: "new".into(),
            ..DealDraft::default()
        }))
        .expect("create");
        let dispatcher = BulkDispatcher::default();
        let mut view: ListView<Deal> = ListView::new(deal_fields(), 25);
        block_on(view.refresh(&repo)).expect("refresh");
        view.selection_mut().select_all(true);

        let result = block_on(view.apply_bulk(
            &repo,
            &dispatcher,
            &BulkAction::ChangeStage {
                stage_id: "won".into(),
            },
        ));
        assert!(matches!(result, Err(CrmError::UnknownStage(_))));
        assert_eq!(view.selection().count(), 1);
    }

    #[test]
    fn filter_change_clears_selection_and_resets_page() {
        let repo = repo_with_contacts(&[("Ann", "lead"), ("Bob", "customer"), ("Cy", "lead")]);
        let mut view: ListView<Contact> = ListView::new(contact_fields(), 1);
        block_on(view.set_page(&repo, 1)).expect("page");
        view.selection_mut().select_all(true);

        let builder = view.filter_mut();
        let i = builder.add_condition();
        builder.set_field(i, "status").expect("field");
        builder.set_operator(i, Operator::Equals).expect("op");
        builder.set_value(i, "lead").expect("value");
        let j = builder.add_condition();
        builder.set_field(j, "firstName").expect("field");
        builder.set_operator(j, Operator::StartsWith).expect("op");
        builder.set_value(j, "c").expect("value");
        builder
            .set_logical_operator(j, LogicalOperator::Or)
            .expect("logical");

        block_on(view.apply_filter(&repo)).expect("filter");
        assert_eq!(view.query().page, 0);
        assert!(view.selection().is_empty());
        assert_eq!(view.rows().len(), 1);
        assert_eq!(view.rows()[0].first_name, "Ann");
    }
}
