use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use async_trait::async_trait;
use tracing::debug;

use super::layout::{toggle_hidden, visible_columns};
use crate::error::{EntityKind, Error, Result};
use crate::model::{Column, ColumnId, SortConfig, View, ViewConfig, ViewId, ViewPatch};
use crate::mutation::{Command, EntityKey, MutationExecutor};
use crate::notice::NoticeBoard;
use crate::predicate::{FilterChain, FilterPreference};
use crate::service::DataService;

/// The loaded view document and the columns it is interpreted against
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    view_id: Option<ViewId>,
    config: ViewConfig,
    columns: Vec<Column>,
}

/// Replaces a view's whole `{filters, sorts, hiddenColumns}` document
#[derive(Debug, Clone, PartialEq)]
pub struct ViewConfigMutation {
    pub view: ViewId,
    pub config: ViewConfig,
}

#[async_trait(?Send)]
impl Command for ViewConfigMutation {
    type State = ViewState;
    type Snapshot = ViewConfig;
    type Output = View;

    fn label(&self) -> &'static str {
        "update view"
    }

    fn entity(&self) -> EntityKey {
        EntityKey::nested("view", &self.view, "config")
    }

    /// Each update carries the whole document
    fn supersedes(&self, _older: &Self) -> bool {
        true
    }

    fn apply(&self, state: &mut ViewState) -> Result<ViewConfig> {
        if state.view_id.as_ref() != Some(&self.view) {
            return Err(Error::not_found(EntityKind::View, &self.view));
        }
        Ok(std::mem::replace(&mut state.config, self.config.clone()))
    }

    async fn dispatch(&self, service: &dyn DataService) -> Result<View> {
        let patch = ViewPatch { name: None, config: Some(self.config.clone()) };
        service.update_view(&self.view, patch).await
    }

    fn commit(&self, _state: &mut ViewState, view: &View) {
        debug!(view_id = %view.id, "view config saved");
    }

    fn rollback(&self, state: &mut ViewState, snapshot: ViewConfig) {
        if state.view_id.as_ref() == Some(&self.view) {
            state.config = snapshot;
        }
    }
}

/// Owns the filters, sorts and hidden columns of the active view.
///
/// Updates apply locally as soon as they are requested; the returned
/// future persists them and reverts to the previous document on failure.
pub struct ViewConfigManager {
    service: Rc<dyn DataService>,
    executor: MutationExecutor<ViewConfigMutation>,
    state: Rc<RefCell<ViewState>>,
}

impl ViewConfigManager {
    pub fn new(service: Rc<dyn DataService>, notices: NoticeBoard) -> Self {
        Self {
            executor: MutationExecutor::new(service.clone(), notices),
            service,
            state: Rc::new(RefCell::new(ViewState::default())),
        }
    }

    pub async fn load(&self, view_id: &ViewId, columns: Vec<Column>) -> Result<ViewConfig> {
        let view = self.service.get_view(view_id).await?;
        let mut state = self.state.borrow_mut();
        *state = ViewState { view_id: Some(view.id), config: view.config, columns };
        debug!(view_id = %view_id, filters = state.config.filters.len(), sorts = state.config.sorts.len(), "view loaded");
        Ok(state.config.clone())
    }

    pub fn view_id(&self) -> Option<ViewId> {
        self.state.borrow().view_id.clone()
    }

    pub fn config(&self) -> ViewConfig {
        self.state.borrow().config.clone()
    }

    /// Complete filters on known columns with operators their type offers, by `order`
    pub fn active_filters(&self) -> Vec<FilterPreference> {
        let state = self.state.borrow();
        FilterChain::new(&state.config.filters, &state.columns).filters().cloned().collect()
    }

    pub fn active_sorts(&self) -> Vec<SortConfig> {
        let state = self.state.borrow();
        state
            .config
            .sorts
            .iter()
            .filter(|s| state.columns.iter().any(|c| c.id == s.column_id))
            .cloned()
            .collect()
    }

    pub fn hidden_columns(&self) -> Vec<ColumnId> {
        self.state.borrow().config.hidden_columns.clone()
    }

    pub fn columns(&self) -> Vec<Column> {
        self.state.borrow().columns.clone()
    }

    pub fn visible_columns(&self) -> Vec<Column> {
        let state = self.state.borrow();
        visible_columns(&state.columns, &state.config.hidden_columns)
            .into_iter()
            .cloned()
            .collect()
    }

    /// The table's columns changed; active sets follow on the next read
    pub fn set_columns(&self, columns: Vec<Column>) {
        self.state.borrow_mut().columns = columns;
    }

    pub fn update_filters(&self, filters: Vec<FilterPreference>) -> impl Future<Output = Result<()>> {
        let config = ViewConfig { filters, ..self.config() };
        self.persist(config)
    }

    pub fn update_sorts(&self, sorts: Vec<SortConfig>) -> impl Future<Output = Result<()>> {
        let config = ViewConfig { sorts, ..self.config() };
        self.persist(config)
    }

    pub fn update_hidden_columns(&self, hidden_columns: Vec<ColumnId>) -> impl Future<Output = Result<()>> {
        let config = ViewConfig { hidden_columns, ..self.config() };
        self.persist(config)
    }

    pub fn show_all_columns(&self) -> impl Future<Output = Result<()>> {
        self.update_hidden_columns(Vec::new())
    }

    pub fn hide_all_columns(&self) -> impl Future<Output = Result<()>> {
        let all = self.state.borrow().columns.iter().map(|c| c.id.clone()).collect();
        self.update_hidden_columns(all)
    }

    pub fn toggle_hidden_column(&self, id: &ColumnId) -> impl Future<Output = Result<()>> {
        let hidden = toggle_hidden(&self.hidden_columns(), id);
        self.update_hidden_columns(hidden)
    }

    fn persist(&self, config: ViewConfig) -> impl Future<Output = Result<()>> {
        let view = self.view_id();
        let settled = view.map(|view| self.executor.execute(&self.state, ViewConfigMutation { view, config }));

        async move {
            match settled {
                Some(settled) => settled.await.map(|_| ()),
                None => Err(Error::validation("view", "no view loaded")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnType, SortDirection, TableId};
    use crate::predicate::FilterOperator;
    use crate::service::memory::MemoryService;

    struct Fixture {
        service: Rc<MemoryService>,
        notices: NoticeBoard,
        table: TableId,
        view: ViewId,
    }

    fn fixture(config: ViewConfig) -> Fixture {
        let service = Rc::new(MemoryService::new());
        let base = service.add_base("Acme");
        let table = service.add_table(&base, "People");
        service.add_column(&table, "name", "Name", ColumnType::Text);
        service.add_column(&table, "age", "Age", ColumnType::Number);
        let view = service.add_view(&table, "Grid", config).unwrap();
        Fixture { service, notices: NoticeBoard::new(), table, view }
    }

    async fn manager(fx: &Fixture) -> ViewConfigManager {
        let service: Rc<dyn DataService> = fx.service.clone();
        let manager = ViewConfigManager::new(service, fx.notices.clone());
        let columns = fx.service.get_columns(&fx.table).await.unwrap();
        manager.load(&fx.view, columns).await.unwrap();
        manager
    }

    #[tokio::test]
    async fn active_sets_skip_incomplete_and_unknown_entries() {
        let fx = fixture(ViewConfig {
            filters: vec![
                FilterPreference::new("age", FilterOperator::GreaterThan, "30").with_order(1),
                FilterPreference::new("name", FilterOperator::Contains, "  ").with_order(0),
                FilterPreference::new("name", FilterOperator::GreaterThan, "b").with_order(2),
            ],
            sorts: vec![SortConfig::new("age", SortDirection::Desc)],
            hidden_columns: Vec::new(),
        });
        let manager = manager(&fx).await;

        assert_eq!(manager.config().filters.len(), 3);
        let active = manager.active_filters();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].column_id, ColumnId::from("age"));
        assert_eq!(manager.active_sorts().len(), 1);

        manager.set_columns(manager.columns().into_iter().filter(|c| c.id.as_str() != "age").collect());
        assert!(manager.active_filters().is_empty());
        assert!(manager.active_sorts().is_empty());
        assert_eq!(manager.config().sorts.len(), 1);
    }

    #[tokio::test]
    async fn updates_persist() {
        let fx = fixture(ViewConfig::default());
        let manager = manager(&fx).await;

        manager.update_sorts(vec![SortConfig::new("age", SortDirection::Asc)]).await.unwrap();
        manager.toggle_hidden_column(&ColumnId::from("name")).await.unwrap();

        let stored = fx.service.view(&fx.view).unwrap().config;
        assert_eq!(stored.sorts, vec![SortConfig::new("age", SortDirection::Asc)]);
        assert_eq!(stored.hidden_columns, vec![ColumnId::from("name")]);
        assert_eq!(manager.visible_columns().len(), 1);
    }

    #[tokio::test]
    async fn failed_update_reverts() {
        let fx = fixture(ViewConfig::default());
        let manager = manager(&fx).await;

        fx.service.fail_next("update_view", Error::Network("down".to_string()));
        let pending = manager.hide_all_columns();
        assert_eq!(manager.hidden_columns().len(), 2);
        assert!(manager.visible_columns().is_empty());

        assert!(pending.await.is_err());
        assert!(manager.hidden_columns().is_empty());
        assert!(fx.notices.active()[0].message.starts_with("Couldn't update view"));
        assert!(fx.service.view(&fx.view).unwrap().config.hidden_columns.is_empty());
    }

    #[tokio::test]
    async fn show_all_clears_hidden() {
        let fx = fixture(ViewConfig {
            hidden_columns: vec![ColumnId::from("age")],
            ..Default::default()
        });
        let manager = manager(&fx).await;
        manager.show_all_columns().await.unwrap();
        assert_eq!(manager.visible_columns().len(), 2);
    }

    #[tokio::test]
    async fn nothing_persists_without_a_view() {
        let service: Rc<dyn DataService> = Rc::new(MemoryService::new());
        let manager = ViewConfigManager::new(service, NoticeBoard::new());
        let err = manager.update_filters(Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::Validation { field: "view", .. }));
    }
}
