//! One open (table, view): view config, pager, search and layout wired together

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EntityKind, Error, Result};
use crate::model::{
    BaseId, CellValue, Column, ColumnId, ColumnType, Row, RowId, SortConfig, Table, View, ViewEntry, ViewId,
};
use crate::mutation::{MutationExecutor, ViewMutation, ViewOutcome};
use crate::notice::NoticeBoard;
use crate::predicate::FilterPreference;
use crate::search::{SearchMatch, SearchNavigator};
use crate::service::DataService;
use crate::table::{PagerParams, TableData, TableDataPager};
use crate::view::{
    fit_widths, merge_highlights, search_highlights, sort_highlights, visible_columns, ColumnHighlight, ColumnLayout,
    HighlightKind, ViewConfigManager,
};

pub struct TableSession {
    base_id: BaseId,
    table: Table,
    view_id: ViewId,
    config: EngineConfig,
    manager: ViewConfigManager,
    pager: TableDataPager,
    search: RefCell<SearchNavigator>,
    views: Rc<RefCell<Vec<ViewEntry>>>,
    view_executor: MutationExecutor<ViewMutation>,
    widths: RefCell<HashMap<ColumnId, u32>>,
}

impl TableSession {
    /// Loads the view and the first page. A failed first page leaves the
    /// session open with the error on the pager, ready for `retry`.
    pub async fn open(
        service: Rc<dyn DataService>,
        notices: NoticeBoard,
        config: EngineConfig,
        base_id: BaseId,
        table: Table,
        view_id: ViewId,
    ) -> Result<Self> {
        let columns = service.get_columns(&table.id).await?;
        let manager = ViewConfigManager::new(service.clone(), notices.clone());
        manager.load(&view_id, columns).await?;
        let views = service.get_views_by_table(&table.id).await?;

        let session = Self {
            pager: TableDataPager::new(service.clone(), notices.clone(), config.page_size),
            view_executor: MutationExecutor::new(service, notices),
            views: Rc::new(RefCell::new(views.into_iter().map(ViewEntry::from).collect())),
            search: RefCell::new(SearchNavigator::new()),
            widths: RefCell::new(HashMap::new()),
            base_id,
            table,
            view_id,
            config,
            manager,
        };
        info!(table_id = %session.table.id, view_id = %session.view_id, "table session opened");

        if let Err(e) = session.pager.set_params(session.params()).await {
            debug!(error = %e, "first page failed, session stays open");
        }
        session.sync_columns();
        Ok(session)
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn view_id(&self) -> &ViewId {
        &self.view_id
    }

    pub fn manager(&self) -> &ViewConfigManager {
        &self.manager
    }

    pub fn pager(&self) -> &TableDataPager {
        &self.pager
    }

    pub fn table_data(&self) -> Rc<RefCell<TableData>> {
        self.pager.table_data()
    }

    pub fn loading(&self) -> bool {
        self.pager.loading()
    }

    pub fn error(&self) -> Option<Error> {
        self.pager.error()
    }

    /// What the pager should show for the current view config and search text
    pub fn params(&self) -> PagerParams {
        PagerParams {
            table_id: self.table.id.clone(),
            base_id: self.base_id.clone(),
            search: self.search.borrow().query().trim().to_string(),
            sorting: self.manager.active_sorts(),
            filtering: self.manager.active_filters(),
        }
    }

    // === view config ===

    pub async fn update_filters(&self, filters: Vec<FilterPreference>) -> Result<()> {
        let persisted = self.manager.update_filters(filters);
        self.reconfigure(persisted).await
    }

    pub async fn update_sorts(&self, sorts: Vec<SortConfig>) -> Result<()> {
        let persisted = self.manager.update_sorts(sorts);
        self.reconfigure(persisted).await
    }

    pub async fn update_hidden_columns(&self, hidden: Vec<ColumnId>) -> Result<()> {
        let persisted = self.manager.update_hidden_columns(hidden);
        self.reconfigure(persisted).await
    }

    pub async fn toggle_hidden_column(&self, id: &ColumnId) -> Result<()> {
        let persisted = self.manager.toggle_hidden_column(id);
        self.reconfigure(persisted).await
    }

    pub async fn show_all_columns(&self) -> Result<()> {
        let persisted = self.manager.show_all_columns();
        self.reconfigure(persisted).await
    }

    pub async fn hide_all_columns(&self) -> Result<()> {
        let persisted = self.manager.hide_all_columns();
        self.reconfigure(persisted).await
    }

    /// The config change is already applied locally: fetch for it while it
    /// persists, and fetch again for the restored config if persisting fails
    async fn reconfigure(&self, persisted: impl Future<Output = Result<()>>) -> Result<()> {
        let (persisted, fetched) = tokio::join!(persisted, self.pager.set_params(self.params()));
        if let Err(e) = persisted {
            if let Err(refetch) = self.pager.set_params(self.params()).await {
                warn!(error = %refetch, "refetch after reverted view change failed");
            }
            self.recompute_search();
            return Err(e);
        }
        self.recompute_search();
        fetched
    }

    // === search ===

    pub fn search_query(&self) -> String {
        self.search.borrow().query().to_string()
    }

    /// The query narrows the fetched rows and drives match navigation
    pub async fn set_search(&self, query: &str) -> Result<()> {
        self.search.borrow_mut().set_query(query);
        let fetched = self.pager.set_params(self.params()).await;
        self.recompute_search();
        fetched
    }

    pub fn search_matches(&self) -> Vec<SearchMatch> {
        self.search.borrow().matches().to_vec()
    }

    pub fn current_match(&self) -> Option<SearchMatch> {
        self.search.borrow().current().cloned()
    }

    pub fn search_status(&self) -> Option<String> {
        self.search.borrow().status()
    }

    /// Past the last loaded match pages are fetched until a new match shows
    /// up. The navigator stays readable while a page loads.
    pub async fn search_next(&self) -> Result<Option<SearchMatch>> {
        let (at_end, last) = {
            let search = self.search.borrow();
            (search.at_last_match(), search.matches().last().cloned())
        };
        if at_end {
            while self.pager.has_next_page() {
                if !self.pager.fetch_next_page().await? {
                    break;
                }
                self.recompute_search();
                let found = self.search.borrow_mut().advance_past(last.as_ref()).cloned();
                if found.is_some() {
                    return Ok(found);
                }
            }
        }
        Ok(self.search.borrow_mut().next().cloned())
    }

    pub fn search_previous(&self) -> Option<SearchMatch> {
        self.search.borrow_mut().previous().cloned()
    }

    /// Matches over the rows loaded so far
    pub fn recompute_search(&self) {
        let hidden = self.manager.hidden_columns();
        let data = self.pager.table_data();
        self.search.borrow_mut().recompute_from(&data.borrow(), &hidden);
    }

    // === rows and columns ===

    pub async fn update_cell(&self, row: &RowId, column: &ColumnId, value: Option<CellValue>) -> Result<()> {
        let result = self.pager.actions().update_cell(row, column, value).await;
        self.recompute_search();
        result
    }

    pub async fn create_row(&self, cells: HashMap<ColumnId, CellValue>) -> Result<Row> {
        self.pager.actions().create_row(cells).await
    }

    pub async fn delete_row(&self, row: &RowId) -> Result<()> {
        let result = self.pager.actions().delete_row(row).await;
        self.recompute_search();
        result
    }

    pub async fn create_column(&self, name: &str, column_type: ColumnType) -> Result<Column> {
        let result = self.pager.actions().create_column(name, column_type).await;
        self.sync_columns();
        result
    }

    pub async fn rename_column(&self, column: &ColumnId, name: &str) -> Result<()> {
        let result = self.pager.actions().rename_column(column, name).await;
        self.sync_columns();
        result
    }

    pub async fn change_column_type(&self, column: &ColumnId, column_type: ColumnType) -> Result<()> {
        let result = self.pager.actions().change_column_type(column, column_type).await;
        self.sync_columns();
        result
    }

    /// Filters and sorts on the deleted column drop out of the active sets
    pub async fn delete_column(&self, column: &ColumnId) -> Result<()> {
        let result = self
            .pager
            .actions()
            .delete_column_with(column, |_| {
                self.sync_columns();
                self.params()
            })
            .await;
        self.sync_columns();
        if result.is_ok() {
            self.widths.borrow_mut().remove(column);
        }
        self.recompute_search();
        result
    }

    pub async fn retry(&self) -> Result<()> {
        let result = self.pager.retry().await;
        self.recompute_search();
        result
    }

    pub async fn ensure_rows(&self, n: usize) -> Result<()> {
        let result = self.pager.ensure_rows(n).await;
        self.recompute_search();
        result
    }

    fn sync_columns(&self) {
        let columns = self.pager.table_data().borrow().columns.clone();
        self.manager.set_columns(columns);
    }

    // === views ===

    pub fn views(&self) -> Vec<ViewEntry> {
        self.views.borrow().clone()
    }

    pub fn create_view(&self, name: &str) -> impl Future<Output = Result<View>> {
        let table = self.table.id.clone();
        let settled = self.view_executor.execute(&self.views, ViewMutation::create(table.clone(), name));
        async move {
            match settled.await? {
                ViewOutcome::Saved(view) => Ok(view),
                ViewOutcome::Deleted => Err(Error::not_found(EntityKind::View, format!("new view of {}", table))),
            }
        }
    }

    pub fn rename_view(&self, id: &ViewId, name: &str) -> impl Future<Output = Result<()>> {
        let mutation = ViewMutation::Rename { id: id.clone(), name: name.to_string() };
        let settled = self.view_executor.execute(&self.views, mutation);
        async move { settled.await.map(|_| ()) }
    }

    pub fn delete_view(&self, id: &ViewId) -> impl Future<Output = Result<()>> {
        let settled = self.view_executor.execute(&self.views, ViewMutation::Delete { id: id.clone() });
        async move { settled.await.map(|_| ()) }
    }

    // === layout ===

    pub fn visible_columns(&self) -> Vec<Column> {
        self.manager.visible_columns()
    }

    pub fn layout(&self) -> ColumnLayout {
        let visible = self.visible_columns();
        let refs: Vec<&Column> = visible.iter().collect();
        ColumnLayout::compute(&refs, &self.widths.borrow(), self.config.default_column_width)
    }

    /// Size visible columns to their header and loaded cell text
    pub fn fit_columns(&self) {
        let data = self.pager.table_data();
        let data = data.borrow();
        let hidden = self.manager.hidden_columns();
        let visible = visible_columns(&data.columns, &hidden);
        let fitted = fit_widths(&visible, data.rows.rows(), &self.config);
        self.widths.borrow_mut().extend(fitted);
    }

    pub fn set_column_width(&self, column: &ColumnId, width: u32) {
        let width = width.clamp(self.config.min_column_width, self.config.max_column_width);
        self.widths.borrow_mut().insert(column.clone(), width);
    }

    /// Sort highlights by priority, replaced by search highlights where both apply
    pub fn highlights(&self) -> Vec<ColumnHighlight> {
        let colors = &self.config.highlight;
        let sorts = sort_highlights(&self.manager.active_sorts(), colors);
        let search = self.search.borrow();
        merge_highlights(&sorts, HighlightKind::Search, search_highlights(search.matched_columns(), colors))
    }

    /// Cancels outstanding fetches; dispatched edits settle without touching this session
    pub fn close(self) {
        self.pager.close();
        debug!(table_id = %self.table.id, phase = ?self.pager.phase(), "table session closed");
    }
}
