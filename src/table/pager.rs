use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::{RowCache, TableData};
use super::sort::{KeyOrder, RowKey};
use crate::error::{EntityKind, Error, Result};
use crate::model::{BaseId, CellValue, Column, ColumnId, ColumnType, NewColumn, Row, RowId, SortConfig, TableId};
use crate::mutation::{Command, MutationExecutor, TableMutation, TableOutcome};
use crate::notice::NoticeBoard;
use crate::predicate::FilterPreference;
use crate::service::{DataService, Page, PageRequest};

/// Everything that selects which rows are shown, in which order
#[derive(Debug, Clone, PartialEq)]
pub struct PagerParams {
    pub table_id: TableId,
    pub base_id: BaseId,
    pub search: String,
    pub sorting: Vec<SortConfig>,
    pub filtering: Vec<FilterPreference>,
}

impl PagerParams {
    pub fn new(base_id: BaseId, table_id: TableId) -> Self {
        Self {
            table_id,
            base_id,
            search: String::new(),
            sorting: Vec::new(),
            filtering: Vec::new(),
        }
    }

    fn request(&self, cursor: Option<RowKey>, limit: usize) -> PageRequest {
        PageRequest {
            table_id: self.table_id.clone(),
            cursor,
            limit,
            filters: self.filtering.clone(),
            sorts: self.sorting.clone(),
            search: self.search.clone(),
        }
    }
}

/// Last state entered by the fetch state machine; every state but
/// `Loading` accepts a new fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Loading,
    Success,
    Error,
    Cancelled,
}

struct Fetch {
    /// Parameters most recently asked for
    params: Option<PagerParams>,
    /// Parameters the cache currently reflects
    loaded: Option<PagerParams>,
    seq: u64,
    phase: FetchPhase,
    error: Option<Error>,
    token: CancellationToken,
    order: Option<KeyOrder>,
    cursor: Option<RowKey>,
    has_next: bool,
    /// Server rows received for `loaded`
    fetched: usize,
}

/// Fetches the rows of one table page by page with keyset cursors.
///
/// Each first-page load takes a new sequence number and cancels the
/// previous load; a completion is applied only while its sequence number
/// is current and its token is live. The cache is swapped only once the
/// first page of the new parameters arrived.
pub struct TableDataPager {
    service: Rc<dyn DataService>,
    notices: NoticeBoard,
    executor: MutationExecutor<TableMutation>,
    page_size: usize,
    data: Rc<RefCell<TableData>>,
    fetch: RefCell<Fetch>,
    session: CancellationToken,
}

async fn until_cancelled<T>(token: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

impl TableDataPager {
    pub fn new(service: Rc<dyn DataService>, notices: NoticeBoard, page_size: usize) -> Self {
        let session = CancellationToken::new();
        Self {
            executor: MutationExecutor::new(service.clone(), notices.clone()),
            service,
            notices,
            page_size: page_size.max(1),
            data: Rc::new(RefCell::new(TableData::default())),
            fetch: RefCell::new(Fetch {
                params: None,
                loaded: None,
                seq: 0,
                phase: FetchPhase::Idle,
                error: None,
                token: session.child_token(),
                order: None,
                cursor: None,
                has_next: false,
                fetched: 0,
            }),
            session,
        }
    }

    // === accessors ===

    pub fn loading(&self) -> bool {
        self.fetch.borrow().phase == FetchPhase::Loading
    }

    pub fn phase(&self) -> FetchPhase {
        self.fetch.borrow().phase
    }

    pub fn error(&self) -> Option<Error> {
        self.fetch.borrow().error.clone()
    }

    pub fn params(&self) -> Option<PagerParams> {
        self.fetch.borrow().params.clone()
    }

    /// Ordered rows and columns; shared with the mutation executor
    pub fn table_data(&self) -> Rc<RefCell<TableData>> {
        self.data.clone()
    }

    pub fn row_count(&self) -> usize {
        self.data.borrow().rows.len()
    }

    pub fn has_next_page(&self) -> bool {
        let fetch = self.fetch.borrow();
        fetch.has_next && fetch.loaded.is_some() && fetch.loaded == fetch.params
    }

    pub fn actions(&self) -> TableActions<'_> {
        TableActions { pager: self }
    }

    // === fetching ===

    /// Restart from the first page unless the same parameters are already loaded
    pub async fn set_params(&self, params: PagerParams) -> Result<()> {
        {
            let fetch = self.fetch.borrow();
            if fetch.loaded.as_ref() == Some(&params) && fetch.params.as_ref() == Some(&params) {
                return Ok(());
            }
        }
        self.load_first_page(params, self.page_size).await
    }

    /// Whether a page was fetched and applied; no-op without a next page
    /// or while a page is in flight
    pub async fn fetch_next_page(&self) -> Result<bool> {
        self.next_page().await
    }

    /// Page until at least `n` rows are cached or the result set is exhausted
    pub async fn ensure_rows(&self, n: usize) -> Result<()> {
        while self.row_count() < n && self.has_next_page() {
            if !self.next_page().await? {
                break;
            }
        }
        Ok(())
    }

    /// Re-issue whatever failed with the same parameters
    pub async fn retry(&self) -> Result<()> {
        let (params, loaded) = {
            let fetch = self.fetch.borrow();
            (fetch.params.clone(), fetch.loaded.is_some() && fetch.loaded == fetch.params)
        };
        match params {
            Some(_) if loaded => self.next_page().await.map(|_| ()),
            Some(params) => self.load_first_page(params, self.page_size).await,
            None => Ok(()),
        }
    }

    /// Refetch the loaded window from the first page; the cache is only
    /// replaced when the refetch succeeds
    pub async fn invalidate(&self) -> Result<()> {
        self.invalidate_with(|params| params).await
    }

    /// Like `invalidate`, refetching for the parameters `refine` derives
    /// from the current ones
    pub async fn invalidate_with(&self, refine: impl FnOnce(PagerParams) -> PagerParams) -> Result<()> {
        let (params, limit) = {
            let fetch = self.fetch.borrow();
            (fetch.params.clone(), fetch.fetched.max(self.page_size))
        };
        match params {
            Some(params) => self.load_first_page(refine(params), limit).await,
            None => Ok(()),
        }
    }

    /// Cancel every fetch of this pager, now and later
    pub fn close(&self) {
        self.session.cancel();
        let mut fetch = self.fetch.borrow_mut();
        fetch.seq += 1;
        if fetch.phase == FetchPhase::Loading {
            fetch.phase = FetchPhase::Cancelled;
        }
        debug!(seq = fetch.seq, "pager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_cancelled()
    }

    fn begin(&self, params: PagerParams) -> (u64, CancellationToken) {
        let mut fetch = self.fetch.borrow_mut();
        fetch.token.cancel();
        if fetch.phase == FetchPhase::Loading {
            debug!(seq = fetch.seq, "fetch cancelled by newer parameters");
            fetch.phase = FetchPhase::Cancelled;
        }
        fetch.seq += 1;
        fetch.token = self.session.child_token();
        fetch.params = Some(params);
        fetch.phase = FetchPhase::Loading;
        (fetch.seq, fetch.token.clone())
    }

    fn is_current(&self, seq: u64, token: &CancellationToken) -> bool {
        !token.is_cancelled() && self.fetch.borrow().seq == seq
    }

    async fn load_first_page(&self, params: PagerParams, limit: usize) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let (seq, token) = self.begin(params.clone());
        let request = params.request(None, limit);
        debug!(seq, table_id = %params.table_id, limit, "loading first page");

        let load = async {
            let columns = self.service.get_columns(&params.table_id).await?;
            let page = self.service.get_infinite_table_data(&request).await?;
            Ok::<_, Error>((columns, page))
        };
        let Some(result) = until_cancelled(&token, load).await else {
            return Ok(());
        };
        if !self.is_current(seq, &token) {
            debug!(seq, "discarding stale first page");
            return Ok(());
        }

        match result {
            Ok((columns, page)) => {
                self.swap(params, columns, page);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn next_page(&self) -> Result<bool> {
        let (seq, token, request) = {
            let mut fetch = self.fetch.borrow_mut();
            if fetch.phase == FetchPhase::Loading || !fetch.has_next || fetch.loaded != fetch.params || self.is_closed() {
                return Ok(false);
            }
            let Some(params) = fetch.params.as_ref() else {
                return Ok(false);
            };
            let request = params.request(fetch.cursor.clone(), self.page_size);
            fetch.phase = FetchPhase::Loading;
            (fetch.seq, fetch.token.clone(), request)
        };
        debug!(seq, "loading next page");

        let Some(result) = until_cancelled(&token, self.service.get_infinite_table_data(&request)).await else {
            return Ok(false);
        };
        if !self.is_current(seq, &token) {
            debug!(seq, "discarding stale page");
            return Ok(false);
        }

        match result {
            Ok(page) => {
                self.append(page);
                Ok(true)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn swap(&self, params: PagerParams, columns: Vec<Column>, page: Page) {
        let mut fetch = self.fetch.borrow_mut();
        let mut data = self.data.borrow_mut();

        let same_table = fetch.loaded.as_ref().map(|p| &p.table_id) == Some(&params.table_id);
        let order = KeyOrder::new(&params.sorting, &columns);

        let mut rows = RowCache::new();
        fetch.cursor = page.rows.last().map(|r| order.key(&r.id, r.created_at, &r.cells));
        fetch.fetched = page.rows.len();
        fetch.has_next = page.has_more;
        rows.extend_page(page.rows);

        // rows and columns still waiting on the service outlive a refetch
        if same_table {
            for entry in data.rows.rows().iter().filter(|r| r.id.is_pending()) {
                rows.push(entry.clone());
            }
        } else {
            data.pending_columns.clear();
        }

        data.set_columns(columns);
        data.rows = rows;
        debug!(seq = fetch.seq, rows = data.rows.len(), has_next = fetch.has_next, "first page applied");

        fetch.order = Some(order);
        fetch.loaded = Some(params);
        fetch.phase = FetchPhase::Success;
        fetch.error = None;
    }

    fn append(&self, page: Page) {
        let mut fetch = self.fetch.borrow_mut();
        if let (Some(order), Some(last)) = (fetch.order.as_ref(), page.rows.last()) {
            let cursor = order.key(&last.id, last.created_at, &last.cells);
            fetch.cursor = Some(cursor);
        }
        fetch.fetched += page.rows.len();
        fetch.has_next = page.has_more;

        let added = self.data.borrow_mut().rows.extend_page(page.rows);
        debug!(seq = fetch.seq, added, has_next = fetch.has_next, "page applied");

        fetch.phase = FetchPhase::Success;
        fetch.error = None;
    }

    fn fail(&self, e: Error) -> Error {
        let mut fetch = self.fetch.borrow_mut();
        warn!(seq = fetch.seq, error = %e, "fetch failed");
        fetch.phase = FetchPhase::Error;
        fetch.error = Some(e.clone());
        self.notices.error(format!("Couldn't load rows: {}", e));
        e
    }

    fn table_id(&self) -> Result<TableId> {
        self.fetch
            .borrow()
            .params
            .as_ref()
            .map(|p| p.table_id.clone())
            .ok_or_else(|| Error::validation("table", "no table selected"))
    }
}

impl Drop for TableDataPager {
    fn drop(&mut self) {
        self.session.cancel();
    }
}

/// Row and column edits of the pager's table, run through the optimistic executor
#[derive(Clone, Copy)]
pub struct TableActions<'a> {
    pager: &'a TableDataPager,
}

impl<'a> TableActions<'a> {
    /// Applies `mutation` right away. Column type changes and deletions
    /// refetch the loaded window once they settle.
    pub fn submit(&self, mutation: TableMutation) -> impl Future<Output = Result<TableOutcome>> + 'a {
        self.submit_with(mutation, |params| params)
    }

    /// Like `submit`; a successful mutation that refetches does so for the
    /// parameters `refine` derives from the current ones
    pub fn submit_with(
        &self,
        mutation: TableMutation,
        refine: impl FnOnce(PagerParams) -> PagerParams + 'a,
    ) -> impl Future<Output = Result<TableOutcome>> + 'a {
        let pager = self.pager;
        let invalidates = mutation.invalidates_query();
        let settled = pager.executor.execute(&pager.data, mutation);

        async move {
            let outcome = settled.await?;
            if invalidates {
                if let Err(e) = pager.invalidate_with(refine).await {
                    warn!(error = %e, "refetch after column change failed");
                }
            }
            Ok(outcome)
        }
    }

    pub async fn update_cell(&self, row: &RowId, column: &ColumnId, value: Option<CellValue>) -> Result<()> {
        self.submit(TableMutation::update_cell(row.clone(), column.clone(), value)).await?;
        Ok(())
    }

    pub async fn create_row(&self, cells: HashMap<ColumnId, CellValue>) -> Result<Row> {
        let table = self.pager.table_id()?;
        match self.submit(TableMutation::create_row(table.clone(), cells)).await? {
            TableOutcome::RowCreated(row) => Ok(row),
            _ => Err(Error::not_found(EntityKind::Row, format!("new row of {}", table))),
        }
    }

    pub async fn delete_row(&self, row: &RowId) -> Result<()> {
        self.submit(TableMutation::DeleteRow { row: row.clone() }).await?;
        Ok(())
    }

    /// Appends a column after the last one
    pub async fn create_column(&self, name: &str, column_type: ColumnType) -> Result<Column> {
        let table = self.pager.table_id()?;
        let position = self.pager.data.borrow().next_position();
        let column = NewColumn { name: name.to_string(), column_type, position };
        match self.submit(TableMutation::create_column(table.clone(), column)).await? {
            TableOutcome::ColumnCreated(column) => Ok(column),
            _ => Err(Error::not_found(EntityKind::Column, format!("new column of {}", table))),
        }
    }

    pub async fn rename_column(&self, column: &ColumnId, name: &str) -> Result<()> {
        let mutation = TableMutation::RenameColumn { column: column.clone(), name: name.to_string() };
        self.submit(mutation).await?;
        Ok(())
    }

    pub async fn change_column_type(&self, column: &ColumnId, column_type: ColumnType) -> Result<()> {
        self.submit(TableMutation::ChangeColumnType { column: column.clone(), column_type }).await?;
        Ok(())
    }

    pub async fn delete_column(&self, column: &ColumnId) -> Result<()> {
        self.delete_column_with(column, |params| params).await
    }

    /// Deletes a column; `refine` drops whatever the refetch must no longer
    /// filter or sort on
    pub async fn delete_column_with(
        &self,
        column: &ColumnId,
        refine: impl FnOnce(PagerParams) -> PagerParams + 'a,
    ) -> Result<()> {
        self.submit_with(TableMutation::DeleteColumn { column: column.clone() }, refine).await?;
        Ok(())
    }
}
