//! In-process data service used by the CLI and as the test double.
//!
//! Holds bases, tables, columns, rows and views in memory and executes page
//! queries with the same filter and ordering rules the engine uses locally.
//! Faults (offline mode, scripted failures) and latency can be injected.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use rayon::prelude::*;
use tracing::debug;

use super::{DataService, Page, PageRequest};
use crate::error::{EntityKind, Error, Result};
use crate::model::{
    Base, BaseId, BaseSummary, CellValue, Column, ColumnId, ColumnPatch, ColumnType, NewColumn, Row,
    RowId, SortDirection, Table, TableId, View, ViewConfig, ViewId, ViewPatch,
};
use crate::predicate::FilterChain;
use crate::table::sort::{KeyOrder, RowKey};

/// Row count above which queries filter and sort in parallel
const PARALLEL_THRESHOLD: usize = 10_000;

const BASE_COLORS: &[&str] = &["blue", "green", "purple", "orange", "red", "teal"];

struct StoredTable {
    table: Table,
    created_at: u64,
}

/// Views keep their configuration as one serialized document
struct StoredView {
    id: ViewId,
    table_id: TableId,
    name: String,
    document: String,
}

impl StoredView {
    fn to_view(&self) -> Result<View> {
        Ok(View {
            id: self.id.clone(),
            table_id: self.table_id.clone(),
            name: self.name.clone(),
            config: ViewConfig::from_document(&self.document)?,
        })
    }
}

#[derive(Default)]
struct Store {
    clock: u64,
    next_id: u64,
    bases: Vec<Base>,
    tables: Vec<StoredTable>,
    columns: Vec<Column>,
    rows: Vec<Row>,
    views: Vec<StoredView>,
}

impl Store {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:06}", prefix, self.next_id)
    }

    fn base_mut(&mut self, id: &BaseId) -> Result<&mut Base> {
        self.bases
            .iter_mut()
            .find(|b| &b.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Base, id))
    }

    fn table(&self, id: &TableId) -> Result<&Table> {
        self.tables
            .iter()
            .map(|t| &t.table)
            .find(|t| &t.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Table, id))
    }

    fn columns_of(&self, table_id: &TableId) -> Vec<Column> {
        let mut columns: Vec<Column> = self
            .columns
            .iter()
            .filter(|c| &c.table_id == table_id)
            .cloned()
            .collect();
        columns.sort_by(|a, b| a.position.total_cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        columns
    }

    fn column(&self, id: &ColumnId) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| &c.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Column, id))
    }

    fn view_mut(&mut self, id: &ViewId) -> Result<&mut StoredView> {
        self.views
            .iter_mut()
            .find(|v| &v.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::View, id))
    }

    /// Coerce incoming cells to their column types; unknown columns are rejected
    fn typed_cells(
        &self,
        table_id: &TableId,
        cells: HashMap<ColumnId, CellValue>,
    ) -> Result<HashMap<ColumnId, CellValue>> {
        cells
            .into_iter()
            .map(|(column_id, value)| {
                let column = self.column(&column_id)?;
                if &column.table_id != table_id {
                    return Err(Error::not_found(EntityKind::Column, &column_id));
                }
                let typed = value.coerce(column.column_type).ok_or_else(|| {
                    Error::validation("value", format!("'{}' is not a number", value.render()))
                })?;
                Ok((column_id, typed))
            })
            .collect()
    }

    /// Drop view references to columns that are not part of the table
    fn sanitize_config(&self, table_id: &TableId, mut config: ViewConfig) -> ViewConfig {
        let known = |id: &ColumnId| self.columns.iter().any(|c| &c.id == id && &c.table_id == table_id);
        config.filters.retain(|f| known(&f.column_id));
        config.sorts.retain(|s| known(&s.column_id));
        config.hidden_columns.retain(|c| known(c));
        config
    }

    fn insert_column(&mut self, table_id: &TableId, id: ColumnId, column: NewColumn) -> Column {
        let column = Column {
            id,
            table_id: table_id.clone(),
            name: column.name,
            column_type: column.column_type,
            position: column.position,
            visible: true,
            default_sort: SortDirection::Asc,
        };
        self.columns.push(column.clone());
        column
    }

    fn insert_view(&mut self, table_id: &TableId, name: &str, document: String) -> ViewId {
        let id = ViewId::new(self.fresh_id("viw"));
        self.views.push(StoredView {
            id: id.clone(),
            table_id: table_id.clone(),
            name: name.to_string(),
            document,
        });
        id
    }

    fn insert_table(&mut self, base_id: &BaseId, name: &str) -> Table {
        let table = Table {
            id: TableId::new(self.fresh_id("tbl")),
            base_id: base_id.clone(),
            name: name.to_string(),
        };
        let created_at = self.tick();
        self.tables.push(StoredTable { table: table.clone(), created_at });
        table
    }

    fn insert_row(&mut self, table_id: &TableId, cells: HashMap<ColumnId, CellValue>) -> Row {
        let now = self.tick();
        let row = Row {
            id: RowId::new(self.fresh_id("row")),
            table_id: table_id.clone(),
            created_at: now,
            updated_at: now,
            cells,
        };
        self.rows.push(row.clone());
        row
    }

    fn query(&self, request: &PageRequest) -> Result<Page> {
        self.table(&request.table_id)?;
        let columns = self.columns_of(&request.table_id);
        let chain = FilterChain::new(&request.filters, &columns);
        let order = KeyOrder::new(&request.sorts, &columns);
        let needle = request.search.trim().to_lowercase();

        let accept = |row: &Row| -> Option<RowKey> {
            if row.table_id != request.table_id || !chain.matches(&row.cells) {
                return None;
            }
            if !needle.is_empty() && !row_matches_search(row, &columns, &needle) {
                return None;
            }
            let key = order.key(&row.id, row.created_at, &row.cells);
            match &request.cursor {
                Some(cursor) if !order.is_after(&key, cursor) => None,
                _ => Some(key),
            }
        };

        let mut keyed: Vec<(RowKey, &Row)> = if self.rows.len() >= PARALLEL_THRESHOLD {
            self.rows
                .par_iter()
                .filter_map(|row| accept(row).map(|key| (key, row)))
                .collect()
        } else {
            self.rows
                .iter()
                .filter_map(|row| accept(row).map(|key| (key, row)))
                .collect()
        };

        let cmp = |a: &(RowKey, &Row), b: &(RowKey, &Row)| order.compare(&a.0, &b.0);
        if keyed.len() >= PARALLEL_THRESHOLD {
            keyed.par_sort_unstable_by(cmp);
        } else {
            keyed.sort_unstable_by(cmp);
        }

        let has_more = keyed.len() > request.limit;
        let rows = keyed
            .into_iter()
            .take(request.limit)
            .map(|(_, row)| row.clone())
            .collect();

        Ok(Page { rows, has_more })
    }
}

fn row_matches_search(row: &Row, columns: &[Column], needle: &str) -> bool {
    columns.iter().any(|c| {
        row.cells
            .get(&c.id)
            .map(|v| v.render().to_lowercase().contains(needle))
            .unwrap_or(false)
    })
}

#[derive(Default)]
struct Faults {
    offline: bool,
    scripted: VecDeque<(&'static str, Error)>,
    delays: VecDeque<(&'static str, Duration)>,
    calls: HashMap<&'static str, usize>,
}

#[derive(Default)]
pub struct MemoryService {
    store: RefCell<Store>,
    faults: RefCell<Faults>,
    latency: Cell<Option<Duration>>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    // === fault injection ===

    /// Every call fails with a network error while offline
    pub fn set_offline(&self, offline: bool) {
        self.faults.borrow_mut().offline = offline;
    }

    /// The next call of `op` (a trait method name) fails with `err`
    pub fn fail_next(&self, op: &'static str, err: Error) {
        self.faults.borrow_mut().scripted.push_back((op, err));
    }

    /// The next call of `op` is held for `delay` before it executes
    pub fn delay_next(&self, op: &'static str, delay: Duration) {
        self.faults.borrow_mut().delays.push_back((op, delay));
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.latency.set(latency);
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.faults.borrow().calls.get(op).copied().unwrap_or(0)
    }

    async fn enter(&self, op: &'static str) -> Result<()> {
        let delay = {
            let mut faults = self.faults.borrow_mut();
            *faults.calls.entry(op).or_default() += 1;
            let scripted = faults.delays.iter().position(|(o, _)| *o == op);
            scripted
                .and_then(|pos| faults.delays.remove(pos))
                .map(|(_, d)| d)
                .or(self.latency.get())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = self.faults.borrow_mut();
        if faults.offline {
            return Err(Error::Network(format!("{}: service unreachable", op)));
        }
        if let Some(pos) = faults.scripted.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = faults.scripted.remove(pos) {
                debug!(op, error = %err, "injected failure");
                return Err(err);
            }
        }
        Ok(())
    }

    // === seeding, synchronous and fault free ===

    pub fn add_base(&self, name: &str) -> BaseId {
        let mut store = self.store.borrow_mut();
        let id = BaseId::new(store.fresh_id("app"));
        let color = BASE_COLORS[store.bases.len() % BASE_COLORS.len()].to_string();
        let updated_at = store.tick();
        store.bases.push(Base { id: id.clone(), name: name.to_string(), color, updated_at });
        id
    }

    pub fn add_table(&self, base_id: &BaseId, name: &str) -> TableId {
        self.store.borrow_mut().insert_table(base_id, name).id
    }

    /// Columns are appended after the table's existing columns
    pub fn add_column(&self, table_id: &TableId, id: &str, name: &str, column_type: ColumnType) -> ColumnId {
        let mut store = self.store.borrow_mut();
        let position = store.columns_of(table_id).len() as f64;
        let column = NewColumn { name: name.to_string(), column_type, position };
        store.insert_column(table_id, ColumnId::from(id), column).id
    }

    pub fn add_row<'a>(&self, table_id: &TableId, cells: impl IntoIterator<Item = (&'a str, CellValue)>) -> RowId {
        let cells = cells.into_iter().map(|(k, v)| (ColumnId::from(k), v)).collect();
        self.add_row_cells(table_id, cells)
    }

    /// Cells are stored as given; callers coerce them to the column types
    pub fn add_row_cells(&self, table_id: &TableId, cells: HashMap<ColumnId, CellValue>) -> RowId {
        self.store.borrow_mut().insert_row(table_id, cells).id
    }

    pub fn add_view(&self, table_id: &TableId, name: &str, config: ViewConfig) -> Result<ViewId> {
        let document = config.to_document()?;
        Ok(self.store.borrow_mut().insert_view(table_id, name, document))
    }

    pub fn base(&self, id: &BaseId) -> Option<Base> {
        self.store.borrow().bases.iter().find(|b| &b.id == id).cloned()
    }

    pub fn view(&self, id: &ViewId) -> Option<View> {
        self.store.borrow().views.iter().find(|v| &v.id == id).and_then(|v| v.to_view().ok())
    }

    pub fn cell(&self, row_id: &RowId, column_id: &ColumnId) -> Option<CellValue> {
        let store = self.store.borrow();
        let row = store.rows.iter().find(|r| &r.id == row_id)?;
        row.cells.get(column_id).cloned()
    }

    pub fn row_count(&self, table_id: &TableId) -> usize {
        self.store.borrow().rows.iter().filter(|r| &r.table_id == table_id).count()
    }
}

fn require_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name", "must not be empty"));
    }
    Ok(name)
}

#[async_trait(?Send)]
impl DataService for MemoryService {
    async fn get_bases_by_last_updated(&self) -> Result<Vec<Base>> {
        self.enter("get_bases_by_last_updated").await?;
        let mut bases = self.store.borrow().bases.clone();
        bases.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(bases)
    }

    async fn create_base(&self, name: &str) -> Result<Base> {
        self.enter("create_base").await?;
        let name = require_name(name)?;
        let id = self.add_base(name);
        self.base(&id).ok_or_else(|| Error::not_found(EntityKind::Base, &id))
    }

    async fn delete_base(&self, id: &BaseId) -> Result<()> {
        self.enter("delete_base").await?;
        let mut store = self.store.borrow_mut();
        store.base_mut(id)?;
        store.bases.retain(|b| &b.id != id);

        let tables: Vec<TableId> = store
            .tables
            .iter()
            .filter(|t| &t.table.base_id == id)
            .map(|t| t.table.id.clone())
            .collect();
        store.tables.retain(|t| &t.table.base_id != id);
        store.columns.retain(|c| !tables.contains(&c.table_id));
        store.rows.retain(|r| !tables.contains(&r.table_id));
        store.views.retain(|v| !tables.contains(&v.table_id));
        Ok(())
    }

    async fn update_base_name(&self, id: &BaseId, name: &str) -> Result<Base> {
        self.enter("update_base_name").await?;
        let name = require_name(name)?;
        let mut store = self.store.borrow_mut();
        let now = store.tick();
        let base = store.base_mut(id)?;
        base.name = name.to_string();
        base.updated_at = now;
        Ok(base.clone())
    }

    async fn get_base_name_and_color(&self, id: &BaseId) -> Result<BaseSummary> {
        self.enter("get_base_name_and_color").await?;
        let base = self.base(id).ok_or_else(|| Error::not_found(EntityKind::Base, id))?;
        Ok(BaseSummary { name: base.name, color: base.color })
    }

    async fn get_table(&self, id: &TableId) -> Result<Table> {
        self.enter("get_table").await?;
        self.store.borrow().table(id).cloned()
    }

    async fn get_latest_table(&self, base_id: &BaseId) -> Result<Option<Table>> {
        self.enter("get_latest_table").await?;
        let store = self.store.borrow();
        if !store.bases.iter().any(|b| &b.id == base_id) {
            return Err(Error::not_found(EntityKind::Base, base_id));
        }
        Ok(store
            .tables
            .iter()
            .filter(|t| &t.table.base_id == base_id)
            .max_by_key(|t| t.created_at)
            .map(|t| t.table.clone()))
    }

    async fn create_default_table(&self, base_id: &BaseId) -> Result<(Table, View)> {
        self.enter("create_default_table").await?;
        let mut store = self.store.borrow_mut();
        store.base_mut(base_id)?;

        let count = store.tables.iter().filter(|t| &t.table.base_id == base_id).count();
        let table = store.insert_table(base_id, &format!("Table {}", count + 1));
        let starter = [("Name", ColumnType::Text), ("Notes", ColumnType::Text), ("Amount", ColumnType::Number)];
        for (position, (name, column_type)) in starter.into_iter().enumerate() {
            let id = ColumnId::new(store.fresh_id("fld"));
            let column = NewColumn { name: name.to_string(), column_type, position: position as f64 };
            store.insert_column(&table.id, id, column);
        }
        for _ in 0..3 {
            store.insert_row(&table.id, HashMap::new());
        }

        let document = ViewConfig::default().to_document()?;
        let view_id = store.insert_view(&table.id, "Grid view", document);
        let view = store.view_mut(&view_id)?.to_view()?;
        Ok((table, view))
    }

    async fn get_table_default_view(&self, table_id: &TableId) -> Result<Option<View>> {
        self.enter("get_table_default_view").await?;
        let store = self.store.borrow();
        store.table(table_id)?;
        store
            .views
            .iter()
            .find(|v| &v.table_id == table_id)
            .map(|v| v.to_view())
            .transpose()
    }

    async fn get_columns(&self, table_id: &TableId) -> Result<Vec<Column>> {
        self.enter("get_columns").await?;
        let store = self.store.borrow();
        store.table(table_id)?;
        Ok(store.columns_of(table_id))
    }

    async fn create_column(&self, table_id: &TableId, column: NewColumn) -> Result<Column> {
        self.enter("create_column").await?;
        require_name(&column.name)?;
        let mut store = self.store.borrow_mut();
        store.table(table_id)?;
        let id = ColumnId::new(store.fresh_id("fld"));
        Ok(store.insert_column(table_id, id, column))
    }

    async fn update_column(&self, id: &ColumnId, patch: ColumnPatch) -> Result<Column> {
        self.enter("update_column").await?;
        if let Some(name) = &patch.name {
            require_name(name)?;
        }

        let mut store = self.store.borrow_mut();
        store.column(id)?;

        if let Some(column_type) = patch.column_type {
            for row in store.rows.iter_mut() {
                if let Some(value) = row.cells.remove(id) {
                    if let Some(converted) = value.coerce(column_type) {
                        row.cells.insert(id.clone(), converted);
                    }
                }
            }
        }

        let column = store
            .columns
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Column, id))?;
        if let Some(name) = patch.name {
            column.name = name.trim().to_string();
        }
        if let Some(column_type) = patch.column_type {
            column.column_type = column_type;
        }
        if let Some(position) = patch.position {
            column.position = position;
        }
        if let Some(visible) = patch.visible {
            column.visible = visible;
        }
        Ok(column.clone())
    }

    async fn delete_column(&self, id: &ColumnId) -> Result<()> {
        self.enter("delete_column").await?;
        let mut store = self.store.borrow_mut();
        let table_id = store.column(id)?.table_id.clone();
        store.columns.retain(|c| &c.id != id);
        for row in store.rows.iter_mut().filter(|r| r.table_id == table_id) {
            row.cells.remove(id);
        }
        for view in store.views.iter_mut().filter(|v| v.table_id == table_id) {
            let mut config = ViewConfig::from_document(&view.document)?;
            config.scrub_column(id);
            view.document = config.to_document()?;
        }
        Ok(())
    }

    async fn get_view(&self, id: &ViewId) -> Result<View> {
        self.enter("get_view").await?;
        self.store.borrow_mut().view_mut(id)?.to_view()
    }

    async fn get_views_by_table(&self, table_id: &TableId) -> Result<Vec<View>> {
        self.enter("get_views_by_table").await?;
        let store = self.store.borrow();
        store.table(table_id)?;
        store
            .views
            .iter()
            .filter(|v| &v.table_id == table_id)
            .map(|v| v.to_view())
            .collect()
    }

    async fn create_view(&self, table_id: &TableId, name: &str) -> Result<View> {
        self.enter("create_view").await?;
        let name = require_name(name)?;
        let mut store = self.store.borrow_mut();
        store.table(table_id)?;
        let document = ViewConfig::default().to_document()?;
        let id = store.insert_view(table_id, name, document);
        store.view_mut(&id)?.to_view()
    }

    async fn update_view(&self, id: &ViewId, patch: ViewPatch) -> Result<View> {
        self.enter("update_view").await?;
        let mut store = self.store.borrow_mut();
        let table_id = store.view_mut(id)?.table_id.clone();

        let document = match patch.config {
            Some(config) => Some(store.sanitize_config(&table_id, config).to_document()?),
            None => None,
        };
        let name = patch.name.as_deref().map(require_name).transpose()?.map(str::to_string);

        let view = store.view_mut(id)?;
        if let Some(name) = name {
            view.name = name;
        }
        if let Some(document) = document {
            view.document = document;
        }
        view.to_view()
    }

    async fn delete_view(&self, id: &ViewId) -> Result<()> {
        self.enter("delete_view").await?;
        let mut store = self.store.borrow_mut();
        store.view_mut(id)?;
        store.views.retain(|v| &v.id != id);
        Ok(())
    }

    async fn get_infinite_table_data(&self, request: &PageRequest) -> Result<Page> {
        self.enter("get_infinite_table_data").await?;
        self.store.borrow().query(request)
    }

    async fn create_row(&self, table_id: &TableId, cells: HashMap<ColumnId, CellValue>) -> Result<Row> {
        self.enter("create_row").await?;
        let mut store = self.store.borrow_mut();
        store.table(table_id)?;
        let cells = store.typed_cells(table_id, cells)?;
        Ok(store.insert_row(table_id, cells))
    }

    async fn delete_row(&self, id: &RowId) -> Result<()> {
        self.enter("delete_row").await?;
        let mut store = self.store.borrow_mut();
        if !store.rows.iter().any(|r| &r.id == id) {
            return Err(Error::not_found(EntityKind::Row, id));
        }
        store.rows.retain(|r| &r.id != id);
        Ok(())
    }

    async fn update_cell(&self, row_id: &RowId, column_id: &ColumnId, value: Option<CellValue>) -> Result<()> {
        self.enter("update_cell").await?;
        let mut store = self.store.borrow_mut();
        let table_id = store
            .rows
            .iter()
            .find(|r| &r.id == row_id)
            .map(|r| r.table_id.clone())
            .ok_or_else(|| Error::not_found(EntityKind::Row, row_id))?;

        let typed = match value {
            Some(value) => {
                let mut cells = HashMap::from([(column_id.clone(), value)]);
                cells = store.typed_cells(&table_id, cells)?;
                cells.remove(column_id)
            }
            None => {
                store.column(column_id)?;
                None
            }
        };

        let now = store.tick();
        if let Some(row) = store.rows.iter_mut().find(|r| &r.id == row_id) {
            match typed {
                Some(value) => row.cells.insert(column_id.clone(), value),
                None => row.cells.remove(column_id),
            };
            row.updated_at = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test;
