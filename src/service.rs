//! Contract of the remote data service the engine talks to

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    Base, BaseId, BaseSummary, CellValue, Column, ColumnId, ColumnPatch, NewColumn, Row, RowId,
    SortConfig, Table, TableId, View, ViewId, ViewPatch,
};
use crate::predicate::FilterPreference;
use crate::table::sort::RowKey;

/// One page request of `getInfiniteTableData`
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub table_id: TableId,
    /// Key of the last row already received; `None` starts from the top
    pub cursor: Option<RowKey>,
    pub limit: usize,
    pub filters: Vec<FilterPreference>,
    pub sorts: Vec<SortConfig>,
    pub search: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    pub has_more: bool,
}

/// Operations are grouped by the entity they address. Every failure is a
/// typed [`crate::Error`]; missing entities are `Error::NotFound`.
#[async_trait(?Send)]
pub trait DataService {
    // === base ===
    async fn get_bases_by_last_updated(&self) -> Result<Vec<Base>>;
    async fn create_base(&self, name: &str) -> Result<Base>;
    async fn delete_base(&self, id: &BaseId) -> Result<()>;
    async fn update_base_name(&self, id: &BaseId, name: &str) -> Result<Base>;
    async fn get_base_name_and_color(&self, id: &BaseId) -> Result<BaseSummary>;

    // === table ===
    async fn get_table(&self, id: &TableId) -> Result<Table>;
    /// Most recently created table of a base, if any
    async fn get_latest_table(&self, base_id: &BaseId) -> Result<Option<Table>>;
    /// Creates a table with starter columns and a default view
    async fn create_default_table(&self, base_id: &BaseId) -> Result<(Table, View)>;
    async fn get_table_default_view(&self, table_id: &TableId) -> Result<Option<View>>;

    // === column ===
    async fn get_columns(&self, table_id: &TableId) -> Result<Vec<Column>>;
    async fn create_column(&self, table_id: &TableId, column: NewColumn) -> Result<Column>;
    async fn update_column(&self, id: &ColumnId, patch: ColumnPatch) -> Result<Column>;
    async fn delete_column(&self, id: &ColumnId) -> Result<()>;

    // === view ===
    async fn get_view(&self, id: &ViewId) -> Result<View>;
    async fn get_views_by_table(&self, table_id: &TableId) -> Result<Vec<View>>;
    async fn create_view(&self, table_id: &TableId, name: &str) -> Result<View>;
    async fn update_view(&self, id: &ViewId, patch: ViewPatch) -> Result<View>;
    async fn delete_view(&self, id: &ViewId) -> Result<()>;

    // === data ===
    async fn get_infinite_table_data(&self, request: &PageRequest) -> Result<Page>;
    async fn create_row(&self, table_id: &TableId, cells: HashMap<ColumnId, CellValue>) -> Result<Row>;
    async fn delete_row(&self, id: &RowId) -> Result<()>;
    /// `None` clears the cell
    async fn update_cell(&self, row_id: &RowId, column_id: &ColumnId, value: Option<CellValue>) -> Result<()>;
}
