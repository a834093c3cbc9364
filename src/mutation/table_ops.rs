use std::collections::HashMap;

use async_trait::async_trait;

use super::command::{validate_name, Command, EntityKey};
use crate::error::{EntityKind, Error, Result};
use crate::model::{
    CellValue, Column, ColumnId, ColumnPatch, ColumnType, Identity, LocalId, NewColumn, Row,
    RowEntry, RowId, TableId,
};
use crate::service::DataService;
use crate::table::cache::{PendingColumn, TableData};

/// Edits to the rows and columns of one table session
#[derive(Debug, Clone, PartialEq)]
pub enum TableMutation {
    UpdateCell {
        row: RowId,
        column: ColumnId,
        /// `None` clears the cell
        value: Option<CellValue>,
    },
    CreateRow {
        table: TableId,
        local: LocalId,
        cells: HashMap<ColumnId, CellValue>,
    },
    DeleteRow {
        row: RowId,
    },
    CreateColumn {
        table: TableId,
        local: LocalId,
        column: NewColumn,
    },
    RenameColumn {
        column: ColumnId,
        name: String,
    },
    ChangeColumnType {
        column: ColumnId,
        column_type: ColumnType,
    },
    DeleteColumn {
        column: ColumnId,
    },
}

impl TableMutation {
    pub fn update_cell(row: RowId, column: ColumnId, value: Option<CellValue>) -> Self {
        TableMutation::UpdateCell { row, column, value }
    }

    pub fn create_row(table: TableId, cells: HashMap<ColumnId, CellValue>) -> Self {
        TableMutation::CreateRow { table, local: LocalId::generate(), cells }
    }

    pub fn create_column(table: TableId, column: NewColumn) -> Self {
        TableMutation::CreateColumn { table, local: LocalId::generate(), column }
    }

    /// Identity the command gives a row or column it creates
    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            TableMutation::CreateRow { local, .. } | TableMutation::CreateColumn { local, .. } => Some(*local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableUndo {
    Cell(Option<CellValue>),
    RowInserted,
    RowRemoved { index: usize, entry: RowEntry },
    ColumnInserted,
    ColumnName(String),
    ColumnType { previous: ColumnType, cells: Vec<(Identity<RowId>, CellValue)> },
    ColumnRemoved { column: Column, cells: Vec<(Identity<RowId>, CellValue)> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableOutcome {
    Done,
    RowCreated(Row),
    ColumnCreated(Column),
    ColumnUpdated(Column),
}

/// Coerce a value into what a column of `column_type` stores. Blank input
/// clears a number cell; anything else that isn't a number is rejected.
fn cell_for(column: &Column, value: Option<CellValue>) -> Result<Option<CellValue>> {
    let Some(value) = value else {
        return Ok(None);
    };
    if column.column_type == ColumnType::Number && value.is_blank() {
        return Ok(None);
    }
    match value.coerce(column.column_type) {
        Some(v) => Ok(Some(v)),
        None => Err(Error::validation(
            "value",
            format!("{} only holds numbers, got {:?}", column.name, value.render()),
        )),
    }
}

fn require_column<'a>(data: &'a TableData, id: &ColumnId) -> Result<&'a Column> {
    data.column(id).ok_or_else(|| Error::not_found(EntityKind::Column, id))
}

#[async_trait(?Send)]
impl Command for TableMutation {
    type State = TableData;
    type Snapshot = TableUndo;
    type Output = TableOutcome;

    fn label(&self) -> &'static str {
        match self {
            TableMutation::UpdateCell { .. } => "edit cell",
            TableMutation::CreateRow { .. } => "add row",
            TableMutation::DeleteRow { .. } => "delete row",
            TableMutation::CreateColumn { .. } => "add column",
            TableMutation::RenameColumn { .. } => "rename column",
            TableMutation::ChangeColumnType { .. } => "change column type",
            TableMutation::DeleteColumn { .. } => "delete column",
        }
    }

    fn entity(&self) -> EntityKey {
        match self {
            TableMutation::UpdateCell { row, .. } | TableMutation::DeleteRow { row } => EntityKey::new("row", row),
            TableMutation::CreateRow { local, .. } => EntityKey::new("row", local),
            TableMutation::CreateColumn { local, .. } => EntityKey::new("column", local),
            TableMutation::RenameColumn { column, .. }
            | TableMutation::ChangeColumnType { column, .. }
            | TableMutation::DeleteColumn { column } => EntityKey::new("column", column),
        }
    }

    fn supersedes(&self, older: &Self) -> bool {
        match (self, older) {
            (TableMutation::DeleteRow { .. } | TableMutation::DeleteColumn { .. }, _) => true,
            (TableMutation::UpdateCell { column, .. }, TableMutation::UpdateCell { column: earlier, .. }) => {
                column == earlier
            }
            (TableMutation::RenameColumn { .. }, TableMutation::RenameColumn { .. })
            | (TableMutation::ChangeColumnType { .. }, TableMutation::ChangeColumnType { .. }) => true,
            _ => false,
        }
    }

    fn apply(&self, data: &mut TableData) -> Result<TableUndo> {
        match self {
            TableMutation::UpdateCell { row, column, value } => {
                let value = cell_for(require_column(data, column)?, value.clone())?;
                let previous = data
                    .rows
                    .set_cell(&Identity::Resolved(row.clone()), column, value)
                    .ok_or_else(|| Error::not_found(EntityKind::Row, row))?;
                Ok(TableUndo::Cell(previous))
            }
            TableMutation::CreateRow { local, cells, .. } => {
                let mut coerced = HashMap::new();
                for (id, value) in cells {
                    if let Some(v) = cell_for(require_column(data, id)?, Some(value.clone()))? {
                        coerced.insert(id.clone(), v);
                    }
                }
                data.rows.push(RowEntry {
                    id: Identity::Pending(*local),
                    created_at: 0,
                    updated_at: 0,
                    cells: coerced,
                });
                Ok(TableUndo::RowInserted)
            }
            TableMutation::DeleteRow { row } => {
                let (index, entry) = data
                    .rows
                    .remove(&Identity::Resolved(row.clone()))
                    .ok_or_else(|| Error::not_found(EntityKind::Row, row))?;
                Ok(TableUndo::RowRemoved { index, entry })
            }
            TableMutation::CreateColumn { local, column, .. } => {
                let name = validate_name(&column.name)?;
                data.pending_columns.push(PendingColumn {
                    local: *local,
                    column: NewColumn { name, ..column.clone() },
                });
                Ok(TableUndo::ColumnInserted)
            }
            TableMutation::RenameColumn { column, name } => {
                let name = validate_name(name)?;
                let target = data
                    .column_mut(column)
                    .ok_or_else(|| Error::not_found(EntityKind::Column, column))?;
                Ok(TableUndo::ColumnName(std::mem::replace(&mut target.name, name)))
            }
            TableMutation::ChangeColumnType { column, column_type } => {
                let target = data
                    .column_mut(column)
                    .ok_or_else(|| Error::not_found(EntityKind::Column, column))?;
                let previous = std::mem::replace(&mut target.column_type, *column_type);
                let cells = data.rows.convert_column(column, *column_type);
                Ok(TableUndo::ColumnType { previous, cells })
            }
            TableMutation::DeleteColumn { column } => {
                let index = data
                    .columns
                    .iter()
                    .position(|c| &c.id == column)
                    .ok_or_else(|| Error::not_found(EntityKind::Column, column))?;
                let removed = data.columns.remove(index);
                let cells = data.rows.take_column(column);
                Ok(TableUndo::ColumnRemoved { column: removed, cells })
            }
        }
    }

    async fn dispatch(&self, service: &dyn DataService) -> Result<TableOutcome> {
        match self {
            TableMutation::UpdateCell { row, column, value } => {
                service.update_cell(row, column, value.clone()).await?;
                Ok(TableOutcome::Done)
            }
            TableMutation::CreateRow { table, cells, .. } => {
                Ok(TableOutcome::RowCreated(service.create_row(table, cells.clone()).await?))
            }
            TableMutation::DeleteRow { row } => {
                service.delete_row(row).await?;
                Ok(TableOutcome::Done)
            }
            TableMutation::CreateColumn { table, column, .. } => {
                let column = NewColumn { name: column.name.trim().to_string(), ..column.clone() };
                Ok(TableOutcome::ColumnCreated(service.create_column(table, column).await?))
            }
            TableMutation::RenameColumn { column, name } => {
                let patch = ColumnPatch { name: Some(name.trim().to_string()), ..Default::default() };
                Ok(TableOutcome::ColumnUpdated(service.update_column(column, patch).await?))
            }
            TableMutation::ChangeColumnType { column, column_type } => {
                let patch = ColumnPatch { column_type: Some(*column_type), ..Default::default() };
                Ok(TableOutcome::ColumnUpdated(service.update_column(column, patch).await?))
            }
            TableMutation::DeleteColumn { column } => {
                service.delete_column(column).await?;
                Ok(TableOutcome::Done)
            }
        }
    }

    fn commit(&self, data: &mut TableData, output: &TableOutcome) {
        match (self, output) {
            (TableMutation::CreateRow { local, .. }, TableOutcome::RowCreated(row)) => {
                data.rows.resolve(*local, row.clone());
            }
            (TableMutation::CreateColumn { local, .. }, TableOutcome::ColumnCreated(column)) => {
                data.pending_columns.retain(|p| p.local != *local);
                data.insert_column(column.clone());
            }
            // updates keep the optimistic value; a newer pending edit may already have replaced it
            _ => {}
        }
    }

    fn rollback(&self, data: &mut TableData, snapshot: TableUndo) {
        match (self, snapshot) {
            (TableMutation::UpdateCell { row, column, .. }, TableUndo::Cell(previous)) => {
                data.rows.set_cell(&Identity::Resolved(row.clone()), column, previous);
            }
            (TableMutation::CreateRow { local, .. }, TableUndo::RowInserted) => {
                data.rows.remove(&Identity::Pending(*local));
            }
            (TableMutation::DeleteRow { .. }, TableUndo::RowRemoved { index, entry }) => {
                data.rows.insert(index, entry);
            }
            (TableMutation::CreateColumn { local, .. }, TableUndo::ColumnInserted) => {
                data.pending_columns.retain(|p| p.local != *local);
            }
            (TableMutation::RenameColumn { column, .. }, TableUndo::ColumnName(previous)) => {
                if let Some(target) = data.column_mut(column) {
                    target.name = previous;
                }
            }
            (TableMutation::ChangeColumnType { column, .. }, TableUndo::ColumnType { previous, cells }) => {
                if let Some(target) = data.column_mut(column) {
                    target.column_type = previous;
                    data.rows.restore_column(column, cells);
                }
            }
            (TableMutation::DeleteColumn { column: id }, TableUndo::ColumnRemoved { column, cells }) => {
                data.insert_column(column);
                data.rows.restore_column(id, cells);
            }
            _ => {}
        }
    }

    /// Server-side cell conversion and view scrubbing can change which rows
    /// qualify, so the cached pages are refetched once these settle
    fn invalidates_query(&self) -> bool {
        matches!(self, TableMutation::ChangeColumnType { .. } | TableMutation::DeleteColumn { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SortDirection;

    fn column(id: &str, column_type: ColumnType, position: f64) -> Column {
        Column {
            id: ColumnId::from(id),
            table_id: TableId::from("t"),
            name: id.to_uppercase(),
            column_type,
            position,
            visible: true,
            default_sort: SortDirection::Asc,
        }
    }

    fn data() -> TableData {
        let mut data = TableData::default();
        data.set_columns(vec![column("name", ColumnType::Text, 0.0), column("age", ColumnType::Number, 1.0)]);
        data.rows.extend_page(vec![Row {
            id: RowId::from("r1"),
            table_id: TableId::from("t"),
            created_at: 1,
            updated_at: 1,
            cells: HashMap::from([(ColumnId::from("age"), CellValue::Number(3.0))]),
        }]);
        data
    }

    fn age(data: &TableData) -> Option<CellValue> {
        data.rows.find(&RowId::from("r1")).and_then(|r| r.cell(&ColumnId::from("age")).cloned())
    }

    #[test]
    fn cell_edit_applies_and_rolls_back() {
        let mut data = data();
        let edit = TableMutation::update_cell(RowId::from("r1"), ColumnId::from("age"), Some(CellValue::Text("4".into())));
        let undo = edit.apply(&mut data).unwrap();
        assert_eq!(age(&data), Some(CellValue::Number(4.0)));
        edit.rollback(&mut data, undo);
        assert_eq!(age(&data), Some(CellValue::Number(3.0)));
    }

    #[test]
    fn text_in_number_column_is_rejected_locally() {
        let mut data = data();
        let edit = TableMutation::update_cell(RowId::from("r1"), ColumnId::from("age"), Some(CellValue::Text("old".into())));
        assert!(matches!(edit.apply(&mut data), Err(Error::Validation { field: "value", .. })));
        assert_eq!(age(&data), Some(CellValue::Number(3.0)));
    }

    #[test]
    fn blank_clears_number_cell() {
        let mut data = data();
        let edit = TableMutation::update_cell(RowId::from("r1"), ColumnId::from("age"), Some(CellValue::Text("  ".into())));
        edit.apply(&mut data).unwrap();
        assert_eq!(age(&data), None);
    }

    #[test]
    fn editing_unknown_row_is_not_found() {
        let mut data = data();
        let edit = TableMutation::update_cell(RowId::from("nope"), ColumnId::from("age"), None);
        assert!(edit.apply(&mut data).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_column_restores_cells_and_order() {
        let mut data = data();
        let delete = TableMutation::DeleteColumn { column: ColumnId::from("name") };
        let undo = delete.apply(&mut data).unwrap();
        assert_eq!(data.columns.len(), 1);
        delete.rollback(&mut data, undo);
        let ids: Vec<&str> = data.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["name", "age"]);
        assert_eq!(age(&data), Some(CellValue::Number(3.0)));
        assert!(delete.invalidates_query());
    }

    #[test]
    fn type_change_converts_then_restores() {
        let mut data = data();
        let change = TableMutation::ChangeColumnType { column: ColumnId::from("age"), column_type: ColumnType::Text };
        let undo = change.apply(&mut data).unwrap();
        assert_eq!(age(&data), Some(CellValue::Text("3".into())));
        change.rollback(&mut data, undo);
        assert_eq!(age(&data), Some(CellValue::Number(3.0)));
        assert_eq!(data.column(&ColumnId::from("age")).unwrap().column_type, ColumnType::Number);
    }

    #[test]
    fn blank_column_name_is_rejected() {
        let mut data = data();
        let rename = TableMutation::RenameColumn { column: ColumnId::from("age"), name: " ".into() };
        assert!(matches!(rename.apply(&mut data), Err(Error::Validation { field: "name", .. })));
    }
}
