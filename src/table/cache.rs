use std::collections::HashMap;

use crate::model::{CellValue, Column, ColumnId, ColumnType, Identity, LocalId, NewColumn, Row, RowEntry, RowId};

/// Rows keyed by identity, in fetch order, without duplicates
#[derive(Debug, Clone, Default)]
pub struct RowCache {
    rows: Vec<RowEntry>,
    index: HashMap<Identity<RowId>, usize>,
}

impl RowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[RowEntry] {
        &self.rows
    }

    pub fn get(&self, idx: usize) -> Option<&RowEntry> {
        self.rows.get(idx)
    }

    pub fn position(&self, id: &Identity<RowId>) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn find(&self, id: &RowId) -> Option<&RowEntry> {
        self.position(&Identity::Resolved(id.clone())).and_then(|i| self.rows.get(i))
    }

    pub fn last_resolved(&self) -> Option<(&RowId, &RowEntry)> {
        self.rows.iter().rev().find_map(|r| r.id.resolved().map(|id| (id, r)))
    }

    /// Append a fetched page, skipping rows already cached; returns how many were added
    pub fn extend_page(&mut self, rows: Vec<Row>) -> usize {
        let mut added = 0;
        for row in rows {
            let key = Identity::Resolved(row.id.clone());
            if self.index.contains_key(&key) {
                continue;
            }
            self.index.insert(key, self.rows.len());
            self.rows.push(row.into());
            added += 1;
        }
        added
    }

    pub fn push(&mut self, entry: RowEntry) {
        self.insert(self.rows.len(), entry);
    }

    /// Insert at `idx` (clamped); an entry with the same identity is replaced
    pub fn insert(&mut self, idx: usize, entry: RowEntry) {
        if let Some(existing) = self.position(&entry.id) {
            self.rows[existing] = entry;
            return;
        }
        let idx = idx.min(self.rows.len());
        self.rows.insert(idx, entry);
        self.reindex_from(idx);
    }

    pub fn remove(&mut self, id: &Identity<RowId>) -> Option<(usize, RowEntry)> {
        let idx = self.index.remove(id)?;
        let entry = self.rows.remove(idx);
        self.reindex_from(idx);
        Some((idx, entry))
    }

    /// Replace a pending row with the row the server created
    pub fn resolve(&mut self, local: LocalId, row: Row) -> bool {
        let Some(idx) = self.index.remove(&Identity::Pending(local)) else {
            return false;
        };
        let key = Identity::Resolved(row.id.clone());
        if let Some(dup) = self.index.get(&key).copied() {
            // the row already arrived through a page fetch
            self.rows.remove(idx);
            self.reindex_from(idx.min(dup));
            return true;
        }
        self.rows[idx] = row.into();
        self.index.insert(key, idx);
        true
    }

    /// Set or clear a cell, returning the previous value; `None` if the row is not cached
    pub fn set_cell(&mut self, id: &Identity<RowId>, column: &ColumnId, value: Option<CellValue>) -> Option<Option<CellValue>> {
        let idx = self.position(id)?;
        let cells = &mut self.rows[idx].cells;
        Some(match value {
            Some(v) => cells.insert(column.clone(), v),
            None => cells.remove(column),
        })
    }

    /// Remove a column's cells from every row, returning what was removed
    pub fn take_column(&mut self, column: &ColumnId) -> Vec<(Identity<RowId>, CellValue)> {
        self.rows
            .iter_mut()
            .filter_map(|r| r.cells.remove(column).map(|v| (r.id.clone(), v)))
            .collect()
    }

    /// Convert a column's cells to a new type, returning the original values.
    /// Values that cannot be converted are cleared.
    pub fn convert_column(&mut self, column: &ColumnId, column_type: ColumnType) -> Vec<(Identity<RowId>, CellValue)> {
        let originals = self.take_column(column);
        for (id, value) in &originals {
            if let (Some(idx), Some(converted)) = (self.position(id), value.coerce(column_type)) {
                self.rows[idx].cells.insert(column.clone(), converted);
            }
        }
        originals
    }

    pub fn restore_column(&mut self, column: &ColumnId, values: Vec<(Identity<RowId>, CellValue)>) {
        self.take_column(column);
        for (id, value) in values {
            if let Some(idx) = self.position(&id) {
                self.rows[idx].cells.insert(column.clone(), value);
            }
        }
    }

    fn reindex_from(&mut self, start: usize) {
        self.index.retain(|_, i| *i < start);
        for (i, row) in self.rows.iter().enumerate().skip(start) {
            self.index.insert(row.id.clone(), i);
        }
    }
}

/// A column the server has not acknowledged yet
#[derive(Debug, Clone, PartialEq)]
pub struct PendingColumn {
    pub local: LocalId,
    pub column: NewColumn,
}

/// Columns and cached rows of one table session
#[derive(Debug, Clone, Default)]
pub struct TableData {
    pub columns: Vec<Column>,
    pub pending_columns: Vec<PendingColumn>,
    pub rows: RowCache,
}

impl TableData {
    pub fn column(&self, id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.id == id)
    }

    pub fn column_mut(&mut self, id: &ColumnId) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| &c.id == id)
    }

    /// Columns in position order
    pub fn set_columns(&mut self, mut columns: Vec<Column>) {
        columns.sort_by(|a, b| a.position.total_cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        self.columns = columns;
    }

    pub fn insert_column(&mut self, column: Column) {
        self.columns.retain(|c| c.id != column.id);
        self.columns.push(column);
        let columns = std::mem::take(&mut self.columns);
        self.set_columns(columns);
    }

    /// Position after the last known column
    pub fn next_position(&self) -> f64 {
        let last = self
            .columns
            .iter()
            .map(|c| c.position)
            .chain(self.pending_columns.iter().map(|p| p.column.position))
            .fold(f64::NEG_INFINITY, f64::max);
        if last.is_finite() {
            last.floor() + 1.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TableId;

    fn row(id: &str) -> Row {
        Row {
            id: RowId::from(id),
            table_id: TableId::from("t"),
            created_at: 0,
            updated_at: 0,
            cells: HashMap::new(),
        }
    }

    fn ids(cache: &RowCache) -> Vec<String> {
        cache.rows().iter().map(|r| r.id.to_string()).collect()
    }

    #[test]
    fn extend_page_deduplicates() {
        let mut cache = RowCache::new();
        assert_eq!(cache.extend_page(vec![row("a"), row("b")]), 2);
        assert_eq!(cache.extend_page(vec![row("b"), row("c")]), 1);
        assert_eq!(ids(&cache), vec!["a", "b", "c"]);
        assert_eq!(cache.position(&Identity::Resolved(RowId::from("c"))), Some(2));
    }

    #[test]
    fn remove_and_reinsert_keeps_index_consistent() {
        let mut cache = RowCache::new();
        cache.extend_page(vec![row("a"), row("b"), row("c")]);

        let (idx, entry) = cache.remove(&Identity::Resolved(RowId::from("a"))).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(cache.position(&Identity::Resolved(RowId::from("c"))), Some(1));

        cache.insert(idx, entry);
        assert_eq!(ids(&cache), vec!["a", "b", "c"]);
        assert_eq!(cache.position(&Identity::Resolved(RowId::from("c"))), Some(2));
    }

    #[test]
    fn resolve_swaps_pending_identity() {
        let mut cache = RowCache::new();
        cache.extend_page(vec![row("a")]);
        let local = LocalId::generate();
        cache.push(RowEntry {
            id: Identity::Pending(local),
            created_at: 0,
            updated_at: 0,
            cells: HashMap::new(),
        });

        assert!(cache.resolve(local, row("z")));
        assert_eq!(ids(&cache), vec!["a", "z"]);
        assert!(cache.find(&RowId::from("z")).is_some());
        assert!(!cache.resolve(local, row("y")));
    }

    #[test]
    fn resolve_drops_pending_when_row_already_fetched() {
        let mut cache = RowCache::new();
        let local = LocalId::generate();
        cache.push(RowEntry {
            id: Identity::Pending(local),
            created_at: 0,
            updated_at: 0,
            cells: HashMap::new(),
        });
        cache.extend_page(vec![row("z")]);

        assert!(cache.resolve(local, row("z")));
        assert_eq!(ids(&cache), vec!["z"]);
        assert_eq!(cache.position(&Identity::Resolved(RowId::from("z"))), Some(0));
    }

    #[test]
    fn convert_and_restore_column() {
        let mut cache = RowCache::new();
        let mut a = row("a");
        a.cells.insert(ColumnId::from("c"), CellValue::Text("5".into()));
        let mut b = row("b");
        b.cells.insert(ColumnId::from("c"), CellValue::Text("five".into()));
        cache.extend_page(vec![a, b]);

        let originals = cache.convert_column(&ColumnId::from("c"), ColumnType::Number);
        assert_eq!(cache.rows()[0].cell(&ColumnId::from("c")), Some(&CellValue::Number(5.0)));
        assert_eq!(cache.rows()[1].cell(&ColumnId::from("c")), None);

        cache.restore_column(&ColumnId::from("c"), originals);
        assert_eq!(cache.rows()[1].cell(&ColumnId::from("c")), Some(&CellValue::Text("five".into())));
    }

    #[test]
    fn next_position_follows_last_column() {
        let mut data = TableData::default();
        assert_eq!(data.next_position(), 0.0);
        data.pending_columns.push(PendingColumn {
            local: LocalId::generate(),
            column: NewColumn { name: "x".into(), column_type: ColumnType::Text, position: 2.5 },
        });
        assert_eq!(data.next_position(), 3.0);
    }
}
