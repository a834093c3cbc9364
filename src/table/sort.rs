//! Row ordering shared by the data service and the pager's keyset cursors

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{CellValue, Column, ColumnId, ColumnType, RowId, SortConfig, SortDirection};

/// One component of a row's sort key
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// Empty cell or unparseable number; sorts after every value ascending
    Missing,
    Numeric(f64),
    Text(String),
    Timestamp(u64),
}

impl SortKey {
    fn from_cell(cell: Option<&CellValue>, column_type: ColumnType) -> Self {
        let Some(cell) = cell else {
            return SortKey::Missing;
        };
        if cell.is_blank() {
            return SortKey::Missing;
        }
        match column_type {
            ColumnType::Number => match cell.as_number() {
                Some(n) if !n.is_nan() => SortKey::Numeric(n),
                _ => SortKey::Missing,
            },
            ColumnType::Text => SortKey::Text(cell.render().trim().to_lowercase()),
        }
    }
}

impl Eq for SortKey {}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Missing, SortKey::Missing) => Ordering::Equal,
            (SortKey::Missing, _) => Ordering::Greater,
            (_, SortKey::Missing) => Ordering::Less,
            (SortKey::Numeric(a), SortKey::Numeric(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Timestamp(a), SortKey::Timestamp(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A row's position in a keyset ordering: the sort key tuple plus the row id
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey {
    pub keys: Vec<SortKey>,
    pub row_id: RowId,
}

#[derive(Debug, Clone, PartialEq)]
enum KeyPart {
    Column(ColumnId, ColumnType),
    CreatedAt,
}

/// Multi-column ordering; ties are always broken by row id ascending
#[derive(Debug, Clone, PartialEq)]
pub struct KeyOrder {
    parts: Vec<(KeyPart, SortDirection)>,
}

impl KeyOrder {
    /// Sorts on unknown columns are skipped; with no usable sort the rows
    /// are ordered by creation time
    pub fn new(sorts: &[SortConfig], columns: &[Column]) -> Self {
        let mut parts: Vec<(KeyPart, SortDirection)> = sorts
            .iter()
            .filter_map(|s| {
                let column = columns.iter().find(|c| c.id == s.column_id)?;
                Some((KeyPart::Column(column.id.clone(), column.column_type), s.direction))
            })
            .collect();

        if parts.is_empty() {
            parts.push((KeyPart::CreatedAt, SortDirection::Asc));
        }
        Self { parts }
    }

    pub fn key(&self, row_id: &RowId, created_at: u64, cells: &HashMap<ColumnId, CellValue>) -> RowKey {
        let keys = self
            .parts
            .iter()
            .map(|(part, _)| match part {
                KeyPart::Column(id, column_type) => SortKey::from_cell(cells.get(id), *column_type),
                KeyPart::CreatedAt => SortKey::Timestamp(created_at),
            })
            .collect();

        RowKey { keys, row_id: row_id.clone() }
    }

    pub fn compare(&self, a: &RowKey, b: &RowKey) -> Ordering {
        for ((_, direction), (ka, kb)) in self.parts.iter().zip(a.keys.iter().zip(b.keys.iter())) {
            let base = ka.cmp(kb);
            let ord = match direction {
                SortDirection::Asc => base,
                SortDirection::Desc => base.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.row_id.cmp(&b.row_id)
    }

    /// Whether `key` comes strictly after the cursor
    pub fn is_after(&self, key: &RowKey, cursor: &RowKey) -> bool {
        self.compare(key, cursor) == Ordering::Greater
    }
}
