use std::cmp;
use std::collections::HashMap;

use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::model::{Column, ColumnId, RowEntry};
use crate::util::display_width;

/// Threshold for using parallel processing (rows * cols)
const PARALLEL_THRESHOLD: usize = 10_000;

/// Hide a visible column or show a hidden one; applying it twice is a no-op
pub fn toggle_hidden(hidden: &[ColumnId], id: &ColumnId) -> Vec<ColumnId> {
    if hidden.contains(id) {
        hidden.iter().filter(|c| *c != id).cloned().collect()
    } else {
        let mut next = hidden.to_vec();
        next.push(id.clone());
        next
    }
}

/// Columns not in `hidden`, in position order with ties broken by id
pub fn visible_columns<'a>(all: &'a [Column], hidden: &[ColumnId]) -> Vec<&'a Column> {
    let mut visible: Vec<&Column> = all.iter().filter(|c| !hidden.contains(&c.id)).collect();
    visible.sort_by(|a, b| a.position.total_cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
    visible
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSlot {
    pub column_id: ColumnId,
    /// Distance from the left edge of the first visible column
    pub offset: u32,
    pub width: u32,
}

/// Horizontal placement of the visible columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnLayout {
    slots: Vec<ColumnSlot>,
}

impl ColumnLayout {
    /// Columns without an entry in `widths` get `default_width`
    pub fn compute(visible: &[&Column], widths: &HashMap<ColumnId, u32>, default_width: u32) -> Self {
        let mut offset = 0;
        let slots = visible
            .iter()
            .map(|c| {
                let width = widths.get(&c.id).copied().unwrap_or(default_width);
                let slot = ColumnSlot { column_id: c.id.clone(), offset, width };
                offset += width;
                slot
            })
            .collect();
        Self { slots }
    }

    pub fn slots(&self) -> &[ColumnSlot] {
        &self.slots
    }

    pub fn total_width(&self) -> u32 {
        self.slots.last().map(|s| s.offset + s.width).unwrap_or(0)
    }

    pub fn slot(&self, id: &ColumnId) -> Option<&ColumnSlot> {
        self.slots.iter().find(|s| &s.column_id == id)
    }

    /// Column under horizontal position `x`
    pub fn column_at(&self, x: u32) -> Option<&ColumnSlot> {
        self.slots.iter().find(|s| x >= s.offset && x < s.offset + s.width)
    }

    /// Slots overlapping the viewport `[from, from + width)`
    pub fn in_viewport(&self, from: u32, width: u32) -> impl Iterator<Item = &ColumnSlot> {
        let to = from.saturating_add(width);
        self.slots.iter().filter(move |s| s.offset < to && s.offset + s.width > from)
    }
}

/// Width estimates from header and cell text: display width times
/// `char_width` plus one character of padding on each side, clamped
pub fn fit_widths(columns: &[&Column], rows: &[RowEntry], config: &EngineConfig) -> HashMap<ColumnId, u32> {
    let header: Vec<usize> = columns.iter().map(|c| display_width(&c.name)).collect();
    let widest = |mut acc: Vec<usize>, row: &RowEntry| {
        for (acc_w, column) in acc.iter_mut().zip(columns.iter()) {
            if let Some(cell) = row.cell(&column.id) {
                *acc_w = cmp::max(*acc_w, display_width(&cell.render()));
            }
        }
        acc
    };

    let chars = if rows.len() * columns.len() >= PARALLEL_THRESHOLD && columns.len() > 1 {
        rows.par_iter()
            .fold(|| header.clone(), widest)
            .reduce(
                || header.clone(),
                |a, b| a.iter().zip(b.iter()).map(|(x, y)| cmp::max(*x, *y)).collect(),
            )
    } else {
        rows.iter().fold(header.clone(), widest)
    };

    columns
        .iter()
        .zip(chars)
        .map(|(c, n)| {
            let px = (n as u32 + 2).saturating_mul(config.char_width);
            (c.id.clone(), px.clamp(config.min_column_width, config.max_column_width))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellValue, ColumnType, Identity, RowId, SortDirection, TableId};

    fn column(id: &str, position: f64) -> Column {
        Column {
            id: ColumnId::from(id),
            table_id: TableId::from("t"),
            name: id.to_string(),
            column_type: ColumnType::Text,
            position,
            visible: true,
            default_sort: SortDirection::Asc,
        }
    }

    #[test]
    fn toggle_is_an_involution() {
        let hidden = vec![ColumnId::from("a"), ColumnId::from("c")];
        for id in ["a", "b", "c"] {
            let id = ColumnId::from(id);
            let once = toggle_hidden(&hidden, &id);
            assert_ne!(once.contains(&id), hidden.contains(&id));
            let mut twice = toggle_hidden(&once, &id);
            let mut original = hidden.clone();
            twice.sort();
            original.sort();
            assert_eq!(twice, original);
        }
    }

    #[test]
    fn visible_columns_keep_position_order() {
        let all = vec![column("z", 1.0), column("b", 0.5), column("a", 1.0), column("h", 0.0)];
        let visible = visible_columns(&all, &[ColumnId::from("h")]);
        let ids: Vec<&str> = visible.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "z"]);
    }

    #[test]
    fn layout_offsets_accumulate() {
        let all = vec![column("a", 0.0), column("b", 1.0), column("c", 2.0)];
        let visible = visible_columns(&all, &[]);
        let widths = HashMap::from([(ColumnId::from("b"), 50)]);
        let layout = ColumnLayout::compute(&visible, &widths, 100);

        let offsets: Vec<u32> = layout.slots().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 100, 150]);
        assert_eq!(layout.total_width(), 250);
        assert_eq!(layout.column_at(120).unwrap().column_id, ColumnId::from("b"));
        assert!(layout.column_at(250).is_none());
        assert_eq!(layout.in_viewport(90, 70).count(), 3);
    }

    #[test]
    fn fitted_widths_are_clamped() {
        let all = vec![column("a", 0.0), column("b", 1.0)];
        let visible = visible_columns(&all, &[]);
        let row = RowEntry {
            id: Identity::Resolved(RowId::from("r")),
            created_at: 0,
            updated_at: 0,
            cells: HashMap::from([(ColumnId::from("b"), CellValue::Text("x".repeat(200)))]),
        };
        let config = EngineConfig::default();
        let widths = fit_widths(&visible, &[row], &config);
        assert_eq!(widths[&ColumnId::from("a")], config.min_column_width);
        assert_eq!(widths[&ColumnId::from("b")], config.max_column_width);
    }
}
