use serde::{Deserialize, Serialize};

use crate::config::HighlightConfig;
use crate::model::{ColumnId, SortConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightKind {
    Sort,
    Search,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnHighlight {
    pub column_id: ColumnId,
    #[serde(rename = "type")]
    pub kind: HighlightKind,
    pub color: String,
    /// Position in the sort list; absent for search highlights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<usize>,
}

/// One highlight per sorted column, colored by sort priority
pub fn sort_highlights(sorts: &[SortConfig], colors: &HighlightConfig) -> Vec<ColumnHighlight> {
    sorts
        .iter()
        .enumerate()
        .map(|(i, s)| ColumnHighlight {
            column_id: s.column_id.clone(),
            kind: HighlightKind::Sort,
            color: colors.sort_color(i),
            priority: Some(i),
        })
        .collect()
}

/// One highlight per column holding at least one search match, first match first
pub fn search_highlights<'a>(
    columns: impl IntoIterator<Item = &'a ColumnId>,
    colors: &HighlightConfig,
) -> Vec<ColumnHighlight> {
    let mut out: Vec<ColumnHighlight> = Vec::new();
    for id in columns {
        if out.iter().any(|h| &h.column_id == id) {
            continue;
        }
        out.push(ColumnHighlight {
            column_id: id.clone(),
            kind: HighlightKind::Search,
            color: colors.search_color.clone(),
            priority: None,
        });
    }
    out
}

/// Replace the highlights of `kind` with `incoming`, leaving the other kind untouched
pub fn merge_highlights(current: &[ColumnHighlight], kind: HighlightKind, incoming: Vec<ColumnHighlight>) -> Vec<ColumnHighlight> {
    current
        .iter()
        .filter(|h| h.kind != kind)
        .cloned()
        .chain(incoming.into_iter().filter(|h| h.kind == kind))
        .collect()
}

/// Highlight shown for a column; search wins over sort
pub fn highlight_for<'a>(highlights: &'a [ColumnHighlight], column: &ColumnId) -> Option<&'a ColumnHighlight> {
    let mut on_column = highlights.iter().filter(|h| &h.column_id == column);
    let first = on_column.next()?;
    Some(
        on_column
            .chain(std::iter::once(first))
            .find(|h| h.kind == HighlightKind::Search)
            .unwrap_or(first),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SortDirection;

    #[test]
    fn merge_replaces_only_same_kind() {
        let colors = HighlightConfig::default();
        let sorts = sort_highlights(
            &[SortConfig::new("a", SortDirection::Asc), SortConfig::new("b", SortDirection::Desc)],
            &colors,
        );
        let current = merge_highlights(&[], HighlightKind::Sort, sorts);
        let search = search_highlights(&[ColumnId::from("b"), ColumnId::from("c"), ColumnId::from("b")], &colors);
        assert_eq!(search.len(), 2);

        let merged = merge_highlights(&current, HighlightKind::Search, search);
        assert_eq!(merged.len(), 4);

        let cleared = merge_highlights(&merged, HighlightKind::Search, Vec::new());
        assert_eq!(cleared, current);
        assert_eq!(cleared[1].priority, Some(1));
    }

    #[test]
    fn search_highlight_wins() {
        let colors = HighlightConfig::default();
        let mut all = sort_highlights(&[SortConfig::new("b", SortDirection::Asc)], &colors);
        all.extend(search_highlights(&[ColumnId::from("b")], &colors));
        let shown = highlight_for(&all, &ColumnId::from("b")).unwrap();
        assert_eq!(shown.kind, HighlightKind::Search);
        assert!(highlight_for(&all, &ColumnId::from("z")).is_none());
    }
}
