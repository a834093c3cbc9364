use crate::error::Result;
use crate::model::{Column, ColumnId, RowEntry, RowId};
use crate::table::{TableData, TableDataPager};
use crate::view::layout::visible_columns;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub row_id: RowId,
    pub column_id: ColumnId,
}

/// Search state over the loaded rows
#[derive(Debug, Clone, Default)]
pub struct SearchNavigator {
    query: String,
    matches: Vec<SearchMatch>,
    index: Option<usize>,
}

impl SearchNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Matches are stale until the next `recompute`
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
        self.matches.clear();
        self.index = None;
    }

    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn current(&self) -> Option<&SearchMatch> {
        self.index.and_then(|i| self.matches.get(i))
    }

    /// Columns with at least one match, in match order
    pub fn matched_columns(&self) -> impl Iterator<Item = &ColumnId> {
        self.matches.iter().map(|m| &m.column_id)
    }

    /// Cells whose rendered text contains the query, ignoring case, in row
    /// order then column order. The current match is kept if it still matches.
    pub fn recompute(&mut self, rows: &[RowEntry], columns: &[&Column]) {
        let current = self.current().cloned();
        self.matches.clear();

        let needle = self.query.trim().to_lowercase();
        if !needle.is_empty() {
            for row in rows {
                // placeholders can't be navigated to
                let Some(row_id) = row.id.resolved() else {
                    continue;
                };
                for column in columns {
                    if let Some(cell) = row.cell(&column.id) {
                        if cell.render().to_lowercase().contains(&needle) {
                            self.matches.push(SearchMatch { row_id: row_id.clone(), column_id: column.id.clone() });
                        }
                    }
                }
            }
        }

        self.index = current.and_then(|m| self.matches.iter().position(|x| *x == m));
    }

    pub fn recompute_from(&mut self, data: &TableData, hidden: &[ColumnId]) {
        let visible = visible_columns(&data.columns, hidden);
        self.recompute(data.rows.rows(), &visible);
    }

    pub fn next(&mut self) -> Option<&SearchMatch> {
        if self.matches.is_empty() {
            return None;
        }
        let index = match self.index {
            Some(i) => (i + 1) % self.matches.len(),
            None => 0,
        };
        self.index = Some(index);
        self.matches.get(index)
    }

    pub fn previous(&mut self) -> Option<&SearchMatch> {
        if self.matches.is_empty() {
            return None;
        }
        let index = match self.index {
            Some(0) | None => self.matches.len() - 1,
            Some(i) => i - 1,
        };
        self.index = Some(index);
        self.matches.get(index)
    }

    /// Whether `next` would wrap around, so unloaded pages may hold the next match
    pub fn at_last_match(&self) -> bool {
        if self.query.trim().is_empty() {
            return false;
        }
        match self.index {
            Some(i) => i + 1 >= self.matches.len(),
            None => self.matches.is_empty(),
        }
    }

    /// Moves to the first match after `last`, once loading more rows found one
    pub fn advance_past(&mut self, last: Option<&SearchMatch>) -> Option<&SearchMatch> {
        let start = match last {
            Some(last) => self.matches.iter().position(|m| m == last)? + 1,
            None => 0,
        };
        if start >= self.matches.len() {
            return None;
        }
        self.index = Some(start);
        self.matches.get(start)
    }

    /// Like `next`, but past the last match pages are loaded until a new
    /// match shows up; only an exhausted table wraps around
    pub async fn next_loading(&mut self, pager: &TableDataPager, hidden: &[ColumnId]) -> Result<Option<SearchMatch>> {
        if self.at_last_match() {
            let last = self.matches.last().cloned();
            while pager.has_next_page() {
                if !pager.fetch_next_page().await? {
                    break;
                }
                self.recompute_from(&pager.table_data().borrow(), hidden);
                if let Some(found) = self.advance_past(last.as_ref()) {
                    return Ok(Some(found.clone()));
                }
            }
        }
        Ok(self.next().cloned())
    }

    pub fn status(&self) -> Option<String> {
        if self.query.trim().is_empty() {
            return None;
        }
        if self.matches.is_empty() {
            return Some(format!("Pattern not found: {}", self.query));
        }
        Some(match self.index {
            Some(i) => format!("[{}/{}] matches", i + 1, self.matches.len()),
            None => format!("{} match(es) found", self.matches.len()),
        })
    }
}
