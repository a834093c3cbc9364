//! How a table is projected: the view document, column visibility and layout, highlights

pub mod highlight;
pub mod layout;
pub mod manager;

pub use highlight::{highlight_for, merge_highlights, search_highlights, sort_highlights, ColumnHighlight, HighlightKind};
pub use layout::{fit_widths, toggle_hidden, visible_columns, ColumnLayout, ColumnSlot};
pub use manager::{ViewConfigManager, ViewConfigMutation};
