//! Entities shared between the data service, the row cache and the views

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::predicate::FilterPreference;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(BaseId);
string_id!(TableId);
string_id!(ColumnId);
string_id!(RowId);
string_id!(ViewId);
string_id!(
    /// Identity of a filter entry inside a view document
    FilterId
);

/// Client-generated placeholder for an entity the server has not acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(u64);

impl LocalId {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{:016x}", self.0)
    }
}

/// Identity carried through the cache: pending entities are present but not addressable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity<T> {
    Pending(LocalId),
    Resolved(T),
}

impl<T> Identity<T> {
    pub fn pending() -> Self {
        Identity::Pending(LocalId::generate())
    }

    pub fn resolved(&self) -> Option<&T> {
        match self {
            Identity::Resolved(id) => Some(id),
            Identity::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Identity::Pending(_))
    }

    pub fn is_local(&self, local: LocalId) -> bool {
        matches!(self, Identity::Pending(l) if *l == local)
    }
}

impl<T: PartialEq> Identity<T> {
    pub fn is(&self, id: &T) -> bool {
        matches!(self, Identity::Resolved(r) if r == id)
    }
}

impl<T: fmt::Display> fmt::Display for Identity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Pending(local) => write!(f, "{}", local),
            Identity::Resolved(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A stored cell value; a missing cell means empty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Text as shown in the grid
    pub fn render(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => render_number(*n),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(n) => n.is_nan(),
        }
    }

    /// Coerce into the representation a column of `column_type` stores, if possible
    pub fn coerce(&self, column_type: ColumnType) -> Option<CellValue> {
        match (self, column_type) {
            (CellValue::Text(_), ColumnType::Text) => Some(self.clone()),
            (CellValue::Number(n), ColumnType::Text) => Some(CellValue::Text(render_number(*n))),
            (CellValue::Number(n), ColumnType::Number) => Some(CellValue::Number(*n)),
            (CellValue::Text(s), ColumnType::Number) => s.trim().parse().ok().map(CellValue::Number),
        }
    }
}

fn render_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Base {
    pub id: BaseId,
    pub name: String,
    pub color: String,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaseSummary {
    pub name: String,
    pub color: String,
}

/// A base as listed on the home screen
#[derive(Debug, Clone, PartialEq)]
pub struct BaseEntry {
    pub id: Identity<BaseId>,
    pub name: String,
    pub color: String,
}

impl From<Base> for BaseEntry {
    fn from(base: Base) -> Self {
        Self {
            id: Identity::Resolved(base.id),
            name: base.name,
            color: base.color,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub id: TableId,
    pub base_id: BaseId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub id: ColumnId,
    pub table_id: TableId,
    pub name: String,
    pub column_type: ColumnType,
    /// Ordering key; fractional so a column can be placed between two others
    pub position: f64,
    pub visible: bool,
    pub default_sort: SortDirection,
}

/// Fields for a column the client asks the service to create
#[derive(Debug, Clone, PartialEq)]
pub struct NewColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub position: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnPatch {
    pub name: Option<String>,
    pub column_type: Option<ColumnType>,
    pub position: Option<f64>,
    pub visible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub table_id: TableId,
    pub created_at: u64,
    pub updated_at: u64,
    pub cells: HashMap<ColumnId, CellValue>,
}

/// A row as held by the cache
#[derive(Debug, Clone, PartialEq)]
pub struct RowEntry {
    pub id: Identity<RowId>,
    pub created_at: u64,
    pub updated_at: u64,
    pub cells: HashMap<ColumnId, CellValue>,
}

impl RowEntry {
    pub fn cell(&self, column: &ColumnId) -> Option<&CellValue> {
        self.cells.get(column)
    }
}

impl From<Row> for RowEntry {
    fn from(row: Row) -> Self {
        Self {
            id: Identity::Resolved(row.id),
            created_at: row.created_at,
            updated_at: row.updated_at,
            cells: row.cells,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    pub column_id: ColumnId,
    pub direction: SortDirection,
}

impl SortConfig {
    pub fn new(column_id: impl Into<ColumnId>, direction: SortDirection) -> Self {
        Self { column_id: column_id.into(), direction }
    }
}

/// The persisted projection document of a view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewConfig {
    pub filters: Vec<FilterPreference>,
    pub sorts: Vec<SortConfig>,
    pub hidden_columns: Vec<ColumnId>,
}

impl ViewConfig {
    pub fn to_document(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_document(doc: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(doc)?)
    }

    /// Remove every reference to a deleted column
    pub fn scrub_column(&mut self, column: &ColumnId) {
        self.filters.retain(|f| &f.column_id != column);
        self.sorts.retain(|s| &s.column_id != column);
        self.hidden_columns.retain(|c| c != column);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub id: ViewId,
    pub table_id: TableId,
    pub name: String,
    pub config: ViewConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewPatch {
    pub name: Option<String>,
    pub config: Option<ViewConfig>,
}

/// A view as listed in the view sidebar
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEntry {
    pub id: Identity<ViewId>,
    pub table_id: TableId,
    pub name: String,
}

impl From<View> for ViewEntry {
    fn from(view: View) -> Self {
        Self {
            id: Identity::Resolved(view.id),
            table_id: view.table_id,
            name: view.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{FilterOperator, LogicalOperator};

    #[test]
    fn render_number_drops_integral_fraction() {
        assert_eq!(CellValue::Number(42.0).render(), "42");
        assert_eq!(CellValue::Number(-3.5).render(), "-3.5");
        assert_eq!(CellValue::Text("x".to_string()).render(), "x");
    }

    #[test]
    fn coerce_text_to_number_keeps_only_parseable() {
        let v = CellValue::Text(" 12.5 ".to_string());
        assert_eq!(v.coerce(ColumnType::Number), Some(CellValue::Number(12.5)));
        let v = CellValue::Text("twelve".to_string());
        assert_eq!(v.coerce(ColumnType::Number), None);
        let v = CellValue::Number(7.0);
        assert_eq!(v.coerce(ColumnType::Text), Some(CellValue::Text("7".to_string())));
    }

    #[test]
    fn pending_identity_is_not_addressable() {
        let id: Identity<ViewId> = Identity::pending();
        assert!(id.is_pending());
        assert_eq!(id.resolved(), None);

        let id = Identity::Resolved(ViewId::from("v1"));
        assert!(id.is(&ViewId::from("v1")));
        assert_eq!(id.to_string(), "v1");
    }

    #[test]
    fn view_document_uses_camel_case() {
        let config = ViewConfig {
            filters: vec![FilterPreference {
                id: FilterId::from("f1"),
                column_id: ColumnId::from("age"),
                operator: FilterOperator::GreaterThan,
                value: "30".to_string(),
                order: 0,
                logical_operator: None,
            }],
            sorts: vec![SortConfig::new("age", SortDirection::Desc)],
            hidden_columns: vec![ColumnId::from("notes")],
        };

        let doc = config.to_document().unwrap();
        assert!(doc.contains("\"hiddenColumns\":[\"notes\"]"));
        assert!(doc.contains("\"columnId\":\"age\""));
        assert!(doc.contains("\"operator\":\"greater_than\""));
        assert!(doc.contains("\"direction\":\"desc\""));

        let back = ViewConfig::from_document(&doc).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn view_document_tolerates_missing_fields() {
        let config = ViewConfig::from_document("{\"sorts\":[]}").unwrap();
        assert!(config.filters.is_empty());
        assert!(config.hidden_columns.is_empty());

        let doc = "{\"filters\":[{\"id\":\"f\",\"columnId\":\"a\",\"operator\":\"contains\",\"value\":\"x\",\"order\":1,\"logicalOperator\":\"or\"}]}";
        let config = ViewConfig::from_document(doc).unwrap();
        assert_eq!(config.filters[0].logical_operator, Some(LogicalOperator::Or));
    }

    #[test]
    fn scrub_column_removes_all_references() {
        let mut config = ViewConfig {
            filters: Vec::new(),
            sorts: vec![SortConfig::new("a", SortDirection::Asc), SortConfig::new("b", SortDirection::Asc)],
            hidden_columns: vec![ColumnId::from("a")],
        };
        config.scrub_column(&ColumnId::from("a"));
        assert_eq!(config.sorts, vec![SortConfig::new("b", SortDirection::Asc)]);
        assert!(config.hidden_columns.is_empty());
    }
}
