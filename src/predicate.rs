use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{CellValue, Column, ColumnId, ColumnType, FilterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Contains,
    NotContains,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
}

const TEXT_OPERATORS: &[FilterOperator] = &[
    FilterOperator::Contains,
    FilterOperator::NotContains,
    FilterOperator::Equals,
    FilterOperator::NotEquals,
    FilterOperator::IsEmpty,
    FilterOperator::IsNotEmpty,
];

const NUMBER_OPERATORS: &[FilterOperator] = &[
    FilterOperator::Equals,
    FilterOperator::NotEquals,
    FilterOperator::GreaterThan,
    FilterOperator::LessThan,
    FilterOperator::IsEmpty,
    FilterOperator::IsNotEmpty,
];

impl FilterOperator {
    /// Operators offered for a column type, in menu order
    pub fn for_type(column_type: ColumnType) -> &'static [FilterOperator] {
        match column_type {
            ColumnType::Text => TEXT_OPERATORS,
            ColumnType::Number => NUMBER_OPERATORS,
        }
    }

    pub fn supports(&self, column_type: ColumnType) -> bool {
        Self::for_type(column_type).contains(self)
    }

    pub fn requires_value(&self) -> bool {
        !matches!(self, FilterOperator::IsEmpty | FilterOperator::IsNotEmpty)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contains" | "~" => Some(FilterOperator::Contains),
            "not_contains" | "!~" => Some(FilterOperator::NotContains),
            "equals" | "=" | "==" => Some(FilterOperator::Equals),
            "not_equals" | "!=" => Some(FilterOperator::NotEquals),
            "greater_than" | ">" => Some(FilterOperator::GreaterThan),
            "less_than" | "<" => Some(FilterOperator::LessThan),
            "is_empty" => Some(FilterOperator::IsEmpty),
            "is_not_empty" => Some(FilterOperator::IsNotEmpty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
}

/// One entry of a view's filter list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPreference {
    pub id: FilterId,
    pub column_id: ColumnId,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub order: u32,
    /// Ignored on the first filter of a list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
}

impl FilterPreference {
    pub fn new(
        column_id: impl Into<ColumnId>,
        operator: FilterOperator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: FilterId::new(crate::model::LocalId::generate().to_string()),
            column_id: column_id.into(),
            operator,
            value: value.into(),
            order: 0,
            logical_operator: None,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn joined_by(mut self, op: LogicalOperator) -> Self {
        self.logical_operator = Some(op);
        self
    }

    /// Eligible to affect the fetch: no value needed, or a non-blank value
    pub fn is_complete(&self) -> bool {
        !self.operator.requires_value() || !self.value.trim().is_empty()
    }

    pub fn evaluate(&self, cell: Option<&CellValue>, column_type: ColumnType) -> bool {
        let blank = cell.map(|c| c.is_blank()).unwrap_or(true);
        match self.operator {
            FilterOperator::IsEmpty => return blank,
            FilterOperator::IsNotEmpty => return !blank,
            _ => {}
        }

        match column_type {
            ColumnType::Number => {
                let rhs: f64 = match self.value.trim().parse() {
                    Ok(v) => v,
                    Err(_) => return false,
                };
                let lhs = cell.and_then(|c| c.as_number());
                match (self.operator, lhs) {
                    (FilterOperator::NotEquals, None) => true,
                    (_, None) => false,
                    (FilterOperator::Equals, Some(lhs)) => lhs == rhs,
                    (FilterOperator::NotEquals, Some(lhs)) => lhs != rhs,
                    (FilterOperator::GreaterThan, Some(lhs)) => lhs > rhs,
                    (FilterOperator::LessThan, Some(lhs)) => lhs < rhs,
                    _ => false,
                }
            }
            ColumnType::Text => {
                let text = cell.map(|c| c.render()).unwrap_or_default();
                match self.operator {
                    FilterOperator::Contains => {
                        text.to_lowercase().contains(&self.value.to_lowercase())
                    }
                    FilterOperator::NotContains => {
                        !text.to_lowercase().contains(&self.value.to_lowercase())
                    }
                    FilterOperator::Equals => text == self.value,
                    FilterOperator::NotEquals => text != self.value,
                    _ => false,
                }
            }
        }
    }
}

/// Filters that are eligible to affect the fetch, in list order
pub fn complete_filters(filters: &[FilterPreference]) -> Vec<FilterPreference> {
    filters.iter().filter(|f| f.is_complete()).cloned().collect()
}

/// A filter list bound to column types, evaluated as a strict left fold:
/// `acc = f0`, then `acc = acc AND/OR fi` for each following filter
#[derive(Debug, Clone)]
pub struct FilterChain {
    links: Vec<(FilterPreference, ColumnType)>,
}

impl FilterChain {
    /// Entries on unknown columns, incomplete entries, and operators the
    /// column type does not offer are dropped
    pub fn new(filters: &[FilterPreference], columns: &[Column]) -> Self {
        let types: HashMap<&ColumnId, ColumnType> =
            columns.iter().map(|c| (&c.id, c.column_type)).collect();

        let mut ordered: Vec<&FilterPreference> = filters.iter().collect();
        ordered.sort_by_key(|f| f.order);

        let links = ordered
            .into_iter()
            .filter(|f| f.is_complete())
            .filter_map(|f| {
                let column_type = *types.get(&f.column_id)?;
                f.operator.supports(column_type).then(|| (f.clone(), column_type))
            })
            .collect();

        Self { links }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn filters(&self) -> impl Iterator<Item = &FilterPreference> {
        self.links.iter().map(|(f, _)| f)
    }

    pub fn matches(&self, cells: &HashMap<ColumnId, CellValue>) -> bool {
        let mut links = self.links.iter();
        let Some((first, first_type)) = links.next() else {
            return true;
        };

        let mut acc = first.evaluate(cells.get(&first.column_id), *first_type);
        for (filter, column_type) in links {
            let hit = filter.evaluate(cells.get(&filter.column_id), *column_type);
            acc = match filter.logical_operator.unwrap_or(LogicalOperator::And) {
                LogicalOperator::And => acc && hit,
                LogicalOperator::Or => acc || hit,
            };
        }
        acc
    }
}

static FILTER_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(.+?)\s+(contains|not_contains|equals|not_equals|greater_than|less_than|is_empty|is_not_empty|==|!=|!~|=|>|<|~)\s*(.*?)\s*$",
    )
    .expect("filter expression regex")
});

/// Parse `<column> <op> [value]`, e.g. `age > 30` or `notes is_empty`
pub fn parse_filter_expr(input: &str) -> Option<(String, FilterOperator, String)> {
    let caps = FILTER_EXPR.captures(input)?;
    let column = caps.get(1)?.as_str().to_string();
    let operator = FilterOperator::parse(caps.get(2)?.as_str())?;
    let value = caps.get(3).map(|m| m.as_str()).unwrap_or("").to_string();

    if operator.requires_value() && value.is_empty() {
        return None;
    }
    Some((column, operator, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SortDirection, TableId};

    fn column(id: &str, column_type: ColumnType) -> Column {
        Column {
            id: ColumnId::from(id),
            table_id: TableId::from("t"),
            name: id.to_string(),
            column_type,
            position: 0.0,
            visible: true,
            default_sort: SortDirection::Asc,
        }
    }

    fn cells(pairs: &[(&str, CellValue)]) -> HashMap<ColumnId, CellValue> {
        pairs.iter().map(|(k, v)| (ColumnId::from(*k), v.clone())).collect()
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn complete_filters_keeps_valueless_operators() {
        let filters = vec![
            FilterPreference::new("a", FilterOperator::IsEmpty, ""),
            FilterPreference::new("a", FilterOperator::IsNotEmpty, "   "),
            FilterPreference::new("a", FilterOperator::Contains, "  "),
            FilterPreference::new("a", FilterOperator::Contains, " x "),
            FilterPreference::new("a", FilterOperator::Equals, ""),
        ];
        let kept = complete_filters(&filters);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].operator, FilterOperator::IsEmpty);
        assert_eq!(kept[1].operator, FilterOperator::IsNotEmpty);
        assert_eq!(kept[2].value, " x ");
    }

    #[test]
    fn complete_filters_property_over_operator_value_grid() {
        let values = ["", " ", "\t", "0", " a "];
        let ops = [
            FilterOperator::Contains,
            FilterOperator::NotContains,
            FilterOperator::Equals,
            FilterOperator::NotEquals,
            FilterOperator::GreaterThan,
            FilterOperator::LessThan,
            FilterOperator::IsEmpty,
            FilterOperator::IsNotEmpty,
        ];
        let filters: Vec<_> = ops
            .iter()
            .flat_map(|op| values.iter().map(move |v| FilterPreference::new("c", *op, *v)))
            .collect();

        let kept = complete_filters(&filters);
        for f in &filters {
            let expected = matches!(f.operator, FilterOperator::IsEmpty | FilterOperator::IsNotEmpty)
                || !f.value.trim().is_empty();
            assert_eq!(kept.contains(f), expected, "{:?} {:?}", f.operator, f.value);
        }
    }

    #[test]
    fn operator_sets_depend_on_type() {
        assert!(FilterOperator::Contains.supports(ColumnType::Text));
        assert!(!FilterOperator::Contains.supports(ColumnType::Number));
        assert!(FilterOperator::GreaterThan.supports(ColumnType::Number));
        assert!(!FilterOperator::GreaterThan.supports(ColumnType::Text));
        assert_eq!(FilterOperator::for_type(ColumnType::Text).len(), 6);
        assert_eq!(FilterOperator::for_type(ColumnType::Number).len(), 6);
    }

    #[test]
    fn numeric_comparisons() {
        let gt = FilterPreference::new("age", FilterOperator::GreaterThan, "30");
        assert!(gt.evaluate(Some(&CellValue::Number(31.0)), ColumnType::Number));
        assert!(!gt.evaluate(Some(&CellValue::Number(30.0)), ColumnType::Number));
        assert!(!gt.evaluate(None, ColumnType::Number));

        let ne = FilterPreference::new("age", FilterOperator::NotEquals, "30");
        assert!(ne.evaluate(None, ColumnType::Number));

        let bad = FilterPreference::new("age", FilterOperator::Equals, "thirty");
        assert!(!bad.evaluate(Some(&CellValue::Number(30.0)), ColumnType::Number));
    }

    #[test]
    fn text_contains_is_case_insensitive() {
        let f = FilterPreference::new("name", FilterOperator::Contains, "ACME");
        assert!(f.evaluate(Some(&text("the acme co")), ColumnType::Text));
        assert!(!f.evaluate(None, ColumnType::Text));

        let f = FilterPreference::new("name", FilterOperator::NotContains, "acme");
        assert!(f.evaluate(None, ColumnType::Text));
    }

    #[test]
    fn empty_checks_treat_missing_and_blank_alike() {
        let f = FilterPreference::new("name", FilterOperator::IsEmpty, "");
        assert!(f.evaluate(None, ColumnType::Text));
        assert!(f.evaluate(Some(&text("  ")), ColumnType::Text));
        assert!(!f.evaluate(Some(&text("x")), ColumnType::Text));
    }

    #[test]
    fn chain_is_a_strict_left_fold() {
        let columns = vec![column("a", ColumnType::Text), column("n", ColumnType::Number)];
        // (a contains x OR n > 5) AND a is_not_empty, evaluated left to right
        let filters = vec![
            FilterPreference::new("a", FilterOperator::Contains, "x").with_order(0),
            FilterPreference::new("n", FilterOperator::GreaterThan, "5")
                .with_order(1)
                .joined_by(LogicalOperator::Or),
            FilterPreference::new("a", FilterOperator::IsNotEmpty, "")
                .with_order(2)
                .joined_by(LogicalOperator::And),
        ];
        let chain = FilterChain::new(&filters, &columns);

        // a empty, n = 9: (false || true) && false == false
        assert!(!chain.matches(&cells(&[("n", CellValue::Number(9.0))])));
        // a = "y", n = 9: (false || true) && true == true
        assert!(chain.matches(&cells(&[("a", text("y")), ("n", CellValue::Number(9.0))])));
        // a = "x": true
        assert!(chain.matches(&cells(&[("a", text("x"))])));
    }

    #[test]
    fn chain_follows_order_field_not_list_position() {
        let columns = vec![column("a", ColumnType::Text)];
        let filters = vec![
            FilterPreference::new("a", FilterOperator::Contains, "y")
                .with_order(1)
                .joined_by(LogicalOperator::Or),
            FilterPreference::new("a", FilterOperator::Contains, "x").with_order(0),
        ];
        let chain = FilterChain::new(&filters, &columns);
        assert!(chain.matches(&cells(&[("a", text("y"))])));
        assert!(chain.matches(&cells(&[("a", text("x"))])));
        assert!(!chain.matches(&cells(&[("a", text("z"))])));
    }

    #[test]
    fn chain_drops_unknown_columns_and_unsupported_operators() {
        let columns = vec![column("n", ColumnType::Number)];
        let filters = vec![
            FilterPreference::new("gone", FilterOperator::Equals, "1"),
            FilterPreference::new("n", FilterOperator::Contains, "1"),
            FilterPreference::new("n", FilterOperator::LessThan, ""),
        ];
        let chain = FilterChain::new(&filters, &columns);
        assert!(chain.is_empty());
        assert!(chain.matches(&HashMap::new()));
    }

    #[test]
    fn parse_filter_expressions() {
        assert_eq!(
            parse_filter_expr("age > 30"),
            Some(("age".to_string(), FilterOperator::GreaterThan, "30".to_string()))
        );
        assert_eq!(
            parse_filter_expr("first name contains Bo b"),
            Some(("first name".to_string(), FilterOperator::Contains, "Bo b".to_string()))
        );
        assert_eq!(
            parse_filter_expr("notes is_empty"),
            Some(("notes".to_string(), FilterOperator::IsEmpty, String::new()))
        );
        assert_eq!(parse_filter_expr("age >"), None);
        assert_eq!(parse_filter_expr("age"), None);
    }
}
