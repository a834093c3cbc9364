use std::collections::{HashMap, HashSet};

use super::*;
use crate::model::SortConfig;
use crate::predicate::{FilterOperator, FilterPreference};

fn num(n: f64) -> CellValue {
    CellValue::Number(n)
}

fn text(s: &str) -> CellValue {
    CellValue::Text(s.to_string())
}

fn request(table_id: &TableId) -> PageRequest {
    PageRequest {
        table_id: table_id.clone(),
        cursor: None,
        limit: 100,
        filters: Vec::new(),
        sorts: Vec::new(),
        search: String::new(),
    }
}

fn people() -> (MemoryService, TableId) {
    let service = MemoryService::new();
    let base = service.add_base("Acme");
    let table = service.add_table(&base, "People");
    service.add_column(&table, "name", "Name", ColumnType::Text);
    service.add_column(&table, "age", "Age", ColumnType::Number);
    (service, table)
}

fn key_for(service: &MemoryService, table: &TableId, row: &Row, sorts: &[SortConfig]) -> RowKey {
    let columns = service.store.borrow().columns_of(table);
    KeyOrder::new(sorts, &columns).key(&row.id, row.created_at, &row.cells)
}

#[tokio::test]
async fn filter_and_sort_scenario() {
    let (service, table) = people();
    let ages = [35.0, 20.0, 31.0, 40.0, 31.0, 30.0];
    let ids: Vec<RowId> = ages
        .iter()
        .map(|a| service.add_row(&table, [("age", num(*a))]))
        .collect();
    service.add_row(&table, [("name", text("no age"))]);

    let mut req = request(&table);
    req.sorts = vec![SortConfig::new("age", SortDirection::Asc)];
    req.filters = vec![FilterPreference::new("age", FilterOperator::GreaterThan, "30")];

    let page = service.get_infinite_table_data(&req).await.unwrap();
    let got: Vec<RowId> = page.rows.iter().map(|r| r.id.clone()).collect();

    // 31 (two rows, by id), 35, 40
    assert_eq!(got, vec![ids[2].clone(), ids[4].clone(), ids[0].clone(), ids[3].clone()]);
    assert!(!page.has_more);
}

#[tokio::test]
async fn keyset_paging_survives_inserts_inside_fetched_range() {
    let (service, table) = people();
    for i in 0..250 {
        service.add_row(&table, [("age", num(1000.0 + i as f64))]);
    }

    let sorts = vec![SortConfig::new("age", SortDirection::Asc)];
    let mut req = request(&table);
    req.sorts = sorts.clone();

    let mut seen: Vec<RowId> = Vec::new();
    let mut pages = 0;
    loop {
        let page = service.get_infinite_table_data(&req).await.unwrap();
        pages += 1;
        seen.extend(page.rows.iter().map(|r| r.id.clone()));

        if pages == 1 {
            // five rows land before the cursor
            for i in 0..5 {
                service.add_row(&table, [("age", num(i as f64))]);
            }
        }

        match (page.has_more, page.rows.last()) {
            (true, Some(last)) => req.cursor = Some(key_for(&service, &table, last, &sorts)),
            _ => break,
        }
    }

    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 250);
    let unique: HashSet<&RowId> = seen.iter().collect();
    assert_eq!(unique.len(), 250);
}

#[tokio::test]
async fn repeated_requests_are_idempotent() {
    let (service, table) = people();
    for i in 0..20 {
        service.add_row(&table, [("age", num((i % 4) as f64)), ("name", text("x"))]);
    }
    let mut req = request(&table);
    req.limit = 7;
    req.sorts = vec![SortConfig::new("age", SortDirection::Desc)];

    let a = service.get_infinite_table_data(&req).await.unwrap();
    let b = service.get_infinite_table_data(&req).await.unwrap();
    assert_eq!(a, b);
    assert!(a.has_more);
}

#[tokio::test]
async fn search_matches_any_rendered_cell() {
    let (service, table) = people();
    let bob = service.add_row(&table, [("name", text("Bobby")), ("age", num(12.0))]);
    let twelve = service.add_row(&table, [("name", text("Ann")), ("age", num(112.0))]);
    service.add_row(&table, [("name", text("Cy")), ("age", num(3.0))]);

    let mut req = request(&table);
    req.search = "  BOB ".to_string();
    let page = service.get_infinite_table_data(&req).await.unwrap();
    assert_eq!(page.rows.iter().map(|r| &r.id).collect::<Vec<_>>(), vec![&bob]);

    req.search = "12".to_string();
    let page = service.get_infinite_table_data(&req).await.unwrap();
    assert_eq!(page.rows.iter().map(|r| &r.id).collect::<Vec<_>>(), vec![&bob, &twelve]);
}

#[tokio::test]
async fn offline_and_scripted_failures() {
    let (service, table) = people();
    service.set_offline(true);
    let err = service.get_columns(&table).await.unwrap_err();
    assert!(err.is_retryable());

    service.set_offline(false);
    service.fail_next("get_columns", Error::Network("flaky".to_string()));
    assert!(service.get_columns(&table).await.is_err());
    assert_eq!(service.get_columns(&table).await.unwrap().len(), 2);
    assert_eq!(service.call_count("get_columns"), 3);
}

#[tokio::test]
async fn missing_entities_are_not_found() {
    let service = MemoryService::new();
    let err = service.get_view(&ViewId::from("nope")).await.unwrap_err();
    assert!(err.is_not_found());
    let err = service.get_latest_table(&BaseId::from("nope")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn number_columns_reject_text() {
    let (service, table) = people();
    let row = service.add_row(&table, []);

    let err = service
        .update_cell(&row, &ColumnId::from("age"), Some(text("old")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    service
        .update_cell(&row, &ColumnId::from("age"), Some(text(" 41 ")))
        .await
        .unwrap();
    assert_eq!(service.cell(&row, &ColumnId::from("age")), Some(num(41.0)));
}

#[tokio::test]
async fn type_change_converts_cells() {
    let (service, table) = people();
    let a = service.add_row(&table, [("name", text("7"))]);
    let b = service.add_row(&table, [("name", text("seven"))]);

    let patch = ColumnPatch { column_type: Some(ColumnType::Number), ..Default::default() };
    service.update_column(&ColumnId::from("name"), patch).await.unwrap();

    assert_eq!(service.cell(&a, &ColumnId::from("name")), Some(num(7.0)));
    assert_eq!(service.cell(&b, &ColumnId::from("name")), None);
}

#[tokio::test]
async fn deleting_column_scrubs_views_and_cells() {
    let (service, table) = people();
    let row = service.add_row(&table, [("age", num(3.0))]);
    let config = ViewConfig {
        filters: vec![FilterPreference::new("age", FilterOperator::Equals, "3")],
        sorts: vec![SortConfig::new("age", SortDirection::Asc)],
        hidden_columns: vec![ColumnId::from("age"), ColumnId::from("name")],
    };
    let view = service.add_view(&table, "Grid", config).unwrap();

    service.delete_column(&ColumnId::from("age")).await.unwrap();

    let view = service.get_view(&view).await.unwrap();
    assert!(view.config.filters.is_empty());
    assert!(view.config.sorts.is_empty());
    assert_eq!(view.config.hidden_columns, vec![ColumnId::from("name")]);
    assert_eq!(service.cell(&row, &ColumnId::from("age")), None);
}

#[tokio::test]
async fn update_view_drops_foreign_columns() {
    let (service, table) = people();
    let view = service.add_view(&table, "Grid", ViewConfig::default()).unwrap();
    let config = ViewConfig {
        filters: Vec::new(),
        sorts: vec![SortConfig::new("elsewhere", SortDirection::Asc), SortConfig::new("age", SortDirection::Desc)],
        hidden_columns: Vec::new(),
    };
    let patch = ViewPatch { name: None, config: Some(config) };
    let updated = service.update_view(&view, patch).await.unwrap();
    assert_eq!(updated.config.sorts, vec![SortConfig::new("age", SortDirection::Desc)]);
}

#[tokio::test]
async fn create_default_table_has_columns_rows_and_view() {
    let service = MemoryService::new();
    let base = service.add_base("Empty");
    assert_eq!(service.get_latest_table(&base).await.unwrap(), None);

    let (table, view) = service.create_default_table(&base).await.unwrap();
    assert_eq!(view.table_id, table.id);
    assert_eq!(service.get_columns(&table.id).await.unwrap().len(), 3);
    assert_eq!(service.row_count(&table.id), 3);
    assert_eq!(service.get_latest_table(&base).await.unwrap(), Some(table.clone()));
    assert_eq!(service.get_table_default_view(&table.id).await.unwrap(), Some(view));
}

#[tokio::test]
async fn delete_base_cascades() {
    let (service, table) = people();
    service.add_row(&table, []);
    let base = service.store.borrow().table(&table).unwrap().base_id.clone();

    service.delete_base(&base).await.unwrap();
    assert!(service.get_columns(&table).await.unwrap_err().is_not_found());
    assert_eq!(service.row_count(&table), 0);
}

#[tokio::test]
async fn blank_names_are_rejected() {
    let service = MemoryService::new();
    let err = service.create_base("   ").await.unwrap_err();
    assert!(matches!(err, Error::Validation { field: "name", .. }));
}

#[tokio::test]
async fn bases_listed_by_last_update() {
    let service = MemoryService::new();
    let a = service.add_base("A");
    let b = service.add_base("B");
    service.update_base_name(&a, "A2").await.unwrap();

    let bases = service.get_bases_by_last_updated().await.unwrap();
    let ids: Vec<&BaseId> = bases.iter().map(|b| &b.id).collect();
    assert_eq!(ids, vec![&a, &b]);
}

#[tokio::test]
async fn create_row_coerces_cells() {
    let (service, table) = people();
    let cells = HashMap::from([(ColumnId::from("age"), text("9"))]);
    let row = service.create_row(&table, cells).await.unwrap();
    assert_eq!(row.cells.get(&ColumnId::from("age")), Some(&num(9.0)));
}
