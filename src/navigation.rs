//! Picks the table and view to open for a base

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::{BaseId, Table, View};
use crate::recents::{now_millis, Recents};
use crate::service::DataService;

pub const DEFAULT_VIEW_NAME: &str = "Grid view";

#[derive(Debug, Clone, PartialEq)]
pub enum Landing {
    Table { base_id: BaseId, table: Table, view: View },
    /// Nothing could be found or created for the base
    Home,
}

/// Resolve where opening `base_id` should land, creating a default table or
/// view when none exists. Failures that leave nothing to show land at home.
pub async fn resolve_landing(service: &dyn DataService, recents: &Recents, base_id: &BaseId) -> Landing {
    match resolve(service, recents, base_id).await {
        Ok((table, view)) => {
            remember(recents, base_id, &table, &view);
            Landing::Table { base_id: base_id.clone(), table, view }
        }
        Err(e) => {
            error!(base_id = %base_id, error = %e, "no table to open, going home");
            Landing::Home
        }
    }
}

async fn resolve(service: &dyn DataService, recents: &Recents, base_id: &BaseId) -> Result<(Table, View)> {
    let (table, created_view) = resolve_table(service, recents, base_id).await?;
    if let Some(view) = created_view {
        return Ok((table, view));
    }
    let view = resolve_view(service, recents, &table).await?;
    Ok((table, view))
}

/// A freshly created default table comes with its view
async fn resolve_table(service: &dyn DataService, recents: &Recents, base_id: &BaseId) -> Result<(Table, Option<View>)> {
    if let Some(table_id) = recents.last_viewed_table(base_id).unwrap_or_else(|e| {
        warn!(error = %e, "couldn't read last viewed table");
        None
    }) {
        match service.get_table(&table_id).await {
            Ok(table) if &table.base_id == base_id => return Ok((table, None)),
            Ok(_) => info!(table_id = %table_id, "last viewed table belongs to another base"),
            Err(e) if e.is_not_found() => info!(table_id = %table_id, "last viewed table is gone"),
            Err(e) => return Err(e),
        }
        forget(recents.forget_last_viewed_table(base_id));
    }

    if let Some(table) = service.get_latest_table(base_id).await? {
        debug!(table_id = %table.id, "opening latest table");
        return Ok((table, None));
    }

    info!(base_id = %base_id, "base has no tables, creating one");
    let (table, view) = service.create_default_table(base_id).await?;
    Ok((table, Some(view)))
}

async fn resolve_view(service: &dyn DataService, recents: &Recents, table: &Table) -> Result<View> {
    if let Some(view_id) = recents.last_viewed_view(&table.id).unwrap_or_else(|e| {
        warn!(error = %e, "couldn't read last viewed view");
        None
    }) {
        match service.get_view(&view_id).await {
            Ok(view) if view.table_id == table.id => return Ok(view),
            Ok(_) => info!(view_id = %view_id, "last viewed view belongs to another table"),
            Err(e) if e.is_not_found() => info!(view_id = %view_id, "last viewed view is gone"),
            Err(e) => return Err(e),
        }
        forget(recents.forget_last_viewed_view(&table.id));
    }

    if let Some(view) = service.get_table_default_view(&table.id).await? {
        return Ok(view);
    }

    info!(table_id = %table.id, "table has no views, creating one");
    service.create_view(&table.id, DEFAULT_VIEW_NAME).await
}

fn remember(recents: &Recents, base_id: &BaseId, table: &Table, view: &View) {
    forget(recents.set_last_viewed_table(base_id, &table.id));
    forget(recents.set_last_viewed_view(&table.id, &view.id));
    forget(recents.record_base_view(base_id, now_millis()));
}

/// Local store writes never block navigation
fn forget(result: Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "local store write failed");
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::error::Error;
    use crate::model::{ColumnType, TableId, ViewConfig, ViewId};
    use crate::service::memory::MemoryService;
    use crate::store::MemoryStore;

    fn recents() -> Recents {
        Recents::new(Rc::new(MemoryStore::new()), 50)
    }

    fn landed(landing: &Landing) -> (TableId, ViewId) {
        match landing {
            Landing::Table { table, view, .. } => (table.id.clone(), view.id.clone()),
            Landing::Home => panic!("expected a table"),
        }
    }

    #[tokio::test]
    async fn remembered_table_and_view_win() {
        let service = MemoryService::new();
        let base = service.add_base("Acme");
        let first = service.add_table(&base, "First");
        let _latest = service.add_table(&base, "Latest");
        service.add_view(&first, "Grid", ViewConfig::default()).unwrap();
        let kanban = service.add_view(&first, "Board", ViewConfig::default()).unwrap();

        let recents = recents();
        recents.set_last_viewed_table(&base, &first).unwrap();
        recents.set_last_viewed_view(&first, &kanban).unwrap();

        let landing = resolve_landing(&service, &recents, &base).await;
        assert_eq!(landed(&landing), (first, kanban));
        assert_eq!(recents.recent_bases().unwrap()[0].base_id, base);
    }

    #[tokio::test]
    async fn deleted_table_falls_back_to_latest() {
        let service = MemoryService::new();
        let base = service.add_base("Acme");
        service.add_table(&base, "Old");
        let latest = service.add_table(&base, "Latest");
        let view = service.add_view(&latest, "Grid", ViewConfig::default()).unwrap();

        let recents = recents();
        recents.set_last_viewed_table(&base, &TableId::from("tblGone")).unwrap();

        let landing = resolve_landing(&service, &recents, &base).await;
        assert_eq!(landed(&landing), (latest.clone(), view));
        assert_eq!(recents.last_viewed_table(&base).unwrap(), Some(latest));
    }

    #[tokio::test]
    async fn empty_base_gets_a_default_table() {
        let service = MemoryService::new();
        let base = service.add_base("Empty");
        let recents = recents();

        let landing = resolve_landing(&service, &recents, &base).await;
        let (table, view) = landed(&landing);
        assert_eq!(service.view(&view).unwrap().name, DEFAULT_VIEW_NAME);
        assert!(!service.get_columns(&table).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn table_without_views_gets_a_grid_view() {
        let service = MemoryService::new();
        let base = service.add_base("Acme");
        let table = service.add_table(&base, "Bare");
        service.add_column(&table, "name", "Name", ColumnType::Text);

        let landing = resolve_landing(&service, &recents(), &base).await;
        let (_, view) = landed(&landing);
        assert_eq!(service.view(&view).unwrap().name, DEFAULT_VIEW_NAME);
        assert_eq!(service.call_count("create_view"), 1);
    }

    #[tokio::test]
    async fn unreachable_service_goes_home() {
        let service = MemoryService::new();
        let base = service.add_base("Acme");
        service.fail_next("get_latest_table", Error::Network("down".to_string()));
        assert_eq!(resolve_landing(&service, &recents(), &base).await, Landing::Home);
    }

    #[tokio::test]
    async fn missing_base_goes_home() {
        let service = MemoryService::new();
        let landing = resolve_landing(&service, &recents(), &BaseId::from("appGone")).await;
        assert_eq!(landing, Landing::Home);
    }
}
