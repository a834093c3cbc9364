//! Where the user was last: per-base table, per-table view, recently opened bases

use std::cmp::Ordering;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::model::{BaseEntry, BaseId, TableId, ViewId};
use crate::store::KeyValueStore;

const RECENT_BASES_KEY: &str = "lastViewedBases";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentBase {
    pub base_id: BaseId,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone)]
pub struct Recents {
    store: Rc<dyn KeyValueStore>,
    cap: usize,
}

impl Recents {
    pub fn new(store: Rc<dyn KeyValueStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    pub fn last_viewed_table(&self, base: &BaseId) -> Result<Option<TableId>> {
        Ok(self.store.get(&table_key(base))?.map(TableId::from))
    }

    pub fn set_last_viewed_table(&self, base: &BaseId, table: &TableId) -> Result<()> {
        self.store.set(&table_key(base), table.as_str())
    }

    pub fn forget_last_viewed_table(&self, base: &BaseId) -> Result<()> {
        self.store.delete(&table_key(base))
    }

    pub fn last_viewed_view(&self, table: &TableId) -> Result<Option<ViewId>> {
        Ok(self.store.get(&view_key(table))?.map(ViewId::from))
    }

    pub fn set_last_viewed_view(&self, table: &TableId, view: &ViewId) -> Result<()> {
        self.store.set(&view_key(table), view.as_str())
    }

    pub fn forget_last_viewed_view(&self, table: &TableId) -> Result<()> {
        self.store.delete(&view_key(table))
    }

    /// Most recent first. An unreadable list is treated as empty.
    pub fn recent_bases(&self) -> Result<Vec<RecentBase>> {
        let Some(raw) = self.store.get(RECENT_BASES_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(list) => Ok(list),
            Err(e) => {
                warn!(error = %e, "discarding unreadable recent bases");
                Ok(Vec::new())
            }
        }
    }

    /// Move `base` to the front, dropping the oldest entries past the cap
    pub fn record_base_view(&self, base: &BaseId, timestamp: u64) -> Result<()> {
        let mut list = self.recent_bases()?;
        list.retain(|r| &r.base_id != base);
        list.insert(0, RecentBase { base_id: base.clone(), timestamp });
        list.truncate(self.cap);
        self.store.set(RECENT_BASES_KEY, &serde_json::to_string(&list)?)
    }

    pub fn forget_base(&self, base: &BaseId) -> Result<()> {
        let mut list = self.recent_bases()?;
        let before = list.len();
        list.retain(|r| &r.base_id != base);
        if list.len() != before {
            self.store.set(RECENT_BASES_KEY, &serde_json::to_string(&list)?)?;
        }
        self.forget_last_viewed_table(base)
    }

    pub fn sort_bases_by_last_viewed(&self, bases: &mut [BaseEntry]) -> Result<()> {
        let recent = self.recent_bases()?;
        sort_bases_by_last_viewed(bases, &recent);
        Ok(())
    }
}

fn table_key(base: &BaseId) -> String {
    format!("lastViewedTable:{}", base)
}

fn view_key(table: &TableId) -> String {
    format!("lastViewedView:{}", table)
}

/// Bases with a timestamp first, newest first; the others keep their order
pub fn sort_bases_by_last_viewed(bases: &mut [BaseEntry], recent: &[RecentBase]) {
    let stamp = |entry: &BaseEntry| {
        let id = entry.id.resolved()?;
        recent.iter().find(|r| &r.base_id == id).map(|r| r.timestamp)
    };
    bases.sort_by(|a, b| match (stamp(a), stamp(b)) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
