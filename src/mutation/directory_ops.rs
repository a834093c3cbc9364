use async_trait::async_trait;

use super::command::{validate_name, Command, EntityKey};
use crate::error::{EntityKind, Error, Result};
use crate::model::{Base, BaseEntry, BaseId, Identity, LocalId, TableId, View, ViewEntry, ViewId, ViewPatch};
use crate::service::DataService;

/// Undo information shared by the base and view listings
#[derive(Debug, Clone, PartialEq)]
pub enum ListingUndo<E> {
    Inserted,
    Renamed(String),
    Removed { index: usize, entry: E },
}

// === bases ===

/// Edits to the home-screen list of bases
#[derive(Debug, Clone, PartialEq)]
pub enum BaseMutation {
    Create { local: LocalId, name: String },
    Rename { id: BaseId, name: String },
    Delete { id: BaseId },
}

impl BaseMutation {
    pub fn create(name: impl Into<String>) -> Self {
        BaseMutation::Create { local: LocalId::generate(), name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaseOutcome {
    Saved(Base),
    Deleted,
}

fn base_index(bases: &[BaseEntry], id: &BaseId) -> Result<usize> {
    bases
        .iter()
        .position(|b| b.id.is(id))
        .ok_or_else(|| Error::not_found(EntityKind::Base, id))
}

#[async_trait(?Send)]
impl Command for BaseMutation {
    type State = Vec<BaseEntry>;
    type Snapshot = ListingUndo<BaseEntry>;
    type Output = BaseOutcome;

    fn label(&self) -> &'static str {
        match self {
            BaseMutation::Create { .. } => "create base",
            BaseMutation::Rename { .. } => "rename base",
            BaseMutation::Delete { .. } => "delete base",
        }
    }

    fn entity(&self) -> EntityKey {
        match self {
            BaseMutation::Create { local, .. } => EntityKey::new("base", local),
            BaseMutation::Rename { id, .. } | BaseMutation::Delete { id } => EntityKey::new("base", id),
        }
    }

    fn supersedes(&self, older: &Self) -> bool {
        matches!(
            (self, older),
            (BaseMutation::Delete { .. }, _) | (BaseMutation::Rename { .. }, BaseMutation::Rename { .. })
        )
    }

    fn apply(&self, bases: &mut Vec<BaseEntry>) -> Result<Self::Snapshot> {
        match self {
            BaseMutation::Create { local, name } => {
                let name = validate_name(name)?;
                bases.insert(0, BaseEntry { id: Identity::Pending(*local), name, color: String::new() });
                Ok(ListingUndo::Inserted)
            }
            BaseMutation::Rename { id, name } => {
                let name = validate_name(name)?;
                let index = base_index(bases, id)?;
                Ok(ListingUndo::Renamed(std::mem::replace(&mut bases[index].name, name)))
            }
            BaseMutation::Delete { id } => {
                let index = base_index(bases, id)?;
                Ok(ListingUndo::Removed { index, entry: bases.remove(index) })
            }
        }
    }

    async fn dispatch(&self, service: &dyn DataService) -> Result<BaseOutcome> {
        match self {
            BaseMutation::Create { name, .. } => Ok(BaseOutcome::Saved(service.create_base(name.trim()).await?)),
            BaseMutation::Rename { id, name } => {
                Ok(BaseOutcome::Saved(service.update_base_name(id, name.trim()).await?))
            }
            BaseMutation::Delete { id } => {
                service.delete_base(id).await?;
                Ok(BaseOutcome::Deleted)
            }
        }
    }

    fn commit(&self, bases: &mut Vec<BaseEntry>, output: &BaseOutcome) {
        if let (BaseMutation::Create { local, .. }, BaseOutcome::Saved(base)) = (self, output) {
            if let Some(entry) = bases.iter_mut().find(|b| b.id.is_local(*local)) {
                *entry = base.clone().into();
            }
        }
    }

    fn rollback(&self, bases: &mut Vec<BaseEntry>, snapshot: Self::Snapshot) {
        match (self, snapshot) {
            (BaseMutation::Create { local, .. }, ListingUndo::Inserted) => {
                bases.retain(|b| !b.id.is_local(*local));
            }
            (BaseMutation::Rename { id, .. }, ListingUndo::Renamed(previous)) => {
                if let Some(entry) = bases.iter_mut().find(|b| b.id.is(id)) {
                    entry.name = previous;
                }
            }
            (BaseMutation::Delete { .. }, ListingUndo::Removed { index, entry }) => {
                bases.insert(index.min(bases.len()), entry);
            }
            _ => {}
        }
    }
}

// === views ===

/// Edits to the list of views of one table
#[derive(Debug, Clone, PartialEq)]
pub enum ViewMutation {
    Create { table: TableId, local: LocalId, name: String },
    Rename { id: ViewId, name: String },
    Delete { id: ViewId },
}

impl ViewMutation {
    pub fn create(table: TableId, name: impl Into<String>) -> Self {
        ViewMutation::Create { table, local: LocalId::generate(), name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome {
    Saved(View),
    Deleted,
}

fn view_index(views: &[ViewEntry], id: &ViewId) -> Result<usize> {
    views
        .iter()
        .position(|v| v.id.is(id))
        .ok_or_else(|| Error::not_found(EntityKind::View, id))
}

#[async_trait(?Send)]
impl Command for ViewMutation {
    type State = Vec<ViewEntry>;
    type Snapshot = ListingUndo<ViewEntry>;
    type Output = ViewOutcome;

    fn label(&self) -> &'static str {
        match self {
            ViewMutation::Create { .. } => "create view",
            ViewMutation::Rename { .. } => "rename view",
            ViewMutation::Delete { .. } => "delete view",
        }
    }

    fn entity(&self) -> EntityKey {
        match self {
            ViewMutation::Create { local, .. } => EntityKey::new("view", local),
            ViewMutation::Rename { id, .. } | ViewMutation::Delete { id } => EntityKey::new("view", id),
        }
    }

    fn supersedes(&self, older: &Self) -> bool {
        matches!(
            (self, older),
            (ViewMutation::Delete { .. }, _) | (ViewMutation::Rename { .. }, ViewMutation::Rename { .. })
        )
    }

    fn apply(&self, views: &mut Vec<ViewEntry>) -> Result<Self::Snapshot> {
        match self {
            ViewMutation::Create { table, local, name } => {
                let name = validate_name(name)?;
                views.push(ViewEntry { id: Identity::Pending(*local), table_id: table.clone(), name });
                Ok(ListingUndo::Inserted)
            }
            ViewMutation::Rename { id, name } => {
                let name = validate_name(name)?;
                let index = view_index(views, id)?;
                Ok(ListingUndo::Renamed(std::mem::replace(&mut views[index].name, name)))
            }
            ViewMutation::Delete { id } => {
                let index = view_index(views, id)?;
                Ok(ListingUndo::Removed { index, entry: views.remove(index) })
            }
        }
    }

    async fn dispatch(&self, service: &dyn DataService) -> Result<ViewOutcome> {
        match self {
            ViewMutation::Create { table, name, .. } => {
                Ok(ViewOutcome::Saved(service.create_view(table, name.trim()).await?))
            }
            ViewMutation::Rename { id, name } => {
                let patch = ViewPatch { name: Some(name.trim().to_string()), config: None };
                Ok(ViewOutcome::Saved(service.update_view(id, patch).await?))
            }
            ViewMutation::Delete { id } => {
                service.delete_view(id).await?;
                Ok(ViewOutcome::Deleted)
            }
        }
    }

    fn commit(&self, views: &mut Vec<ViewEntry>, output: &ViewOutcome) {
        if let (ViewMutation::Create { local, .. }, ViewOutcome::Saved(view)) = (self, output) {
            if let Some(entry) = views.iter_mut().find(|v| v.id.is_local(*local)) {
                *entry = view.clone().into();
            }
        }
    }

    fn rollback(&self, views: &mut Vec<ViewEntry>, snapshot: Self::Snapshot) {
        match (self, snapshot) {
            (ViewMutation::Create { local, .. }, ListingUndo::Inserted) => {
                views.retain(|v| !v.id.is_local(*local));
            }
            (ViewMutation::Rename { id, .. }, ListingUndo::Renamed(previous)) => {
                if let Some(entry) = views.iter_mut().find(|v| v.id.is(id)) {
                    entry.name = previous;
                }
            }
            (ViewMutation::Delete { .. }, ListingUndo::Removed { index, entry }) => {
                views.insert(index.min(views.len()), entry);
            }
            _ => {}
        }
    }
}
