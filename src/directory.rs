//! The home-screen list of bases

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{EntityKind, Error, Result};
use crate::model::{Base, BaseEntry, BaseId};
use crate::mutation::{BaseMutation, BaseOutcome, MutationExecutor};
use crate::notice::NoticeBoard;
use crate::recents::Recents;
use crate::service::DataService;

pub struct BaseDirectory {
    service: Rc<dyn DataService>,
    recents: Recents,
    executor: MutationExecutor<BaseMutation>,
    bases: Rc<RefCell<Vec<BaseEntry>>>,
}

impl BaseDirectory {
    pub fn new(service: Rc<dyn DataService>, notices: NoticeBoard, recents: Recents) -> Self {
        Self {
            executor: MutationExecutor::new(service.clone(), notices),
            service,
            recents,
            bases: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Bases by last update, then reordered by when this device last opened them
    pub async fn load(&self) -> Result<()> {
        let mut bases: Vec<BaseEntry> = self
            .service
            .get_bases_by_last_updated()
            .await?
            .into_iter()
            .map(BaseEntry::from)
            .collect();
        if let Err(e) = self.recents.sort_bases_by_last_viewed(&mut bases) {
            warn!(error = %e, "couldn't read recent bases");
        }
        debug!(count = bases.len(), "bases loaded");
        *self.bases.borrow_mut() = bases;
        Ok(())
    }

    pub fn bases(&self) -> Vec<BaseEntry> {
        self.bases.borrow().clone()
    }

    /// The new base is listed first, pending, until the service confirms it
    pub fn create(&self, name: &str) -> impl Future<Output = Result<Base>> {
        let settled = self.executor.execute(&self.bases, BaseMutation::create(name));
        async move {
            match settled.await? {
                BaseOutcome::Saved(base) => Ok(base),
                BaseOutcome::Deleted => Err(Error::not_found(EntityKind::Base, "new base")),
            }
        }
    }

    pub fn rename(&self, id: &BaseId, name: &str) -> impl Future<Output = Result<()>> {
        let mutation = BaseMutation::Rename { id: id.clone(), name: name.to_string() };
        let settled = self.executor.execute(&self.bases, mutation);
        async move { settled.await.map(|_| ()) }
    }

    pub fn delete(&self, id: &BaseId) -> impl Future<Output = Result<()>> {
        let settled = self.executor.execute(&self.bases, BaseMutation::Delete { id: id.clone() });
        let recents = self.recents.clone();
        let id = id.clone();
        async move {
            settled.await?;
            if let Err(e) = recents.forget_base(&id) {
                warn!(base_id = %id, error = %e, "couldn't forget deleted base");
            }
            Ok(())
        }
    }
}
