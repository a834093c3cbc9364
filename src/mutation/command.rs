use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::service::DataService;

/// Names the logical entity a mutation targets; mutations with equal keys
/// are dispatched one at a time, in the order they were applied. Every
/// mutation of one base, view, row or column shares the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(kind: &str, id: impl fmt::Display) -> Self {
        Self(format!("{}:{}", kind, id))
    }

    pub fn nested(kind: &str, id: impl fmt::Display, part: impl fmt::Display) -> Self {
        Self(format!("{}:{}:{}", kind, id, part))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An optimistic edit: applied locally first, then dispatched, then
/// committed or rolled back depending on the service's answer.
#[async_trait(?Send)]
pub trait Command {
    /// Local state the command edits
    type State;
    /// Enough information to undo `apply`
    type Snapshot;
    /// What the service returns on success
    type Output: Clone;

    /// Short human label used in notices, e.g. "rename base"
    fn label(&self) -> &'static str;

    fn entity(&self) -> EntityKey;

    /// Mutate local state and capture an undo snapshot. An error here is a
    /// local rejection: nothing was changed and nothing is dispatched.
    fn apply(&self, state: &mut Self::State) -> Result<Self::Snapshot>;

    async fn dispatch(&self, service: &dyn DataService) -> Result<Self::Output>;

    /// Make the optimistic state final, swapping placeholder identities for server ones
    fn commit(&self, state: &mut Self::State, output: &Self::Output);

    fn rollback(&self, state: &mut Self::State, snapshot: Self::Snapshot);

    /// Whether this overwrites everything `older` changed. A failed `older`
    /// then leaves its undo steps to this mutation instead of rolling back
    /// underneath it.
    fn supersedes(&self, _older: &Self) -> bool {
        false
    }

    /// Whether settlement should trigger a consistency refetch of the table
    fn invalidates_query(&self) -> bool {
        false
    }
}

/// Trimmed name, or a validation error when nothing is left
pub(crate) fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(crate::Error::validation("name", "name can't be empty"));
    }
    Ok(name.to_string())
}
