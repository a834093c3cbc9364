//! Optimistic mutations: every edit is applied locally, sent to the data
//! service, then kept or rolled back.

pub mod command;
pub mod directory_ops;
pub mod executor;
pub mod table_ops;

pub use command::{Command, EntityKey};
pub use directory_ops::{BaseMutation, BaseOutcome, ViewMutation, ViewOutcome};
pub use executor::MutationExecutor;
pub use table_ops::{TableMutation, TableOutcome};
