//! Client-side table and view engine: a paged row cache over a remote data
//! service, optimistic edits with rollback, per-view filters and sorts,
//! search over the loaded rows, and column layout.

pub mod config;
pub mod directory;
pub mod error;
pub mod fileio;
pub mod model;
pub mod mutation;
pub mod navigation;
pub mod notice;
pub mod predicate;
pub mod recents;
pub mod search;
pub mod service;
pub mod session;
pub mod store;
pub mod table;
pub mod util;
pub mod view;

pub use error::{Error, Result};
