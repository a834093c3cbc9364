//! Row data of one table: the cache, the keyset ordering and the pager that fills them

pub mod cache;
pub mod pager;
pub mod sort;

pub use cache::{RowCache, TableData};
pub use pager::{FetchPhase, PagerParams, TableActions, TableDataPager};
pub use sort::{KeyOrder, RowKey, SortKey};
