//! Client-side core for remote-collection list views: per-table UI state,
//! header sort cycling, request derivation, and the fetch lifecycle.
//!
//! A list view owns one [`TableController`] bound to a `store_key`. The
//! controller seeds a slot in the shared [`TableStateStore`] on mount,
//! derives [`CollectionQuery`] parameters from that slot, and applies pages
//! returned by a [`CollectionFetcher`] to its snapshot. Search input is
//! debounced; sort and page changes fetch immediately.

pub mod controller;
pub mod fetch;
pub mod settings;
pub mod sort;
pub mod store;

pub use controller::{TableController, TableControllerConfig, TableEvent, TableSnapshot};
pub use fetch::{
    CollectionFetcher, CollectionQuery, FetchError, HttpCollectionFetcher, MissingCollectionFetcher,
};
pub use settings::{load_settings, PageSizeSettings, DEFAULT_PAGE_SIZE};
pub use sort::{active_field, next_ordering, sort_state, SortDirection};
pub use store::{StoreError, TableState, TableStatePatch, TableStateSeed, TableStateStore};
