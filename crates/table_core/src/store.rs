use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::{debug, warn};

/// UI state slot for one mounted list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState {
    pub search: String,
    pub limit: u32,
    pub offset: u32,
    pub ordering: String,
    pub default_sort: String,
    pub pagination_key: String,
    pub params: BTreeMap<String, String>,
}

impl TableState {
    fn from_seed(seed: &TableStateSeed) -> Self {
        Self {
            search: String::new(),
            limit: seed.limit,
            offset: 0,
            ordering: seed.default_sort.clone(),
            default_sort: seed.default_sort.clone(),
            pagination_key: seed.pagination_key.clone(),
            params: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableStateSeed {
    pub limit: u32,
    pub default_sort: String,
    pub pagination_key: String,
}

/// The single mutation action for table state. `Param` merges into the
/// dynamic filter map; the other variants hit top-level fields.
#[derive(Debug, Clone)]
pub enum TableStatePatch {
    Search(String),
    Limit(u32),
    Offset(u32),
    Ordering(String),
    Param(String, String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no table state registered for key '{0}'")]
    UnknownKey(String),
}

/// Keyed store of per-table UI state. One entry exists per mounted table:
/// the owning controller calls `init` on mount and `dispose` on unmount, so
/// a later mount of the same key starts from defaults instead of inheriting
/// stale filters.
#[derive(Clone, Default)]
pub struct TableStateStore {
    inner: Arc<Mutex<HashMap<String, TableState>>>,
}

impl TableStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, TableState>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn init(&self, key: &str, seed: &TableStateSeed) -> TableState {
        let state = TableState::from_seed(seed);
        let previous = self.entries().insert(key.to_string(), state.clone());
        if previous.is_some() {
            warn!("table state for key '{key}' re-initialized while still live");
        }
        state
    }

    pub fn dispose(&self, key: &str) {
        if self.entries().remove(key).is_none() {
            debug!("dispose for unknown table state key '{key}'");
        }
    }

    pub fn get(&self, key: &str) -> Option<TableState> {
        self.entries().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Applies one patch. A changed search string or ordering invalidates
    /// the current page position, so `offset` snaps back to 0.
    pub fn update(&self, key: &str, patch: TableStatePatch) -> Result<TableState, StoreError> {
        let mut entries = self.entries();
        let state = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;

        match patch {
            TableStatePatch::Search(search) => {
                if search != state.search {
                    state.search = search;
                    state.offset = 0;
                }
            }
            TableStatePatch::Ordering(ordering) => {
                if ordering != state.ordering {
                    state.ordering = ordering;
                    state.offset = 0;
                }
            }
            TableStatePatch::Limit(limit) => state.limit = limit,
            TableStatePatch::Offset(offset) => state.offset = offset,
            TableStatePatch::Param(name, value) => {
                state.params.insert(name, value);
            }
        }

        Ok(state.clone())
    }

    /// Clears the entry back to its seeded defaults without removing it.
    pub fn reset(&self, key: &str) -> Result<TableState, StoreError> {
        let mut entries = self.entries();
        let state = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;

        state.search.clear();
        state.offset = 0;
        state.ordering = state.default_sort.clone();
        state.params.clear();

        Ok(state.clone())
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
