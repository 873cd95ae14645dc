use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    fetch::{CollectionFetcher, CollectionQuery},
    settings::PageSizeSettings,
    sort::next_ordering,
    store::{TableState, TableStatePatch, TableStateSeed, TableStateStore},
};

/// How long a search keystroke waits for a follow-up before fetching.
const SEARCH_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct TableControllerConfig {
    pub store_key: String,
    pub default_sort: String,
    /// Settings key for the seeded page size. Defaults to
    /// `{store_key}ShowPer` when not set.
    pub pagination_key: Option<String>,
    /// Merged into every derived query, under any dynamic filters.
    pub static_params: BTreeMap<String, String>,
}

impl TableControllerConfig {
    pub fn new(store_key: impl Into<String>) -> Self {
        Self {
            store_key: store_key.into(),
            default_sort: String::new(),
            pagination_key: None,
            static_params: BTreeMap::new(),
        }
    }

    pub fn default_sort(mut self, ordering: impl Into<String>) -> Self {
        self.default_sort = ordering.into();
        self
    }

    pub fn pagination_key(mut self, key: impl Into<String>) -> Self {
        self.pagination_key = Some(key.into());
        self
    }

    pub fn static_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_params.insert(name.into(), value.into());
        self
    }
}

/// What a list view renders: current rows, total count, and fetch status.
/// A failed fetch keeps the previous rows visible and only sets `error`.
#[derive(Debug, Clone)]
pub struct TableSnapshot<R> {
    pub rows: Vec<R>,
    pub total: u64,
    pub loading: bool,
    pub error: Option<String>,
}

impl<R> Default for TableSnapshot<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            total: 0,
            loading: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TableEvent {
    PageLoaded {
        store_key: String,
        rows: usize,
        count: u64,
    },
    FetchFailed {
        store_key: String,
        error: String,
    },
}

/// Binds a [`CollectionFetcher`] to one `store_key` slot in the shared
/// [`TableStateStore`]. Every issued fetch carries a generation token and a
/// response is applied only while its token is still the latest, so a slow
/// older response never overwrites newer rows and responses racing an
/// unmount are discarded.
pub struct TableController<R> {
    fetcher: Arc<dyn CollectionFetcher<R>>,
    store: TableStateStore,
    store_key: String,
    static_params: BTreeMap<String, String>,
    seed: TableStateSeed,
    snapshot: Mutex<TableSnapshot<R>>,
    generation: AtomicU64,
    events: broadcast::Sender<TableEvent>,
}

impl<R> TableController<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new(
        fetcher: Arc<dyn CollectionFetcher<R>>,
        store: TableStateStore,
        config: TableControllerConfig,
        settings: &PageSizeSettings,
    ) -> Arc<Self> {
        let pagination_key = config
            .pagination_key
            .unwrap_or_else(|| format!("{}ShowPer", config.store_key));
        let seed = TableStateSeed {
            limit: settings.limit_for(&pagination_key),
            default_sort: config.default_sort,
            pagination_key,
        };
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            fetcher,
            store,
            store_key: config.store_key,
            static_params: config.static_params,
            seed,
            snapshot: Mutex::new(TableSnapshot::default()),
            generation: AtomicU64::new(0),
            events,
        })
    }

    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TableEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> TableSnapshot<R> {
        self.lock_snapshot().clone()
    }

    pub fn state(&self) -> Option<TableState> {
        self.store.get(&self.store_key)
    }

    /// Seeds the state slot for this table and loads the first page.
    pub async fn mount(&self) {
        self.store.init(&self.store_key, &self.seed);
        let generation = self.next_generation();
        self.fetch_current(generation).await;
    }

    /// Drops the state slot. A response still in flight is discarded by the
    /// generation check instead of being applied to an unmounted table.
    pub fn unmount(&self) {
        self.next_generation();
        self.store.dispose(&self.store_key);
    }

    /// Debounced search input. The offset reset applies immediately; the
    /// fetch runs only if no newer change lands within the debounce window,
    /// so rapid keystrokes collapse into one request for the final string.
    pub fn set_search(self: &Arc<Self>, search: impl Into<String>) {
        if let Err(err) = self
            .store
            .update(&self.store_key, TableStatePatch::Search(search.into()))
        {
            warn!("search update dropped: {err}");
            return;
        }
        let generation = self.next_generation();
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(SEARCH_DEBOUNCE).await;
            if controller.generation.load(Ordering::SeqCst) != generation {
                debug!(
                    "search fetch for '{}' superseded within debounce window",
                    controller.store_key
                );
                return;
            }
            controller.fetch_current(generation).await;
        });
    }

    /// Applies the header sort cycle for `data_field` and refetches.
    pub async fn sort_on(&self, data_field: &str) {
        let Some(state) = self.store.get(&self.store_key) else {
            warn!("sort click on unmounted table '{}'", self.store_key);
            return;
        };
        let ordering = next_ordering(&state.ordering, data_field, &state.default_sort);
        self.apply(TableStatePatch::Ordering(ordering)).await;
    }

    pub async fn set_offset(&self, offset: u32) {
        self.apply(TableStatePatch::Offset(offset)).await;
    }

    pub async fn set_limit(&self, limit: u32) {
        self.apply(TableStatePatch::Limit(limit)).await;
    }

    pub async fn set_param(&self, name: impl Into<String>, value: impl Into<String>) {
        self.apply(TableStatePatch::Param(name.into(), value.into()))
            .await;
    }

    /// Refetches with current params. Views call this after destructive
    /// operations (delete, bulk stage change) to refresh the page in place.
    pub async fn refresh(&self) {
        let generation = self.next_generation();
        self.fetch_current(generation).await;
    }

    async fn apply(&self, patch: TableStatePatch) {
        if let Err(err) = self.store.update(&self.store_key, patch) {
            warn!("table update dropped: {err}");
            return;
        }
        let generation = self.next_generation();
        self.fetch_current(generation).await;
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, TableSnapshot<R>> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn derive_query(&self, state: &TableState) -> CollectionQuery {
        let mut params = self.static_params.clone();
        params.extend(state.params.clone());
        CollectionQuery {
            search: state.search.clone(),
            limit: state.limit,
            offset: state.offset,
            ordering: state.ordering.clone(),
            params,
        }
    }

    async fn fetch_current(&self, generation: u64) {
        let Some(state) = self.store.get(&self.store_key) else {
            debug!("fetch skipped, table '{}' is not mounted", self.store_key);
            return;
        };
        let query = self.derive_query(&state);
        self.lock_snapshot().loading = true;

        let outcome = self.fetcher.fetch_page(&query).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(
                "discarding superseded page for '{}' generation={generation}",
                self.store_key
            );
            return;
        }

        match outcome {
            Ok(page) => {
                let rows = page.results.len();
                let count = page.count;
                {
                    let mut snapshot = self.lock_snapshot();
                    snapshot.rows = page.results;
                    snapshot.total = count;
                    snapshot.loading = false;
                    snapshot.error = None;
                }
                let _ = self.events.send(TableEvent::PageLoaded {
                    store_key: self.store_key.clone(),
                    rows,
                    count,
                });
            }
            Err(err) => {
                {
                    let mut snapshot = self.lock_snapshot();
                    snapshot.loading = false;
                    snapshot.error = Some(err.to_string());
                }
                warn!("page fetch failed for '{}': {err:#}", self.store_key);
                let _ = self.events.send(TableEvent::FetchFailed {
                    store_key: self.store_key.clone(),
                    error: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
