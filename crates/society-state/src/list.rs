//! Shared machinery for list-oriented stores.
//!
//! Society, admin and notification screens all page through a list with a
//! search box, one filter, a sort key and a multi-select. [`ListStore`]
//! implements that once; each domain supplies a [`ListItem`] and adds its
//! own operations in an inherent impl.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::services::ServiceError;
use crate::store::{ManagedStore, Store};

/// Default page size for list stores.
pub const DEFAULT_ITEMS_PER_PAGE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// An entry a [`ListStore`] can hold.
pub trait ListItem: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Value of the list's single filter (status, category, ...).
    type Filter: Copy + PartialEq + fmt::Debug + Send + Sync + FromStr + 'static;
    type SortKey: Copy + PartialEq + fmt::Debug + Send + Sync + 'static;

    fn id(&self) -> &str;

    /// `query` is already lowercased and non-empty.
    fn matches_search(&self, query: &str) -> bool;

    fn matches_filter(&self, filter: Self::Filter) -> bool;

    fn compare(&self, other: &Self, key: Self::SortKey) -> Ordering;
}

/// State of a list store.
#[derive(Debug, Clone, PartialEq)]
pub struct ListState<T: ListItem> {
    pub items: Vec<T>,
    pub search_query: String,
    pub filter: Option<T::Filter>,
    pub sort_by: T::SortKey,
    pub sort_order: SortOrder,
    /// 1-based.
    pub current_page: usize,
    pub items_per_page: usize,
    pub selected_ids: BTreeSet<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl<T: ListItem> ListState<T> {
    pub fn new(sort_by: T::SortKey, sort_order: SortOrder) -> Self {
        Self {
            items: Vec::new(),
            search_query: String::new(),
            filter: None,
            sort_by,
            sort_order,
            current_page: 1,
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            selected_ids: BTreeSet::new(),
            is_loading: false,
            error: None,
        }
    }

    /// Items passing search and filter, sorted.
    pub fn filtered(&self) -> Vec<T> {
        let query = self.search_query.trim().to_lowercase();
        let mut out: Vec<T> = self
            .items
            .iter()
            .filter(|item| query.is_empty() || item.matches_search(&query))
            .filter(|item| self.filter.is_none_or(|f| item.matches_filter(f)))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            let ord = a.compare(b, self.sort_by);
            match self.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        out
    }

    /// Number of pages for the filtered items; at least 1.
    pub fn total_pages(&self) -> usize {
        let count = self.filtered().len();
        count.div_ceil(self.items_per_page.max(1)).max(1)
    }

    /// The current page of filtered items.
    pub fn visible(&self) -> Vec<T> {
        let per_page = self.items_per_page.max(1);
        self.filtered()
            .into_iter()
            .skip((self.current_page.saturating_sub(1)) * per_page)
            .take(per_page)
            .collect()
    }
}

// Spelled out because `impl_store_state!` only takes concrete types.
impl<T: ListItem> crate::store::StoreState for ListState<T> {
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
    fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }
    fn is_loading(&self) -> bool {
        self.is_loading
    }
    fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }
}

/// Paged, filterable, selectable list store.
pub struct ListStore<T: ListItem> {
    store: Store<ListState<T>>,
}

impl<T: ListItem> ListStore<T> {
    pub fn new(id: &'static str, initial: ListState<T>) -> Self {
        Self {
            store: Store::new(id, initial),
        }
    }

    // -- observation --------------------------------------------------------

    pub fn store_id(&self) -> &'static str {
        self.store.id()
    }

    pub fn snapshot(&self) -> ListState<T> {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<T>> {
        self.store.subscribe()
    }

    pub fn initial_state(&self) -> &ListState<T> {
        self.store.initial_state()
    }

    pub fn visible_items(&self) -> Vec<T> {
        self.store.with_state(ListState::visible)
    }

    pub fn filtered_count(&self) -> usize {
        self.store.with_state(|s| s.filtered().len())
    }

    pub fn total_pages(&self) -> usize {
        self.store.with_state(ListState::total_pages)
    }

    // -- common ------------------------------------------------------------

    pub fn set_error(&self, error: Option<String>) {
        self.store.set_error(error);
    }

    pub fn set_loading(&self, loading: bool) {
        self.store.set_loading(loading);
    }

    // -- data ---------------------------------------------------------------

    /// Replace the loaded items. Selection is pruned to ids still present and
    /// the page is clamped to the new page count.
    pub fn set_items(&self, items: Vec<T>) {
        self.store.update(|s| {
            s.items = items;
            let ids: BTreeSet<&str> = s.items.iter().map(ListItem::id).collect();
            s.selected_ids.retain(|id| ids.contains(id.as_str()));
            let pages = s.total_pages();
            if s.current_page > pages {
                s.current_page = pages;
            }
        });
    }

    /// Run a fetch with the loading flag set. On success the items are
    /// replaced and the error cleared; on failure the items stay and the
    /// error is recorded.
    pub async fn load_with<F>(&self, fetch: F) -> bool
    where
        F: Future<Output = Result<Vec<T>, ServiceError>> + Send,
    {
        self.store.update(|s| {
            s.is_loading = true;
            s.error = None;
        });
        match fetch.await {
            Ok(items) => {
                debug!(store_id = self.store.id(), count = items.len(), "list loaded");
                self.set_items(items);
                self.store.set_loading(false);
                true
            }
            Err(err) => {
                warn!(store_id = self.store.id(), %err, "list load failed");
                self.store.update(|s| {
                    s.is_loading = false;
                    s.error = Some(err.to_string());
                });
                false
            }
        }
    }

    // -- search, filter, sort ----------------------------------------------

    pub fn set_search_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.store.update(|s| {
            s.search_query = query;
            s.current_page = 1;
        });
    }

    pub fn set_filter(&self, filter: Option<T::Filter>) {
        self.store.update(|s| {
            s.filter = filter;
            s.current_page = 1;
        });
    }

    /// Set the filter from a raw parameter. Empty or `all` clears it; an
    /// unknown value is reported through `error` and changes nothing else.
    pub fn set_filter_param(&self, raw: &str) {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            self.set_filter(None);
            return;
        }
        match raw.parse::<T::Filter>() {
            Ok(filter) => self.set_filter(Some(filter)),
            Err(_) => self
                .store
                .set_error(Some(format!("unknown filter value: {raw}"))),
        }
    }

    pub fn set_sort(&self, sort_by: T::SortKey, sort_order: SortOrder) {
        self.store.update(|s| {
            s.sort_by = sort_by;
            s.sort_order = sort_order;
        });
    }

    pub fn toggle_sort_order(&self) {
        self.store.update(|s| s.sort_order = s.sort_order.toggled());
    }

    /// Reset search and filter to their initial values and go to page 1.
    /// Items, sort, page size and selection are kept.
    pub fn clear_filters(&self) {
        let initial = self.store.initial_state();
        let search_query = initial.search_query.clone();
        let filter = initial.filter;
        self.store.update(|s| {
            s.search_query = search_query;
            s.filter = filter;
            s.current_page = 1;
        });
    }

    // -- pagination ---------------------------------------------------------

    /// Go to `page` (1-based). Out-of-range pages are reported through
    /// `error`.
    pub fn set_page(&self, page: usize) {
        let pages = self.total_pages();
        if page == 0 || page > pages {
            self.store
                .set_error(Some(format!("page {page} is out of range (1..={pages})")));
            return;
        }
        self.store.update(|s| s.current_page = page);
    }

    pub fn next_page(&self) {
        let page = self.store.with_state(|s| s.current_page);
        if page < self.total_pages() {
            self.store.update(|s| s.current_page = page + 1);
        }
    }

    pub fn previous_page(&self) {
        self.store.update(|s| {
            if s.current_page > 1 {
                s.current_page -= 1;
            }
        });
    }

    pub fn set_items_per_page(&self, per_page: usize) {
        if per_page == 0 {
            self.store
                .set_error(Some("items per page must be at least 1".into()));
            return;
        }
        self.store.update(|s| {
            s.items_per_page = per_page;
            s.current_page = 1;
        });
    }

    // -- selection ------------------------------------------------------------

    pub fn toggle_selection(&self, id: &str) {
        self.store.update(|s| {
            if !s.selected_ids.remove(id) {
                s.selected_ids.insert(id.to_string());
            }
        });
    }

    pub fn select_all_visible(&self) {
        self.store.update(|s| {
            let visible: Vec<String> = s.visible().iter().map(|i| i.id().to_string()).collect();
            s.selected_ids.extend(visible);
        });
    }

    pub fn clear_selection(&self) {
        self.store.update(|s| s.selected_ids.clear());
    }

    pub fn selected_items(&self) -> Vec<T> {
        self.store.with_state(|s| {
            s.items
                .iter()
                .filter(|i| s.selected_ids.contains(i.id()))
                .cloned()
                .collect()
        })
    }

    // -- crate internals ----------------------------------------------------

    pub(crate) fn update(&self, f: impl FnOnce(&mut ListState<T>)) {
        self.store.update(f);
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&ListState<T>) -> R) -> R {
        self.store.with_state(f)
    }
}

#[async_trait]
impl<T: ListItem> ManagedStore for ListStore<T> {
    fn id(&self) -> &'static str {
        self.store.id()
    }

    async fn reset(&self) {
        self.store.reset();
    }

    fn is_pristine(&self) -> bool {
        self.store.is_pristine()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
