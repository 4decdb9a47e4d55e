use crate::catalog::CatalogService;
use crate::config::KeyValueStore;
use crate::error::NoticeError;
use crate::history::SearchHistory;
use crate::model::{GenreSelection, ItemId, MediaFilter, SearchItem, SortMode};
use std::collections::{BTreeSet, HashMap};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

const MISSING_COLLECTION_NAME: &str = "No information provided";

/// Identifies one search request. Only the most recent ticket may write results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Blank query: results and facets were cleared without a request.
    Cleared,
    Loaded(usize),
    /// A newer search was started before this response arrived.
    Stale,
}

#[derive(Debug, Default)]
pub struct ResultPipeline {
    results: Vec<SearchItem>,
    original_positions: HashMap<ItemId, usize>,
    available_genres: BTreeSet<String>,
    active_genres: GenreSelection,
    sort_mode: SortMode,
    media_filter: MediaFilter,
    query: String,
    loading: bool,
    latest_ticket: u64,
    pub history: SearchHistory,
}

impl ResultPipeline {
    pub fn new(history: SearchHistory, media_filter: MediaFilter) -> Self {
        Self {
            history,
            media_filter,
            ..Self::default()
        }
    }

    /// Runs one search to completion against `catalog`.
    pub fn search_for(
        &mut self,
        query: &str,
        catalog: &dyn CatalogService,
        store: &mut dyn KeyValueStore,
    ) -> Result<SearchOutcome, NoticeError> {
        let Some(ticket) = self.begin_search(query, store) else {
            return Ok(SearchOutcome::Cleared);
        };
        let response = catalog.search(self.query.trim(), self.media_filter);
        self.complete_search(ticket, response)
    }

    /// Records the query and marks a request as in flight. Returns `None` for a
    /// blank query, which clears the current results instead.
    pub fn begin_search(
        &mut self,
        query: &str,
        store: &mut dyn KeyValueStore,
    ) -> Option<SearchTicket> {
        self.query = query.to_string();
        self.latest_ticket += 1;
        if query.trim().is_empty() {
            self.clear_results();
            self.loading = false;
            return None;
        }

        self.history.record(query);
        if let Err(err) = self.history.save(store) {
            tracing::warn!(error = %format!("{err:#}"), "failed to save search history");
        }

        self.loading = true;
        self.clear_results();
        tracing::info!(query, media = ?self.media_filter, "search started");
        Some(SearchTicket(self.latest_ticket))
    }

    pub fn complete_search(
        &mut self,
        ticket: SearchTicket,
        response: anyhow::Result<Vec<SearchItem>>,
    ) -> Result<SearchOutcome, NoticeError> {
        if ticket.0 != self.latest_ticket {
            tracing::debug!(
                ticket = ticket.0,
                latest = self.latest_ticket,
                "dropping stale search response"
            );
            return Ok(SearchOutcome::Stale);
        }
        self.loading = false;

        match response {
            Ok(items) => {
                self.replace_results(items);
                if self.results.is_empty() {
                    tracing::info!(query = %self.query, "no results");
                }
                Ok(SearchOutcome::Loaded(self.results.len()))
            }
            Err(err) => {
                tracing::warn!(query = %self.query, error = %format!("{err:#}"), "search failed");
                self.clear_results();
                Err(NoticeError::search(&err))
            }
        }
    }

    /// Changes the media scope. Returns true when the current query should be searched again.
    pub fn set_media_filter(&mut self, filter: MediaFilter) -> bool {
        let changed = self.media_filter != filter;
        self.media_filter = filter;
        changed && !self.query.trim().is_empty()
    }

    pub fn toggle_genre_facet(&mut self, genre: &str) {
        self.active_genres.toggle(genre);
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort_mode = mode;
    }

    /// The list the user sees: facet filter first, then the active ordering.
    /// Always recomputed from the raw results.
    pub fn filtered_view(&self) -> Vec<SearchItem> {
        let filter_active = !self.active_genres.is_all() && !self.available_genres.is_empty();
        let mut view: Vec<SearchItem> = self
            .results
            .iter()
            .filter(|item| {
                !filter_active
                    || item
                        .genre
                        .as_deref()
                        .is_some_and(|genre| self.active_genres.contains(genre))
            })
            .cloned()
            .collect();

        match self.sort_mode {
            SortMode::Original => {
                view.sort_by_key(|item| {
                    self.original_positions
                        .get(&item.id)
                        .copied()
                        .unwrap_or(usize::MAX)
                });
            }
            SortMode::CollectionName => {
                view.sort_by_cached_key(|item| {
                    collation_key(
                        item.collection_name
                            .as_deref()
                            .unwrap_or(MISSING_COLLECTION_NAME),
                    )
                });
            }
            SortMode::Price => {
                view.sort_by(|a, b| a.price.unwrap_or(0.0).total_cmp(&b.price.unwrap_or(0.0)));
            }
        }
        view
    }

    pub fn results(&self) -> &[SearchItem] {
        &self.results
    }

    pub fn available_genres(&self) -> &BTreeSet<String> {
        &self.available_genres
    }

    pub fn active_genres(&self) -> &GenreSelection {
        &self.active_genres
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    pub fn media_filter(&self) -> MediaFilter {
        self.media_filter
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    fn replace_results(&mut self, items: Vec<SearchItem>) {
        let mut positions = HashMap::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            positions.entry(item.id).or_insert(index);
        }
        self.available_genres = items
            .iter()
            .filter_map(|item| item.genre.clone())
            .filter(|genre| !genre.is_empty())
            .collect();
        self.original_positions = positions;
        self.results = items;
        self.reset_view_options();
    }

    fn clear_results(&mut self) {
        self.results.clear();
        self.original_positions.clear();
        self.available_genres.clear();
        self.reset_view_options();
    }

    fn reset_view_options(&mut self) {
        self.active_genres = GenreSelection::All;
        self.sort_mode = SortMode::Original;
    }
}

/// Case- and accent-insensitive ordering key.
fn collation_key(value: &str) -> String {
    value
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .collect()
}
