use crate::config::{self, KeyValueStore};
use anyhow::Result;

pub const HISTORY_KEY: &str = "searchHistory";
const VISIBLE_ENTRIES: usize = 5;

/// Past queries, most recent first. Storage is unbounded; only the display is capped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchHistory {
    entries: Vec<String>,
}

impl SearchHistory {
    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn load(store: &dyn KeyValueStore) -> Self {
        Self::from_entries(config::load_json_or_default(store, HISTORY_KEY))
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<()> {
        config::save_json(store, HISTORY_KEY, &self.entries)
    }

    /// Moves `query` to the front, dropping any earlier copy of it.
    pub fn record(&mut self, query: &str) {
        if let Some(index) = self.entries.iter().position(|entry| entry == query) {
            self.entries.remove(index);
        }
        self.entries.insert(0, query.to_string());
    }

    pub fn remove(&mut self, index: usize) -> Option<String> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn top_five(&self) -> &[String] {
        &self.entries[..self.entries.len().min(VISIBLE_ENTRIES)]
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
