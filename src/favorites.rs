use crate::config::{self, KeyValueStore};
use crate::model::SearchItem;
use anyhow::Result;

pub const FAVORITES_KEY: &str = "favorites";

/// Saved items in insertion order, at most one entry per item id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FavoritesList {
    items: Vec<SearchItem>,
}

impl FavoritesList {
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let mut items: Vec<SearchItem> = config::load_json_or_default(store, FAVORITES_KEY);
        let mut seen = std::collections::HashSet::new();
        items.retain(|item| seen.insert(item.id));
        Self { items }
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<()> {
        config::save_json(store, FAVORITES_KEY, &self.items)
    }

    /// Adds the item, or removes it when already saved. Returns whether it is now a favorite.
    pub fn toggle(&mut self, item: &SearchItem) -> bool {
        match self.position(item) {
            Some(index) => {
                self.items.remove(index);
                false
            }
            None => {
                self.items.push(item.clone());
                true
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<SearchItem> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn contains(&self, item: &SearchItem) -> bool {
        self.position(item).is_some()
    }

    pub fn get(&self, index: usize) -> Option<&SearchItem> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[SearchItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, item: &SearchItem) -> Option<usize> {
        self.items.iter().position(|saved| saved.id == item.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::model::ItemId;

    fn item(id: u64) -> SearchItem {
        SearchItem {
            id: ItemId::Track(id),
            title: format!("track {id}"),
            artist: None,
            genre: None,
            preview_url: None,
            collection_id: Some(7),
            collection_name: None,
            price: None,
            artwork_url: None,
        }
    }

    #[test]
    fn toggle_twice_restores_original_list() {
        let mut favorites = FavoritesList::default();
        favorites.toggle(&item(1));
        favorites.toggle(&item(2));
        let before = favorites.clone();

        assert!(favorites.toggle(&item(3)));
        assert!(!favorites.toggle(&item(3)));
        assert_eq!(favorites, before);

        assert!(!favorites.toggle(&item(1)));
        assert!(favorites.toggle(&item(1)));
        assert_eq!(
            favorites.items().iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![ItemId::Track(2), ItemId::Track(1)]
        );
    }

    #[test]
    fn shared_collection_does_not_make_items_equal() {
        let mut favorites = FavoritesList::default();
        favorites.toggle(&item(1));
        favorites.toggle(&item(2));
        assert_eq!(favorites.len(), 2);
        assert!(favorites.contains(&item(1)));
    }

    #[test]
    fn load_drops_duplicate_ids() {
        let mut store = MemoryStore::new();
        config::save_json(&mut store, FAVORITES_KEY, &vec![item(1), item(1), item(2)])
            .expect("save");
        let favorites = FavoritesList::load(&store);
        assert_eq!(favorites.len(), 2);
    }

    #[test]
    fn remove_by_index() {
        let mut favorites = FavoritesList::default();
        favorites.toggle(&item(1));
        assert_eq!(favorites.remove(3), None);
        assert_eq!(favorites.remove(0).map(|i| i.id), Some(ItemId::Track(1)));
        assert!(favorites.is_empty());
    }
}
