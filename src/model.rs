use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Facet value that stands for "no genre filtering".
pub const ALL_GENRES: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemId {
    Track(u64),
    Collection(u64),
    Artist(u64),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track(id) => write!(f, "track:{id}"),
            Self::Collection(id) => write!(f, "collection:{id}"),
            Self::Artist(id) => write!(f, "artist:{id}"),
        }
    }
}

/// One catalog record. Never mutated after it arrives from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub collection_id: Option<u64>,
    #[serde(default)]
    pub collection_name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

impl SearchItem {
    pub fn has_preview(&self) -> bool {
        self.preview_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    pub fn label(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} - {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaFilter {
    All,
    #[default]
    Music,
    Movie,
    Podcast,
    MusicVideo,
    Audiobook,
    ShortFilm,
    TvShow,
    Software,
    Ebook,
}

impl MediaFilter {
    /// Value of the `media` query parameter, `None` when every media type is wanted.
    pub fn as_query(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Music => Some("music"),
            Self::Movie => Some("movie"),
            Self::Podcast => Some("podcast"),
            Self::MusicVideo => Some("musicVideo"),
            Self::Audiobook => Some("audiobook"),
            Self::ShortFilm => Some("shortFilm"),
            Self::TvShow => Some("tvShow"),
            Self::Software => Some("software"),
            Self::Ebook => Some("ebook"),
        }
    }
}

impl FromStr for MediaFilter {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let filter = match value.trim().to_ascii_lowercase().as_str() {
            "all" => Self::All,
            "music" => Self::Music,
            "movie" => Self::Movie,
            "podcast" => Self::Podcast,
            "musicvideo" => Self::MusicVideo,
            "audiobook" => Self::Audiobook,
            "shortfilm" => Self::ShortFilm,
            "tvshow" => Self::TvShow,
            "software" => Self::Software,
            "ebook" => Self::Ebook,
            other => anyhow::bail!("unknown media filter {other}"),
        };
        Ok(filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Original,
    CollectionName,
    Price,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            Self::Original => Self::CollectionName,
            Self::CollectionName => Self::Price,
            Self::Price => Self::Original,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::CollectionName => "collection",
            Self::Price => "price",
        }
    }
}

impl FromStr for SortMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "collection" | "collectionname" => Ok(Self::CollectionName),
            "price" => Ok(Self::Price),
            other => anyhow::bail!("unknown sort mode {other}"),
        }
    }
}

/// Active genre facets. `Only` is never empty, so the selection as a whole
/// can never be empty either.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GenreSelection {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl GenreSelection {
    pub fn toggle(&mut self, genre: &str) {
        if genre == ALL_GENRES {
            *self = Self::All;
            return;
        }

        match self {
            Self::All => {
                *self = Self::Only(BTreeSet::from([genre.to_string()]));
            }
            Self::Only(active) => {
                if !active.remove(genre) {
                    active.insert(genre.to_string());
                }
                if active.is_empty() {
                    *self = Self::All;
                }
            }
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn contains(&self, genre: &str) -> bool {
        match self {
            Self::All => genre == ALL_GENRES,
            Self::Only(active) => active.contains(genre),
        }
    }

    /// Selected facet values, with the sentinel standing in for `All`.
    pub fn active(&self) -> Vec<&str> {
        match self {
            Self::All => vec![ALL_GENRES],
            Self::Only(active) => active.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    /// Device reported end of media with repeat off. The item and progress are kept.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selecting_sentinel_clears_concrete_genres() {
        let mut selection = GenreSelection::default();
        selection.toggle("Pop");
        selection.toggle("Rock");
        assert_eq!(selection.active(), vec!["Pop", "Rock"]);

        selection.toggle(ALL_GENRES);
        assert!(selection.is_all());
    }

    #[test]
    fn deselecting_last_genre_restores_sentinel() {
        let mut selection = GenreSelection::default();
        selection.toggle("Pop");
        assert!(!selection.is_all());
        selection.toggle("Pop");
        assert_eq!(selection, GenreSelection::All);
        assert_eq!(selection.active(), vec![ALL_GENRES]);
    }

    #[test]
    fn media_filter_all_has_no_query_value() {
        assert_eq!(MediaFilter::All.as_query(), None);
        assert_eq!(MediaFilter::MusicVideo.as_query(), Some("musicVideo"));
        assert_eq!(
            "tvshow".parse::<MediaFilter>().expect("parse"),
            MediaFilter::TvShow
        );
    }

    #[test]
    fn sort_mode_cycles_back_to_original() {
        let mode = SortMode::Original.next().next().next();
        assert_eq!(mode, SortMode::Original);
    }

    proptest::proptest! {
        #[test]
        fn selection_is_never_empty(ops in proptest::collection::vec(0usize..4, 0..100)) {
            let genres = [ALL_GENRES, "Pop", "Rock", "Jazz"];
            let mut selection = GenreSelection::default();
            for op in ops {
                selection.toggle(genres[op]);
                proptest::prop_assert!(!selection.active().is_empty());
                if let GenreSelection::Only(active) = &selection {
                    proptest::prop_assert!(!active.is_empty());
                    proptest::prop_assert!(!active.contains(ALL_GENRES));
                }
            }
        }
    }
}
