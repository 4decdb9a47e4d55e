use crate::model::{ItemId, MediaFilter, SearchItem};
use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Remote catalog lookup. Any transport or decode problem is an error.
pub trait CatalogService {
    fn search(&self, query: &str, media: MediaFilter) -> Result<Vec<SearchItem>>;
}

pub struct ItunesCatalog {
    client: Client,
    base_url: String,
    limit: u16,
}

impl ItunesCatalog {
    pub fn new(base_url: &str, limit: u16) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tunepeek/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build catalog http client")?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            limit,
        })
    }
}

impl CatalogService for ItunesCatalog {
    fn search(&self, query: &str, media: MediaFilter) -> Result<Vec<SearchItem>> {
        let url = search_url(&self.base_url, query, media, self.limit)?;
        tracing::debug!(%url, "catalog request");

        let response: SearchResponse = self
            .client
            .get(url)
            .send()
            .context("catalog request failed")?
            .error_for_status()
            .context("catalog returned an error status")?
            .json()
            .context("failed to decode catalog response")?;

        Ok(response.into_items())
    }
}

pub fn search_url(base_url: &str, query: &str, media: MediaFilter, limit: u16) -> Result<Url> {
    let limit = limit.to_string();
    let mut params = vec![("term", query), ("limit", limit.as_str())];
    if let Some(media) = media.as_query() {
        params.push(("media", media));
    }
    Url::parse_with_params(base_url, &params)
        .with_context(|| format!("invalid catalog url {base_url}"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawRecord>,
}

impl SearchResponse {
    fn into_items(self) -> Vec<SearchItem> {
        let total = self.results.len();
        let items: Vec<SearchItem> = self
            .results
            .into_iter()
            .filter_map(RawRecord::into_item)
            .collect();
        if items.len() != total {
            tracing::debug!(
                dropped = total - items.len(),
                "skipped catalog records without identifier"
            );
        }
        items
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    track_id: Option<u64>,
    collection_id: Option<u64>,
    artist_id: Option<u64>,
    track_name: Option<String>,
    collection_name: Option<String>,
    artist_name: Option<String>,
    primary_genre_name: Option<String>,
    preview_url: Option<String>,
    track_price: Option<f64>,
    artwork_url100: Option<String>,
}

impl RawRecord {
    fn into_item(self) -> Option<SearchItem> {
        let id = match (self.track_id, self.collection_id, self.artist_id) {
            (Some(id), _, _) => ItemId::Track(id),
            (None, Some(id), _) => ItemId::Collection(id),
            (None, None, Some(id)) => ItemId::Artist(id),
            (None, None, None) => return None,
        };
        let title = self
            .track_name
            .clone()
            .or_else(|| self.collection_name.clone())
            .or_else(|| self.artist_name.clone())
            .unwrap_or_else(|| String::from("Untitled"));

        Some(SearchItem {
            id,
            title,
            artist: non_empty(self.artist_name),
            genre: non_empty(self.primary_genre_name),
            preview_url: non_empty(self.preview_url),
            collection_id: self.collection_id,
            collection_name: non_empty(self.collection_name),
            price: self.track_price,
            artwork_url: non_empty(self.artwork_url100),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
