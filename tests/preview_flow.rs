use std::time::Duration;
use tunepeek::audio::{AudioDevice, NullAudioDevice};
use tunepeek::catalog::CatalogService;
use tunepeek::config::{JsonFileStore, MemoryStore};
use tunepeek::engine::{PREVIEW_TICKS, PlaybackEngine};
use tunepeek::error::NoticeError;
use tunepeek::favorites::FavoritesList;
use tunepeek::history::SearchHistory;
use tunepeek::model::{Direction, ItemId, MediaFilter, PlaybackState, SearchItem, SortMode};
use tunepeek::pipeline::{ResultPipeline, SearchOutcome};

struct CannedCatalog(Vec<SearchItem>);

impl CatalogService for CannedCatalog {
    fn search(&self, _query: &str, _media: MediaFilter) -> anyhow::Result<Vec<SearchItem>> {
        Ok(self.0.clone())
    }
}

struct BrokenCatalog;

impl CatalogService for BrokenCatalog {
    fn search(&self, _query: &str, _media: MediaFilter) -> anyhow::Result<Vec<SearchItem>> {
        anyhow::bail!("connection reset")
    }
}

fn track(id: u64, genre: &str, preview: bool) -> SearchItem {
    SearchItem {
        id: ItemId::Track(id),
        title: format!("track {id}"),
        artist: Some(String::from("someone")),
        genre: Some(genre.to_string()),
        preview_url: preview.then(|| format!("https://previews/{id}.m4a")),
        collection_id: Some(100 + id),
        collection_name: Some(format!("album {id}")),
        price: Some(id as f64),
        artwork_url: None,
    }
}

fn engine() -> PlaybackEngine<NullAudioDevice> {
    PlaybackEngine::seeded(NullAudioDevice::new(), 70, Duration::from_secs(1), 11)
}

#[test]
fn genre_facets_narrow_the_view() {
    let catalog = CannedCatalog(vec![
        track(1, "Pop", true),
        track(2, "Pop", true),
        track(3, "Rock", true),
    ]);
    let mut store = MemoryStore::new();
    let mut pipeline = ResultPipeline::new(SearchHistory::default(), MediaFilter::Music);

    let outcome = pipeline.search_for("abc", &catalog, &mut store).expect("search");
    assert_eq!(outcome, SearchOutcome::Loaded(3));
    assert_eq!(
        pipeline.available_genres().iter().cloned().collect::<Vec<_>>(),
        ["Pop", "Rock"]
    );

    pipeline.toggle_genre_facet("Pop");
    assert_eq!(pipeline.filtered_view().len(), 2);
}

#[test]
fn advancing_through_an_empty_view_stays_idle() {
    let mut engine = engine();
    assert!(engine.advance(Direction::Next, &[]).is_ok());
    assert_eq!(engine.state(), PlaybackState::Idle);
    assert_eq!(engine.device().play_count(), 0);
}

#[test]
fn shuffle_over_silent_items_gives_up() {
    let view = vec![track(1, "Pop", false), track(2, "Pop", false), track(3, "Pop", false)];
    let mut engine = engine();

    assert_eq!(engine.shuffle(&view), Err(NoticeError::NoPreviewAvailable));
    assert_eq!(engine.device().play_count(), 0);
    assert_eq!(engine.state(), PlaybackState::Idle);
}

#[test]
fn preview_runs_out_and_moves_to_the_next_item() {
    let view = vec![track(1, "Pop", true), track(2, "Pop", true)];
    let mut engine = engine();
    engine.play(&view[0]).expect("play");

    for _ in 0..PREVIEW_TICKS - 1 {
        engine.on_tick(&view).expect("tick");
    }
    assert_eq!(engine.current().map(|item| item.id), Some(ItemId::Track(1)));

    engine.on_tick(&view).expect("last tick");
    assert_eq!(engine.current().map(|item| item.id), Some(ItemId::Track(2)));
    assert_eq!(engine.state(), PlaybackState::Playing);
    assert_eq!(engine.progress_percent(), 0.0);
}

#[test]
fn repeated_search_moves_to_front_of_history() {
    let mut store = MemoryStore::new();
    let history = SearchHistory::from_entries(vec![
        String::from("a"),
        String::from("b"),
        String::from("c"),
    ]);
    let mut pipeline = ResultPipeline::new(history, MediaFilter::Music);
    pipeline
        .search_for("b", &CannedCatalog(Vec::new()), &mut store)
        .expect("search");

    assert_eq!(pipeline.history.entries(), ["b", "a", "c"]);
    assert_eq!(SearchHistory::load(&store).entries(), ["b", "a", "c"]);
}

#[test]
fn failed_search_clears_previous_results() {
    let mut store = MemoryStore::new();
    let mut pipeline = ResultPipeline::new(SearchHistory::default(), MediaFilter::Music);
    pipeline
        .search_for("abc", &CannedCatalog(vec![track(1, "Pop", true)]), &mut store)
        .expect("search");

    let err = pipeline
        .search_for("abc", &BrokenCatalog, &mut store)
        .expect_err("should fail");
    assert!(matches!(err, NoticeError::SearchFailure(_)));
    assert!(pipeline.results().is_empty());
    assert!(!pipeline.is_loading());
}

#[test]
fn sorting_by_price_then_back_to_original() {
    let catalog = CannedCatalog(vec![track(3, "Pop", true), track(1, "Pop", true), track(2, "Pop", true)]);
    let mut store = MemoryStore::new();
    let mut pipeline = ResultPipeline::new(SearchHistory::default(), MediaFilter::Music);
    pipeline.search_for("abc", &catalog, &mut store).expect("search");

    pipeline.set_sort_mode(SortMode::Price);
    let ids: Vec<ItemId> = pipeline.filtered_view().iter().map(|item| item.id).collect();
    assert_eq!(ids, [ItemId::Track(1), ItemId::Track(2), ItemId::Track(3)]);

    pipeline.set_sort_mode(SortMode::Original);
    let ids: Vec<ItemId> = pipeline.filtered_view().iter().map(|item| item.id).collect();
    assert_eq!(ids, [ItemId::Track(3), ItemId::Track(1), ItemId::Track(2)]);
}

#[test]
fn state_survives_a_restart_on_disk() {
    let temp = tempfile::tempdir().expect("tempdir");

    {
        let mut store = JsonFileStore::open(temp.path()).expect("open");
        let mut pipeline = ResultPipeline::new(SearchHistory::load(&store), MediaFilter::Music);
        pipeline
            .search_for("daft punk", &CannedCatalog(vec![track(7, "Electronic", true)]), &mut store)
            .expect("search");

        let mut favorites = FavoritesList::load(&store);
        assert!(favorites.toggle(&pipeline.filtered_view()[0]));
        favorites.save(&mut store).expect("save favorites");
    }

    let store = JsonFileStore::open(temp.path()).expect("reopen");
    assert_eq!(SearchHistory::load(&store).entries(), ["daft punk"]);
    let favorites = FavoritesList::load(&store);
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites.items()[0].id, ItemId::Track(7));
}

#[test]
fn boxed_device_drives_the_engine() {
    let device: Box<dyn AudioDevice> = Box::new(NullAudioDevice::new());
    let mut engine = PlaybackEngine::seeded(device, 50, Duration::from_millis(10), 1);
    let item = track(1, "Pop", true);

    engine.play(&item).expect("play");
    engine.update(Duration::from_millis(150), &[item.clone()]).expect("update");
    assert_eq!(engine.progress_percent(), 50.0);

    engine.toggle_play().expect("pause");
    assert_eq!(engine.state(), PlaybackState::Paused);
    engine.stop();
    assert_eq!(engine.state(), PlaybackState::Idle);
}
