use crate::audio::{AudioDevice, NullAudioDevice, RodioAudioDevice};
use crate::catalog::{CatalogService, ItunesCatalog};
use crate::config::{self, JsonFileStore, KeyValueStore, Settings};
use crate::engine::PlaybackEngine;
use crate::error::NoticeError;
use crate::favorites::FavoritesList;
use crate::history::SearchHistory;
use crate::model::{Direction, MediaFilter, PlaybackState, SearchItem, SortMode};
use crate::pipeline::{ResultPipeline, SearchOutcome, SearchTicket};
use anyhow::Result;
use std::io::{BufRead, Write, stdin, stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type SearchReply = (SearchTicket, anyhow::Result<Vec<SearchItem>>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Everything a presentation layer needs: results, playback, favorites, history.
pub struct App<D: AudioDevice> {
    pub pipeline: ResultPipeline,
    pub engine: PlaybackEngine<D>,
    pub favorites: FavoritesList,
    pub status: String,
    store: Box<dyn KeyValueStore>,
    catalog: Arc<dyn CatalogService + Send + Sync>,
    search_tx: Sender<SearchReply>,
    search_rx: Receiver<SearchReply>,
    output: Vec<String>,
}

impl<D: AudioDevice> App<D> {
    pub fn new(
        settings: &Settings,
        device: D,
        store: Box<dyn KeyValueStore>,
        catalog: Arc<dyn CatalogService + Send + Sync>,
    ) -> Self {
        let history = SearchHistory::load(store.as_ref());
        let favorites = FavoritesList::load(store.as_ref());
        let engine = PlaybackEngine::new(
            device,
            settings.volume_percent,
            Duration::from_millis(settings.tick_millis),
        );
        Self::from_parts(settings, engine, favorites, history, store, catalog)
    }

    pub fn from_parts(
        settings: &Settings,
        engine: PlaybackEngine<D>,
        favorites: FavoritesList,
        history: SearchHistory,
        store: Box<dyn KeyValueStore>,
        catalog: Arc<dyn CatalogService + Send + Sync>,
    ) -> Self {
        let (search_tx, search_rx) = mpsc::channel();
        Self {
            pipeline: ResultPipeline::new(history, settings.media_filter),
            engine,
            favorites,
            status: String::from("Ready"),
            store,
            catalog,
            search_tx,
            search_rx,
            output: Vec::new(),
        }
    }

    pub fn run_command(&mut self, input: &str) -> Flow {
        let input = input.trim();
        let (command, arg) = match input.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (input, ""),
        };

        match command {
            "" => {}
            "q" | "quit" | "exit" => return Flow::Quit,
            "help" | "?" => self.print_help(),
            "s" | "search" => self.start_search(arg),
            "media" => match arg.parse::<MediaFilter>() {
                Ok(filter) => {
                    if self.pipeline.set_media_filter(filter) {
                        let query = self.pipeline.query().to_string();
                        self.start_search(&query);
                    } else {
                        self.set_status(&format!("Media: {filter:?}"));
                    }
                }
                Err(err) => self.set_status(&format!("{err:#}")),
            },
            "genre" | "g" => {
                if arg.is_empty() {
                    self.print_genres();
                } else {
                    self.pipeline.toggle_genre_facet(arg);
                    let active = self.pipeline.active_genres().active().join(", ");
                    self.set_status(&format!("Genres: {active}"));
                }
            }
            "sort" => match arg.parse::<SortMode>() {
                Ok(mode) => {
                    self.pipeline.set_sort_mode(mode);
                    self.set_status(&format!("Sorted by {}", mode.label()));
                }
                Err(_) if arg.is_empty() => {
                    let mode = self.pipeline.sort_mode().next();
                    self.pipeline.set_sort_mode(mode);
                    self.set_status(&format!("Sorted by {}", mode.label()));
                }
                Err(err) => self.set_status(&format!("{err:#}")),
            },
            "l" | "ls" | "list" => self.print_results(),
            "p" | "play" => {
                if let Some(item) = self.view_item(arg) {
                    let result = self.engine.activate(&item);
                    self.report(result);
                }
            }
            "space" | "pause" | "toggle" => {
                let result = self.engine.toggle_play();
                self.report(result);
            }
            "n" | "next" => {
                let view = self.pipeline.filtered_view();
                let result = self.engine.advance(Direction::Next, &view);
                self.report(result);
            }
            "prev" | "previous" => {
                let view = self.pipeline.filtered_view();
                let result = self.engine.advance(Direction::Previous, &view);
                self.report(result);
            }
            "shuffle" => {
                let view = self.pipeline.filtered_view();
                let result = self.engine.shuffle(&view);
                self.report(result);
            }
            "repeat" => {
                self.engine.toggle_repeat();
                let state = if self.engine.is_repeat_on() { "on" } else { "off" };
                self.set_status(&format!("Repeat {state}"));
            }
            "stop" => {
                self.engine.stop();
                self.set_status("Stopped");
            }
            "vol" | "volume" => match arg.parse::<i32>() {
                Ok(percent) => {
                    self.engine.set_volume(percent);
                    let volume = self.engine.volume_percent();
                    self.set_status(&format!("Volume: {volume}%"));
                }
                Err(_) => self.set_status("volume expects a number from 0 to 100"),
            },
            "fav" => {
                if let Some(item) = self.view_item(arg) {
                    let added = self.favorites.toggle(&item);
                    self.save_favorites();
                    let verb = if added { "Added" } else { "Removed" };
                    self.set_status(&format!("{verb} favorite: {}", item.label()));
                }
            }
            "favs" | "favorites" => self.print_favorites(),
            "unfav" => match parse_index(arg).and_then(|index| self.favorites.remove(index)) {
                Some(item) => {
                    self.save_favorites();
                    self.set_status(&format!("Removed favorite: {}", item.label()));
                }
                None => self.set_status("No such favorite"),
            },
            "playfav" => match parse_index(arg).and_then(|index| self.favorites.get(index).cloned()) {
                Some(item) => {
                    let result = self.engine.activate(&item);
                    self.report(result);
                }
                None => self.set_status("No such favorite"),
            },
            "h" | "history" => {
                if arg.is_empty() {
                    self.print_history();
                } else {
                    match parse_index(arg).and_then(|index| self.pipeline.history.get(index)) {
                        Some(query) => {
                            let query = query.to_string();
                            self.start_search(&query);
                        }
                        None => self.set_status("No such history entry"),
                    }
                }
            }
            "forget" => match parse_index(arg).and_then(|index| self.pipeline.history.remove(index)) {
                Some(query) => {
                    if let Err(err) = self.pipeline.history.save(self.store.as_mut()) {
                        tracing::warn!(error = %format!("{err:#}"), "failed to save search history");
                    }
                    self.set_status(&format!("Forgot \"{query}\""));
                }
                None => self.set_status("No such history entry"),
            },
            "status" => self.print_now_playing(),
            other => self.set_status(&format!("unknown command {other}, try help")),
        }
        Flow::Continue
    }

    /// Delivers finished searches, advances the progress clock and drains device events.
    pub fn pump(&mut self, elapsed: Duration) {
        let state_before = self.engine.state();
        while let Ok((ticket, response)) = self.search_rx.try_recv() {
            self.finish_search(ticket, response);
        }

        if self.engine.is_playing() {
            let view = self.pipeline.filtered_view();
            let before = self.engine.current().map(|item| item.id);
            if let Err(err) = self.engine.update(elapsed, &view) {
                self.set_status(&err.to_string());
            }
            let after = self.engine.current().map(|item| item.id);
            if before != after && after.is_some() {
                self.print_now_playing();
            }
        }

        if let Err(err) = self.engine.poll_device() {
            self.set_status(&err.to_string());
        }
        let state = self.engine.state();
        if state == PlaybackState::Ended && state_before != PlaybackState::Ended {
            self.set_status("Preview ended");
        } else if state == PlaybackState::Playing && state_before == PlaybackState::Loading {
            let line = self.now_playing_line();
            self.set_status(&line);
        }
    }

    /// Blocks until the in-flight search (if any) has been applied.
    pub fn wait_for_search(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pipeline.is_loading() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.search_rx.recv_timeout(remaining) {
                Ok((ticket, response)) => self.finish_search(ticket, response),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn start_search(&mut self, query: &str) {
        let Some(ticket) = self.pipeline.begin_search(query, self.store.as_mut()) else {
            self.set_status("Cleared results");
            return;
        };
        let catalog = Arc::clone(&self.catalog);
        let tx = self.search_tx.clone();
        let query = query.trim().to_string();
        let media = self.pipeline.media_filter();
        let worker_query = query.clone();
        thread::spawn(move || {
            let response = catalog.search(&worker_query, media);
            let _ = tx.send((ticket, response));
        });
        self.set_status(&format!("Searching for \"{}\"...", query.trim()));
    }

    fn finish_search(&mut self, ticket: SearchTicket, response: anyhow::Result<Vec<SearchItem>>) {
        match self.pipeline.complete_search(ticket, response) {
            Ok(SearchOutcome::Loaded(0)) => self.set_status("No results found"),
            Ok(SearchOutcome::Loaded(count)) => {
                self.set_status(&format!("{count} results"));
                self.print_results();
            }
            Ok(SearchOutcome::Cleared | SearchOutcome::Stale) => {}
            Err(err) => self.set_status(&err.to_string()),
        }
    }

    fn view_item(&mut self, arg: &str) -> Option<SearchItem> {
        let item = parse_index(arg).and_then(|index| self.pipeline.filtered_view().get(index).cloned());
        if item.is_none() {
            self.set_status("No such result, use list to see numbers");
        }
        item
    }

    fn report(&mut self, result: Result<(), NoticeError>) {
        match result {
            Ok(()) => {
                let line = self.now_playing_line();
                self.set_status(&line);
            }
            Err(err) => self.set_status(&err.to_string()),
        }
    }

    fn save_favorites(&mut self) {
        if let Err(err) = self.favorites.save(self.store.as_mut()) {
            tracing::warn!(error = %format!("{err:#}"), "failed to save favorites");
            self.set_status(&format!("save error: {err:#}"));
        }
    }

    fn now_playing_line(&self) -> String {
        let Some(item) = self.engine.current() else {
            return String::from("Nothing playing");
        };
        let state = match self.engine.state() {
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Loading => "Loading",
            PlaybackState::Ended => "Ended",
            PlaybackState::Idle => "Idle",
        };
        let repeat = if self.engine.is_repeat_on() { " [repeat]" } else { "" };
        format!(
            "{state}: {} {:>3.0}% vol {}%{repeat}",
            item.label(),
            self.engine.progress_percent(),
            self.engine.volume_percent()
        )
    }

    fn print_now_playing(&mut self) {
        let line = self.now_playing_line();
        self.output.push(line);
    }

    fn print_results(&mut self) {
        let view = self.pipeline.filtered_view();
        if view.is_empty() {
            self.output.push(String::from("(no results)"));
            return;
        }
        for (index, item) in view.iter().enumerate() {
            let marker = if self.engine.is_current(item) { '>' } else { ' ' };
            let favorite = if self.favorites.contains(item) { '*' } else { ' ' };
            let preview = if item.has_preview() { "" } else { " (no preview)" };
            let price = item.price.map(|p| format!(" ${p:.2}")).unwrap_or_default();
            self.output.push(format!(
                "{marker}{favorite}{:>3}. {} [{}] {}{price}{preview}",
                index + 1,
                item.label(),
                item.genre.as_deref().unwrap_or("-"),
                item.collection_name.as_deref().unwrap_or(""),
            ));
        }
    }

    fn print_genres(&mut self) {
        let genres: Vec<String> = self
            .pipeline
            .available_genres()
            .iter()
            .map(|genre| {
                if self.pipeline.active_genres().contains(genre) {
                    format!("[{genre}]")
                } else {
                    genre.clone()
                }
            })
            .collect();
        let all = if self.pipeline.active_genres().is_all() { "[all]" } else { "all" };
        self.output.push(format!("{all} {}", genres.join(" ")));
    }

    fn print_favorites(&mut self) {
        if self.favorites.is_empty() {
            self.output.push(String::from("(no favorites)"));
            return;
        }
        let lines: Vec<String> = self
            .favorites
            .items()
            .iter()
            .enumerate()
            .map(|(index, item)| format!("{:>3}. {}", index + 1, item.label()))
            .collect();
        self.output.extend(lines);
    }

    fn print_history(&mut self) {
        let lines: Vec<String> = self
            .pipeline
            .history
            .top_five()
            .iter()
            .enumerate()
            .map(|(index, query)| format!("{:>3}. {query}", index + 1))
            .collect();
        if lines.is_empty() {
            self.output.push(String::from("(no history)"));
        }
        self.output.extend(lines);
    }

    fn print_help(&mut self) {
        for line in [
            "search <terms>      search the catalog (blank clears)",
            "media <type>        all, music, movie, podcast, musicvideo, audiobook, ...",
            "genre [name|all]    list or toggle genre facets",
            "sort [mode]         original, collection, price",
            "list                show results",
            "play <n>            play or pause result n",
            "pause               toggle play/pause",
            "next | prev         skip forward or restart",
            "shuffle | repeat    random pick / toggle repeat",
            "stop                stop playback",
            "volume <0-100>      set volume",
            "fav <n> | favs      toggle result n as favorite / list favorites",
            "unfav <n>           remove favorite n",
            "playfav <n>         play favorite n",
            "history [n]         show recent searches / rerun one",
            "forget <n>          delete history entry n",
            "quit",
        ] {
            self.output.push(line.to_string());
        }
    }

    fn set_status(&mut self, message: &str) {
        self.status = message.to_string();
        self.output.push(self.status.clone());
    }
}

/// Parses a 1-based position typed by the user.
fn parse_index(arg: &str) -> Option<usize> {
    arg.parse::<usize>().ok()?.checked_sub(1)
}

#[derive(Debug, Clone, Default)]
pub struct AppStartupOptions {
    pub config_dir: Option<PathBuf>,
    pub media_filter: Option<MediaFilter>,
}

pub fn run_with_startup(options: AppStartupOptions) -> Result<()> {
    let root = match options.config_dir {
        Some(root) => root,
        None => config::config_root()?,
    };
    let mut settings = config::load_settings(&root)?;
    if !config::settings_path(&root).exists() {
        config::save_settings(&root, &settings)?;
    }
    if let Some(media_filter) = options.media_filter {
        settings.media_filter = media_filter;
    }
    let store = JsonFileStore::open(&root)?;
    tracing::info!(store = %store.path().display(), "state store opened");
    let catalog = ItunesCatalog::new(&settings.catalog_url, settings.result_limit)?;

    let device: Box<dyn AudioDevice> = match RodioAudioDevice::new() {
        Ok(device) => Box::new(device),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "no audio output, previews will be silent");
            Box::new(NullAudioDevice::new())
        }
    };

    let mut app = App::new(&settings, device, Box::new(store), Arc::new(catalog));
    let lines = spawn_stdin_reader();
    let mut last_pump = Instant::now();

    println!("tunepeek - type help for commands");
    prompt()?;

    loop {
        let received = lines.recv_timeout(POLL_INTERVAL);
        app.pump(last_pump.elapsed());

        match received {
            Ok(line) => {
                flush_output(&mut app);
                if app.run_command(&line) == Flow::Quit {
                    break;
                }
                flush_output(&mut app);
                prompt()?;
            }
            Err(RecvTimeoutError::Timeout) => {
                let pending = app.take_output();
                if !pending.is_empty() {
                    println!();
                    for line in pending {
                        println!("{line}");
                    }
                    prompt()?;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        // time spent inside a command is not playback time
        last_pump = Instant::now();
    }

    app.engine.stop();
    Ok(())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn flush_output<D: AudioDevice>(app: &mut App<D>) {
    for line in app.take_output() {
        println!("{line}");
    }
}

fn prompt() -> Result<()> {
    let mut out = stdout();
    write!(out, "> ")?;
    out.flush()?;
    Ok(())
}
