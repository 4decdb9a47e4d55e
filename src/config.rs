use crate::model::MediaFilter;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "tunepeek";
const SETTINGS_FILE: &str = "settings.json";
const STORE_FILE: &str = "store.json";

pub const DEFAULT_CATALOG_URL: &str = "https://itunes.apple.com/search";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_result_limit")]
    pub result_limit: u16,
    #[serde(default)]
    pub media_filter: MediaFilter,
    #[serde(default = "default_volume_percent")]
    pub volume_percent: u8,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

fn default_catalog_url() -> String {
    String::from(DEFAULT_CATALOG_URL)
}

fn default_result_limit() -> u16 {
    50
}

fn default_volume_percent() -> u8 {
    70
}

fn default_tick_millis() -> u64 {
    1_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            result_limit: default_result_limit(),
            media_filter: MediaFilter::default(),
            volume_percent: default_volume_percent(),
            tick_millis: default_tick_millis(),
        }
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("TUNEPEEK_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn ensure_config_dir(root: &Path) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))
}

pub fn settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

pub fn load_settings(root: &Path) -> Result<Settings> {
    let path = settings_path(root);
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    Ok(settings)
}

pub fn save_settings(root: &Path, settings: &Settings) -> Result<()> {
    ensure_config_dir(root)?;
    let path = settings_path(root);
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// String-keyed, string-valued storage that outlives the process.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// All keys live in one JSON object file, rewritten on every `set`.
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(STORE_FILE);
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read store file {}", path.display()))?;
            match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "store file is corrupt, starting empty"
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            ensure_config_dir(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.writes += 1;
        Ok(())
    }
}

/// Reads a JSON value stored under `key`. A missing key or an unreadable
/// value yields the default; the latter is logged.
pub fn load_json_or_default<T>(store: &dyn KeyValueStore, key: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return T::default(),
        Err(err) => {
            tracing::warn!(key, error = %format!("{err:#}"), "failed to read stored value");
            return T::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding unparseable stored value");
            T::default()
        }
    }
}

pub fn save_json<T: Serialize>(store: &mut dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).with_context(|| format!("failed to encode {key}"))?;
    store.set(key, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn settings_save_and_load_round_trip() {
        let dir = tempdir().expect("tempdir");
        let settings = Settings {
            media_filter: MediaFilter::Podcast,
            volume_percent: 40,
            ..Settings::default()
        };
        save_settings(dir.path(), &settings).expect("save");
        let loaded = load_settings(dir.path()).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_settings_fields_use_defaults() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(SETTINGS_FILE), r#"{"result_limit": 10}"#).expect("write");
        let loaded = load_settings(dir.path()).expect("load");
        assert_eq!(loaded.result_limit, 10);
        assert_eq!(loaded.volume_percent, 70);
        assert_eq!(loaded.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(loaded.media_filter, MediaFilter::Music);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let mut store = JsonFileStore::open(dir.path()).expect("open");
        store.set("searchHistory", r#"["a","b"]"#).expect("set");

        let reopened = JsonFileStore::open(dir.path()).expect("reopen");
        assert_eq!(
            reopened.get("searchHistory").expect("get").as_deref(),
            Some(r#"["a","b"]"#)
        );
        assert_eq!(reopened.get("favorites").expect("get"), None);
    }

    #[test]
    fn corrupt_store_file_opens_empty_and_is_rewritten() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(STORE_FILE), "{\"favorites\": [").expect("write");

        let mut store = JsonFileStore::open(dir.path()).expect("open");
        assert_eq!(store.get("favorites").expect("get"), None);

        store.set("favorites", "[]").expect("set");
        let reopened = JsonFileStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.get("favorites").expect("get").as_deref(), Some("[]"));
    }

    #[test]
    fn corrupt_value_falls_back_to_default() {
        let mut store = MemoryStore::new();
        store.set("searchHistory", "{not json").expect("set");
        let loaded: Vec<String> = load_json_or_default(&store, "searchHistory");
        assert!(loaded.is_empty());
    }
}
