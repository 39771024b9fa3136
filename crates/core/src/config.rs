use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

static DEFAULT_DB_NAME: &str = "taskdeck.sqlite3";
static DEFAULT_CACHE_NAME: &str = "cache.json";
static ENV_DATA_DIR: &str = "TASKDECK_DATA_DIR";

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("dev", "taskdeck", "taskdeck"));

/// Cache keys the engine reads and writes.
pub mod cache_keys {
    pub const FILTER_PREFERENCES: &str = "filter-preferences";
    pub const USER_BACKUP: &str = "user-backup";
    pub const IMPORTED_TASKS: &str = "imported-tasks";
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    data_dir: PathBuf,
    db_path: PathBuf,
    cache_path: PathBuf,
}

impl AppConfig {
    /// Construct [`AppConfig`] by resolving the data directory using the
    /// provided override, environment variables, and platform defaults.
    pub fn discover(data_dir_override: Option<PathBuf>) -> Result<Self> {
        let data_dir = resolve_data_dir(data_dir_override)?;
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).with_context(|| {
                format!("Failed to create data directory at {}", data_dir.display())
            })?;
        }
        Self::from_data_dir(data_dir)
    }

    /// Construct [`AppConfig`] directly from a resolved data directory.
    pub fn from_data_dir(data_dir: PathBuf) -> Result<Self> {
        let db_path = data_dir.join(DEFAULT_DB_NAME);
        let cache_path = data_dir.join(DEFAULT_CACHE_NAME);
        Ok(Self {
            data_dir,
            db_path,
            cache_path,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }
}

fn resolve_data_dir(data_dir_override: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = data_dir_override {
        return Ok(dir);
    }

    if let Ok(env_dir) = env::var(ENV_DATA_DIR) {
        return Ok(PathBuf::from(env_dir));
    }

    if let Some(project) = &*PROJECT_DIRS {
        return Ok(project.data_dir().to_path_buf());
    }

    if let Some(base) = BaseDirs::new() {
        return Ok(base.home_dir().join(".taskdeck"));
    }

    Ok(env::current_dir()?.join(".taskdeck"))
}

/// Local key-value cache file: last-resort backup/import source and filter
/// preference storage. Missing or malformed entries read as absent; writes
/// that fail are logged and swallowed, never fatal.
#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.read_entries()?;
        let value = entries.get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(key, error = %err, "malformed cache entry, treating as absent");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let mut entries = self
            .read_entries()
            .unwrap_or_else(serde_json::Map::default);
        let encoded = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode cache entry");
                return;
            }
        };
        entries.insert(key.to_string(), encoded);
        let body = Value::Object(entries);
        if let Err(err) = fs::write(&self.path, body.to_string()) {
            tracing::warn!(key, error = %err, "failed to write cache file");
        }
    }

    pub fn remove(&self, key: &str) {
        let Some(mut entries) = self.read_entries() else {
            return;
        };
        if entries.remove(key).is_some() {
            if let Err(err) = fs::write(&self.path, Value::Object(entries).to_string()) {
                tracing::warn!(key, error = %err, "failed to write cache file");
            }
        }
    }

    fn read_entries(&self) -> Option<serde_json::Map<String, Value>> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "cache file malformed, ignoring");
                None
            }
        }
    }
}
