use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::utils;

const DEFAULT_SOURCE: &str = "moscow";
const DEFAULT_ENTITY: &str = "events";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_CATALOG_URL: &str = "https://afisha.yandex.ru";
const DEFAULT_RUBRICS: &str = "cinema concert theatre kids art sport standup excursions show quests";
const DEFAULT_RECONCILE_INTERVAL_HOURS: u64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub source: String,
    pub entity: String,
    pub listen_addr: String,
    pub catalog_url: String,
    pub rubrics: Vec<String>,
    pub reconcile_interval_hours: u64,
    pub include_archived_by_default: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: utils::database_path(),
            snapshot_dir: utils::snapshot_dir(),
            source: DEFAULT_SOURCE.to_string(),
            entity: DEFAULT_ENTITY.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            rubrics: DEFAULT_RUBRICS.split_whitespace().map(str::to_string).collect(),
            reconcile_interval_hours: DEFAULT_RECONCILE_INTERVAL_HOURS,
            include_archived_by_default: false,
        }
    }
}

impl AppConfig {
    /// Applies `AFISHA_*` environment overrides on top of the loaded values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("AFISHA_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("AFISHA_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Ok(source) = std::env::var("AFISHA_SOURCE") {
            self.source = source;
        }
        if let Ok(addr) = std::env::var("AFISHA_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(hours) = std::env::var("AFISHA_RECONCILE_INTERVAL_HOURS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.reconcile_interval_hours = hours;
        }
        self
    }
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(utils::config_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let data = match read_config(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("ignoring unreadable config {:?}: {err}", path);
                AppConfig::default()
            }
        };
        Self {
            path,
            data: Mutex::new(data.with_env_overrides()),
        }
    }

    pub fn read(&self) -> AppConfig {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig, String>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| "config mutex poisoned".to_string())?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &Path) -> Result<AppConfig, String> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str(&contents).map_err(|err| err.to_string())
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    utils::ensure_parent(path).map_err(|err| err.to_string())?;
    let contents = serde_json::to_string_pretty(config).map_err(|err| err.to_string())?;
    fs::write(path, contents).map_err(|err| err.to_string())
}
