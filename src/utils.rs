use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
};

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let root = match std::env::var_os("AFISHA_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => data_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .join("afisha-sync"),
    };
    if let Err(err) = fs::create_dir_all(&root) {
        tracing::warn!("failed to create data root {:?}: {err}", root);
    }
    root
});

pub fn data_root() -> PathBuf {
    DATA_ROOT.clone()
}

pub fn database_path() -> PathBuf {
    data_root().join("events.db")
}

pub fn config_path() -> PathBuf {
    data_root().join("config.json")
}

pub fn snapshot_dir() -> PathBuf {
    data_root().join("data")
}

pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Collapses runs of whitespace and trims the ends.
pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
