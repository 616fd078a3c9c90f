use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d_%H.%M.%S";
const MAX_COLLISIONS: u32 = 99;

static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"_(\d{4}\.\d{2}\.\d{2}_\d{2}\.\d{2}\.\d{2})(?:_\d{2})?\.json$")
        .expect("valid timestamp regex")
});

/// One scraped card, as captured in the artifact.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SnapshotEntry {
    pub title: String,
    #[serde(default, alias = "avatar")]
    pub image_url: Option<String>,
    /// Raw value; may be a number, a locale-formatted string, or null.
    #[serde(default)]
    pub rating: Value,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubrics: Option<Vec<String>>,
    /// Single-rubric spelling used by the per-rubric catalog crawl.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric: Option<String>,
}

impl SnapshotEntry {
    /// Raw rubric codes from both spellings, in listed order.
    pub fn rubric_codes(&self) -> impl Iterator<Item = &str> {
        self.rubrics
            .iter()
            .flatten()
            .map(String::as_str)
            .chain(self.rubric.as_deref())
    }
}

/// A complete capture, in the artifact's own order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub entries: Vec<(String, SnapshotEntry)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, id: impl Into<String>, entry: SnapshotEntry) {
        self.entries.push((id.into(), entry));
    }

    /// Validates the top-level shape and every entry before anything else
    /// sees the data.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::Format(format!(
                "expected an object of id -> event, found {}",
                kind_of(&value)
            )));
        };
        let mut entries = Vec::with_capacity(map.len());
        for (id, attrs) in map {
            if !attrs.is_object() {
                return Err(Error::Format(format!(
                    "entry {id:?} is {}, expected an object",
                    kind_of(&attrs)
                )));
            }
            let entry: SnapshotEntry = serde_json::from_value(attrs)
                .map_err(|err| Error::Format(format!("entry {id:?}: {err}")))?;
            entries.push((id, entry));
        }
        Ok(Self { entries })
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut map = Map::with_capacity(self.entries.len());
        for (id, entry) in &self.entries {
            map.insert(id.clone(), serde_json::to_value(entry)?);
        }
        Ok(Value::Object(map))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Directory of artifacts for one `<source>_<entity>` pair.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    prefix: String,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, source: &str, entity: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: format!("{source}_{entity}"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Most recent artifact for this source, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        latest_snapshot(&self.dir, &self.prefix)
    }

    pub fn load(&self, path: &Path) -> Result<Snapshot> {
        load(path)
    }

    /// Writes `snapshot` under a fresh timestamped name and returns its path.
    /// Never overwrites: a same-second collision gets a `_NN` disambiguator.
    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_string_pretty(&snapshot.to_value()?)?;
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();

        for attempt in 0..=MAX_COLLISIONS {
            let name = if attempt == 0 {
                format!("{}_{stamp}.json", self.prefix)
            } else {
                format!("{}_{stamp}_{attempt:02}.json", self.prefix)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())?;
                    file.sync_all()?;
                    tracing::info!(
                        "saved snapshot {} ({} events)",
                        path.display(),
                        snapshot.len()
                    );
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::Conflict(format!(
            "more than {MAX_COLLISIONS} snapshots saved at {stamp}"
        )))
    }
}

/// Returns the lexicographically greatest `<prefix>*.json` in `dir`, or
/// `None` when there is no match or the directory does not exist.
pub fn latest_snapshot(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut best: Option<String> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(".json") {
            continue;
        }
        if best.as_deref().map_or(true, |current| name.as_str() > current) {
            best = Some(name);
        }
    }

    Ok(best.map(|name| dir.join(name)))
}

pub fn load(path: &Path) -> Result<Snapshot> {
    let contents = fs::read_to_string(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => Error::not_found(format!("snapshot {}", path.display())),
        _ => err.into(),
    })?;
    let value: Value = serde_json::from_str(&contents)
        .map_err(|err| Error::Format(format!("{}: {err}", path.display())))?;
    Snapshot::from_value(value)
}

/// Capture time encoded in an artifact name, if it carries one.
pub fn snapshot_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_str()?;
    let caps = TIMESTAMP_RE.captures(name)?;
    NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "{}").unwrap();
    }

    #[test]
    fn latest_picks_greatest_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "moscow_events_2024.01.01_00.00.00.json");
        touch(dir.path(), "moscow_events_2024.02.01_00.00.00.json");
        touch(dir.path(), "moscow_movies_2025.01.01_00.00.00.json");
        touch(dir.path(), "moscow_events_2099.01.01_00.00.00.txt");

        let latest = latest_snapshot(dir.path(), "moscow_events").unwrap().unwrap();
        assert_eq!(
            latest.file_name().unwrap(),
            "moscow_events_2024.02.01_00.00.00.json"
        );
    }

    #[test]
    fn latest_is_none_without_matches() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "spb_events_2024.01.01_00.00.00.json");
        assert!(latest_snapshot(dir.path(), "moscow_events").unwrap().is_none());
        assert!(latest_snapshot(&dir.path().join("missing"), "moscow_events")
            .unwrap()
            .is_none());
    }

    #[test]
    fn save_never_clobbers_within_one_second() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "moscow", "events");
        let mut first = Snapshot::default();
        first.push("a", SnapshotEntry { title: "A".into(), ..Default::default() });
        let mut second = Snapshot::default();
        second.push("b", SnapshotEntry { title: "B".into(), ..Default::default() });

        let p1 = store.save(&first).unwrap();
        let p2 = store.save(&second).unwrap();
        assert_ne!(p1, p2);
        assert_eq!(load(&p1).unwrap(), first);
        assert_eq!(load(&p2).unwrap(), second);
        // the later save must also be the latest
        assert_eq!(store.latest().unwrap().unwrap(), p2);
    }

    #[test]
    fn load_rejects_non_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moscow_events_2024.01.01_00.00.00.json");
        fs::write(&path, r#"[{"id": "1", "title": "x"}]"#).unwrap();
        assert!(matches!(load(&path), Err(Error::Format(_))));

        fs::write(&path, r#"{"1": "not an object"}"#).unwrap();
        assert!(matches!(load(&path), Err(Error::Format(_))));

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(Error::Format(_))));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn from_value_keeps_order_and_accepts_alternate_spellings() {
        let snapshot = Snapshot::from_value(json!({
            "z": {"title": "Zeta", "avatar": "http://img/z.png", "rating": "7,1", "rubric": "cinema"},
            "a": {"title": "Alpha", "rubrics": ["concert", "show"]}
        }))
        .unwrap();

        let ids: Vec<_> = snapshot.entries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["z", "a"]);
        let zeta = &snapshot.entries[0].1;
        assert_eq!(zeta.image_url.as_deref(), Some("http://img/z.png"));
        assert_eq!(zeta.rubric_codes().collect::<Vec<_>>(), ["cinema"]);
        let alpha = &snapshot.entries[1].1;
        assert_eq!(alpha.rubric_codes().collect::<Vec<_>>(), ["concert", "show"]);
        assert!(alpha.rating.is_null());
    }

    #[test]
    fn from_value_rejects_mistyped_fields() {
        let err = Snapshot::from_value(json!({"1": {"title": 5}})).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        let err = Snapshot::from_value(json!({"1": {"title": "x", "rubrics": "cinema"}})).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn timestamp_is_read_from_name() {
        let ts = snapshot_timestamp(Path::new("data/moscow_events_2024.02.01_13.14.15.json")).unwrap();
        assert_eq!(ts.format(TIMESTAMP_FORMAT).to_string(), "2024.02.01_13.14.15");
        assert!(snapshot_timestamp(Path::new("data/moscow_events_2024.02.01_13.14.15_03.json")).is_some());
        assert!(snapshot_timestamp(Path::new("moscow_events.json")).is_none());
    }
}
