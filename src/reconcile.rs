//! Merges one snapshot into the event store in a single transaction.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use serde_json::Value;

use crate::db::Store;
use crate::error::{Error, Result};
use crate::models::ReconciliationResult;
use crate::rubrics::RubricRegistry;
use crate::snapshot::{self, Snapshot, SnapshotEntry, SnapshotStore};

/// Locale-tolerant rating parse. Text may use a decimal comma; anything
/// unparseable (or non-finite) reads as no rating.
pub fn parse_rating(raw: &Value) -> Option<f64> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

pub fn reconcile(store: &Store, snapshot: &Snapshot) -> Result<ReconciliationResult> {
    let tx = Transaction::new_unchecked(store.conn(), TransactionBehavior::Immediate)?;
    let result = apply(&tx, snapshot)?;
    tx.commit()?;

    tracing::info!(
        total = result.total,
        created = result.created,
        updated = result.updated,
        archived = result.archived,
        restored = result.restored,
        rubrics_created = result.rubrics_created,
        "reconciliation committed"
    );
    Ok(result)
}

/// Loads the most recent artifact and reconciles it.
pub fn reconcile_latest(
    store: &Store,
    snapshots: &SnapshotStore,
) -> Result<(PathBuf, ReconciliationResult)> {
    let path = snapshots.latest()?.ok_or_else(|| {
        Error::not_found(format!("snapshot in {}", snapshots.dir().display()))
    })?;
    let result = reconcile_file(store, snapshots, path.clone())?;
    Ok((path, result))
}

pub fn reconcile_file(
    store: &Store,
    snapshots: &SnapshotStore,
    path: PathBuf,
) -> Result<ReconciliationResult> {
    let snapshot = snapshots.load(&path)?;
    match snapshot::snapshot_timestamp(&path) {
        Some(taken) => tracing::info!("reconciling {} (captured {taken})", path.display()),
        None => tracing::info!("reconciling {}", path.display()),
    }
    reconcile(store, &snapshot)
}

fn apply(conn: &Connection, snapshot: &Snapshot) -> Result<ReconciliationResult> {
    let prior = stored_events(conn)?;
    let mut registry = RubricRegistry::new(conn);
    let mut visited: HashSet<&str> = HashSet::with_capacity(snapshot.len());
    let mut result = ReconciliationResult {
        total: snapshot.len(),
        ..Default::default()
    };

    for (id, entry) in &snapshot.entries {
        let first_visit = visited.insert(id.as_str());
        upsert_event(conn, id, entry)?;
        match prior.get(id.as_str()) {
            Some(&was_archived) if first_visit => {
                result.updated += 1;
                if was_archived {
                    result.restored += 1;
                }
            }
            Some(_) => result.updated += 1,
            None if first_visit => result.created += 1,
            None => result.updated += 1,
        }
        replace_rubrics(conn, &mut registry, id, entry)?;
    }

    let mut archive = conn.prepare_cached("UPDATE events SET archived = 1 WHERE id = ?1")?;
    for (id, archived) in &prior {
        if !archived && !visited.contains(id.as_str()) {
            archive.execute(params![id])?;
            result.archived += 1;
        }
    }

    result.rubrics_created = registry.created();
    Ok(result)
}

/// Every stored event id with its current archived flag.
fn stored_events(conn: &Connection) -> Result<HashMap<String, bool>> {
    let mut stmt = conn.prepare("SELECT id, archived FROM events")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn upsert_event(conn: &Connection, id: &str, entry: &SnapshotEntry) -> Result<()> {
    let rating = parse_rating(&entry.rating);
    if rating.is_none() && !entry.rating.is_null() {
        tracing::debug!("event {id}: unparseable rating {} stored as null", entry.rating);
    }
    conn.prepare_cached(
        "INSERT INTO events (id, title, image_url, rating, price, details, archived)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           image_url = excluded.image_url,
           rating = excluded.rating,
           price = excluded.price,
           details = excluded.details,
           archived = 0",
    )?
    .execute(params![
        id,
        entry.title,
        entry.image_url,
        rating,
        entry.price,
        entry.details
    ])?;
    Ok(())
}

/// Full replace: the links afterwards are exactly the entry's codes.
fn replace_rubrics(
    conn: &Connection,
    registry: &mut RubricRegistry<'_>,
    id: &str,
    entry: &SnapshotEntry,
) -> Result<()> {
    conn.prepare_cached("DELETE FROM event_rubrics WHERE event_id = ?1")?
        .execute(params![id])?;
    let mut link = conn.prepare_cached(
        "INSERT INTO event_rubrics (event_id, rubric_id) VALUES (?1, ?2)
         ON CONFLICT DO NOTHING",
    )?;
    for code in entry.rubric_codes() {
        if let Some(rubric_id) = registry.resolve(code)? {
            link.execute(params![id, rubric_id])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EventQuery;
    use crate::models::{Event, Rubric};
    use serde_json::json;

    fn store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn snap(value: Value) -> Snapshot {
        Snapshot::from_value(value).unwrap()
    }

    fn dump(store: &Store) -> (Vec<Event>, Vec<Rubric>) {
        let events = store
            .list_events(&EventQuery {
                include_archived: true,
                limit: 10_000,
                ..Default::default()
            })
            .unwrap();
        (events, store.list_rubrics().unwrap())
    }

    #[test]
    fn rating_parse_is_locale_tolerant() {
        assert_eq!(parse_rating(&json!("6,7")), Some(6.7));
        assert_eq!(parse_rating(&json!("6.7")), Some(6.7));
        assert_eq!(parse_rating(&json!(" 8,0 ")), Some(8.0));
        assert_eq!(parse_rating(&json!(7.5)), Some(7.5));
        assert_eq!(parse_rating(&json!(9)), Some(9.0));
        assert_eq!(parse_rating(&json!("N/A")), None);
        assert_eq!(parse_rating(&json!("")), None);
        assert_eq!(parse_rating(&json!("NaN")), None);
        assert_eq!(parse_rating(&Value::Null), None);
        assert_eq!(parse_rating(&json!(true)), None);
    }

    #[test]
    fn first_pass_creates_everything() {
        let store = store();
        let result = reconcile(
            &store,
            &snap(json!({
                "1": {"title": "Dune", "rating": "8,1", "rubrics": ["cinema"]},
                "2": {"title": "Jazz", "price": "от 900 ₽", "rubrics": ["concert", " "]},
            })),
        )
        .unwrap();

        assert_eq!(
            result,
            ReconciliationResult {
                total: 2,
                created: 2,
                updated: 0,
                archived: 0,
                restored: 0,
                rubrics_created: 2,
            }
        );
        let dune = store.get_event("1").unwrap();
        assert_eq!(dune.rating, Some(8.1));
        assert_eq!(dune.rubrics, vec!["cinema"]);
        assert_eq!(store.get_event("2").unwrap().rubrics, vec!["concert"]);
    }

    #[test]
    fn reconciling_twice_is_idempotent() {
        let store = store();
        let snapshot = snap(json!({
            "1": {"title": "Dune", "rating": "8,1", "rubrics": ["cinema", "kids"]},
            "2": {"title": "Jazz", "rating": "N/A", "rubric": "concert"},
        }));
        reconcile(&store, &store_seed()).unwrap();
        reconcile(&store, &snapshot).unwrap();
        let once = dump(&store);

        let second = reconcile(&store, &snapshot).unwrap();
        assert_eq!(dump(&store), once);
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(second.archived, 0);
        assert_eq!(second.rubrics_created, 0);
    }

    fn store_seed() -> Snapshot {
        snap(json!({
            "old": {"title": "Gone soon", "rubrics": ["theatre"]},
            "1": {"title": "Dune (preview)", "rubrics": ["cinema"]},
        }))
    }

    #[test]
    fn absent_events_are_archived_and_present_ones_are_not() {
        let store = store();
        reconcile(&store, &store_seed()).unwrap();
        let result = reconcile(&store, &snap(json!({"1": {"title": "Dune"}}))).unwrap();

        assert_eq!(result.archived, 1);
        assert!(store.get_event("old").unwrap().archived);
        assert!(!store.get_event("1").unwrap().archived);
        assert_eq!(store.get_event("1").unwrap().title, "Dune");
    }

    #[test]
    fn reappearing_event_is_restored_and_overwritten() {
        let store = store();
        reconcile(&store, &store_seed()).unwrap();
        reconcile(&store, &snap(json!({"1": {"title": "Dune"}}))).unwrap();
        assert!(store.get_event("old").unwrap().archived);

        let result = reconcile(
            &store,
            &snap(json!({"old": {"title": "Back again", "price": "500 ₽"}})),
        )
        .unwrap();
        assert_eq!(result.restored, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.archived, 1);

        let old = store.get_event("old").unwrap();
        assert!(!old.archived);
        assert_eq!(old.title, "Back again");
        assert_eq!(old.price.as_deref(), Some("500 ₽"));
        assert!(old.rubrics.is_empty());
    }

    #[test]
    fn rubrics_are_replaced_not_merged() {
        let store = store();
        reconcile(&store, &snap(json!({"x": {"title": "X", "rubrics": ["a", "b"]}}))).unwrap();
        reconcile(&store, &snap(json!({"x": {"title": "X", "rubrics": ["b", "c"]}}))).unwrap();
        assert_eq!(store.get_event("x").unwrap().rubrics, vec!["b", "c"]);

        // "a" stays registered even though nothing references it
        let codes: Vec<_> = store.list_rubrics().unwrap().into_iter().map(|r| r.code).collect();
        assert_eq!(codes, ["a", "b", "c"]);
    }

    #[test]
    fn missing_rubric_list_clears_links() {
        let store = store();
        reconcile(&store, &snap(json!({"x": {"title": "X", "rubrics": ["a"]}}))).unwrap();
        reconcile(&store, &snap(json!({"x": {"title": "X"}}))).unwrap();
        assert!(store.get_event("x").unwrap().rubrics.is_empty());
    }

    #[test]
    fn duplicate_and_padded_codes_link_once() {
        let store = store();
        let result = reconcile(
            &store,
            &snap(json!({"x": {"title": "X", "rubrics": ["cinema", " cinema", "cinema "], "rubric": "cinema"}})),
        )
        .unwrap();
        assert_eq!(result.rubrics_created, 1);
        assert_eq!(store.get_event("x").unwrap().rubrics, vec!["cinema"]);
    }

    #[test]
    fn empty_snapshot_archives_everything() {
        let store = store();
        reconcile(
            &store,
            &snap(json!({
                "1": {"title": "One"}, "2": {"title": "Two"}, "3": {"title": "Three"}
            })),
        )
        .unwrap();

        let result = reconcile(&store, &Snapshot::default()).unwrap();
        assert_eq!(result.archived, 3);
        assert_eq!(result.created, 0);
        let (events, _) = dump(&store);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.archived));

        // already archived events are not counted again
        assert_eq!(reconcile(&store, &Snapshot::default()).unwrap().archived, 0);
    }

    #[test]
    fn failure_mid_pass_leaves_store_untouched() {
        let store = store();
        reconcile(&store, &store_seed()).unwrap();
        let before = dump(&store);

        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER poison BEFORE INSERT ON events
                 WHEN NEW.id = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'poisoned entry'); END;",
            )
            .unwrap();

        let snapshot = snap(json!({
            "1": {"title": "Changed", "rubrics": ["brand-new"]},
            "fresh": {"title": "Fresh"},
            "poison": {"title": "Boom"},
            "tail": {"title": "Never reached"},
        }));
        assert!(reconcile(&store, &snapshot).is_err());
        assert_eq!(dump(&store), before);
    }

    #[test]
    fn programmatic_duplicate_ids_do_not_fail() {
        let store = store();
        let mut snapshot = Snapshot::default();
        snapshot.push("d", SnapshotEntry { title: "First".into(), ..Default::default() });
        snapshot.push("d", SnapshotEntry { title: "Second".into(), ..Default::default() });

        let result = reconcile(&store, &snapshot).unwrap();
        assert_eq!((result.created, result.updated), (1, 1));
        assert_eq!(store.get_event("d").unwrap().title, "Second");
    }

    #[test]
    fn reconcile_latest_uses_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("moscow_events_2024.01.01_00.00.00.json"),
            r#"{"jan": {"title": "January"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("moscow_events_2024.02.01_00.00.00.json"),
            r#"{"feb": {"title": "February"}}"#,
        )
        .unwrap();

        let store = store();
        let snapshots = SnapshotStore::new(dir.path(), "moscow", "events");
        let (path, result) = reconcile_latest(&store, &snapshots).unwrap();
        assert!(path.ends_with("moscow_events_2024.02.01_00.00.00.json"));
        assert_eq!(result.created, 1);
        assert!(store.get_event("feb").is_ok());
        assert!(store.get_event("jan").is_err());
    }

    #[test]
    fn reconcile_latest_without_snapshots_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path(), "moscow", "events");
        let err = reconcile_latest(&store(), &snapshots).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn malformed_file_fails_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moscow_events_2024.03.01_00.00.00.json");
        std::fs::write(&path, r#"[{"id": "1"}]"#).unwrap();

        let store = store();
        reconcile(&store, &store_seed()).unwrap();
        let before = dump(&store);
        let snapshots = SnapshotStore::new(dir.path(), "moscow", "events");
        let err = reconcile_file(&store, &snapshots, path).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(dump(&store), before);
    }
}
