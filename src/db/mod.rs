mod accounts;
mod events;

use std::{path::Path, time::Duration};

use rusqlite::{Connection, Row};

use crate::error::Result;
use crate::models::Event;
use crate::utils;

pub use events::EventQuery;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Ordered schema steps; `PRAGMA user_version` records how many have run.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS events(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        image_url TEXT,
        rating REAL,
        price TEXT,
        details TEXT,
        archived INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_events_archived ON events(archived);
    CREATE TABLE IF NOT EXISTS rubrics(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS event_rubrics(
        event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
        rubric_id INTEGER NOT NULL REFERENCES rubrics(id) ON DELETE CASCADE,
        PRIMARY KEY (event_id, rubric_id)
    );
    CREATE INDEX IF NOT EXISTS idx_event_rubrics_rubric ON event_rubrics(rubric_id);",
    "CREATE TABLE IF NOT EXISTS users(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at_utc TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sessions(
        token TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at_utc TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS favorites(
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
        added_at_utc TEXT NOT NULL,
        UNIQUE (user_id, event_id)
    );
    CREATE TABLE IF NOT EXISTS tickets(
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
        purchased_at_utc TEXT NOT NULL,
        UNIQUE (user_id, event_id)
    );",
];

/// Handle over one SQLite connection. Opening never touches the schema;
/// call [`Store::migrate`] once at process start.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        utils::ensure_parent(path)?;
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    /// Applies pending schema steps. Safe to run on every start.
    pub fn migrate(&self) -> Result<()> {
        let applied: usize = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        for (index, step) in MIGRATIONS.iter().enumerate().skip(applied) {
            let tx = self.conn.unchecked_transaction()?;
            tx.execute_batch(step)?;
            tx.pragma_update(None, "user_version", index + 1)?;
            tx.commit()?;
            tracing::info!("applied schema migration {}", index + 1);
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

pub(crate) fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get("id")?,
        title: row.get("title")?,
        image_url: row.get("image_url")?,
        rating: row.get("rating")?,
        price: row.get("price")?,
        details: row.get("details")?,
        archived: row.get("archived")?,
        rubrics: Vec::new(),
    })
}

pub(crate) const EVENT_COLUMNS: &str =
    "e.id AS id, e.title AS title, e.image_url AS image_url, e.rating AS rating,
     e.price AS price, e.details AS details, e.archived AS archived";

/// Attaches each event's rubric codes, sorted.
pub(crate) fn with_rubrics(conn: &Connection, mut events: Vec<Event>) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare_cached(
        "SELECT r.code FROM event_rubrics er
         JOIN rubrics r ON r.id = er.rubric_id
         WHERE er.event_id = ?1
         ORDER BY r.code",
    )?;
    for event in &mut events {
        let codes = stmt.query_map([&event.id], |row| row.get::<_, String>(0))?;
        event.rubrics = codes.collect::<rusqlite::Result<_>>()?;
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store.migrate().unwrap();
        let version: usize = store
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len());
    }

    #[test]
    fn open_creates_parent_and_persists_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.db");
        Store::open(&path).unwrap().migrate().unwrap();

        let reopened = Store::open(&path).unwrap();
        let tables: i64 = reopened
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('events', 'rubrics', 'event_rubrics', 'users', 'favorites', 'tickets')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }
}
