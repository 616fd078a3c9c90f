use rusqlite::{named_params, params};

use super::{event_from_row, with_rubrics, Store, EVENT_COLUMNS};
use crate::error::{Error, Result};
use crate::models::{Event, Rubric};

pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub rubric: Option<String>,
    pub skip: usize,
    pub limit: usize,
    pub include_archived: bool,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            rubric: None,
            skip: 0,
            limit: DEFAULT_LIMIT,
            include_archived: false,
        }
    }
}

impl Store {
    /// Point lookup; archived events are returned with their flag set.
    pub fn get_event(&self, id: &str) -> Result<Event> {
        let event = self
            .conn()
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?1"),
                params![id],
                event_from_row,
            )
            .map_err(|err| Error::or_not_found(err, format!("event {id}")))?;
        let mut events = with_rubrics(self.conn(), vec![event])?;
        Ok(events.remove(0))
    }

    /// Events in first-seen order, optionally narrowed to one rubric code.
    pub fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let rubric = query
            .rubric
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events e
             WHERE (:include_archived OR e.archived = 0)
               AND (:rubric IS NULL OR EXISTS (
                    SELECT 1 FROM event_rubrics er
                    JOIN rubrics r ON r.id = er.rubric_id
                    WHERE er.event_id = e.id AND r.code = :rubric))
             ORDER BY e.rowid
             LIMIT :limit OFFSET :skip"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            named_params! {
                ":include_archived": query.include_archived,
                ":rubric": rubric,
                ":limit": i64::try_from(query.limit).unwrap_or(i64::MAX),
                ":skip": i64::try_from(query.skip).unwrap_or(i64::MAX),
            },
            event_from_row,
        )?;
        let events = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        with_rubrics(self.conn(), events)
    }

    /// Every known rubric, including ones no event references any more.
    pub fn list_rubrics(&self) -> Result<Vec<Rubric>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, code FROM rubrics ORDER BY code")?;
        let rows = stmt.query_map([], |row| {
            Ok(Rubric {
                id: row.get(0)?,
                code: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Hard delete for administrative use. Rubric links, favorites and
    /// tickets for the event go with it.
    pub fn delete_event(&self, id: &str) -> Result<()> {
        let removed = self
            .conn()
            .execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(Error::not_found(format!("event {id}")));
        }
        tracing::info!("deleted event {id}");
        Ok(())
    }
}
