use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::error::Result;

/// Trims a raw rubric code; blank codes normalize to `None`.
pub fn normalize_code(raw: &str) -> Option<&str> {
    let code = raw.trim();
    (!code.is_empty()).then_some(code)
}

/// Maps rubric codes to row ids, creating rows on first sight.
///
/// Borrow it from the transaction doing the writes so that created rows
/// roll back together with everything else.
pub struct RubricRegistry<'c> {
    conn: &'c Connection,
    known: HashMap<String, i64>,
    created: usize,
}

impl<'c> RubricRegistry<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            known: HashMap::new(),
            created: 0,
        }
    }

    /// Returns the id for `raw`, or `None` when it is blank.
    pub fn resolve(&mut self, raw: &str) -> Result<Option<i64>> {
        let Some(code) = normalize_code(raw) else {
            return Ok(None);
        };
        if let Some(id) = self.known.get(code) {
            return Ok(Some(*id));
        }

        let inserted = self.conn.execute(
            "INSERT INTO rubrics (code) VALUES (?1) ON CONFLICT(code) DO NOTHING",
            params![code],
        )?;
        if inserted > 0 {
            self.created += 1;
            tracing::debug!("created rubric {code:?}");
        }
        let id: i64 = self.conn.query_row(
            "SELECT id FROM rubrics WHERE code = ?1",
            params![code],
            |row| row.get(0),
        )?;
        self.known.insert(code.to_string(), id);
        Ok(Some(id))
    }

    /// Rubrics inserted through this registry.
    pub fn created(&self) -> usize {
        self.created
    }
}
