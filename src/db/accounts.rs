use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{event_from_row, with_rubrics, Store, EVENT_COLUMNS};
use crate::error::{Error, Result};
use crate::models::{Favorite, Ticket, User};

fn password_digest(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b"|");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn rename_conflict(err: Error, message: &str) -> Error {
    match err {
        Error::Conflict(_) => Error::Conflict(message.to_string()),
        other => other,
    }
}

impl Store {
    pub fn register_user(&self, username: &str, password: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::BadRequest(
                "username and password are required".into(),
            ));
        }
        self.conn()
            .execute(
                "INSERT INTO users (username, password_hash, created_at_utc) VALUES (?1, ?2, ?3)",
                params![
                    username,
                    password_digest(username, password),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|err| rename_conflict(err.into(), "username already registered"))?;
        Ok(User {
            id: self.conn().last_insert_rowid(),
            username: username.to_string(),
        })
    }

    /// Checks credentials and opens a session, returning its bearer token.
    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        let username = username.trim();
        let stored: Option<(i64, String)> = self
            .conn()
            .query_row(
                "SELECT id, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let user_id = match stored {
            Some((id, hash)) if hash == password_digest(username, password) => id,
            _ => return Err(Error::Unauthorized("invalid credentials".into())),
        };

        let token = Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO sessions (token, user_id, created_at_utc) VALUES (?1, ?2, ?3)",
            params![token, user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(token)
    }

    pub fn user_for_token(&self, token: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT u.id, u.username FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1",
                params![token],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| Error::Unauthorized("invalid or expired session".into()))
    }

    pub fn list_favorites(&self, user_id: i64) -> Result<Vec<Favorite>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {EVENT_COLUMNS}, f.added_at_utc AS stamp FROM favorites f
             JOIN events e ON e.id = f.event_id
             WHERE f.user_id = ?1
             ORDER BY f.rowid"
        ))?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((event_from_row(row)?, row.get::<_, String>("stamp")?))
        })?;
        let (events, stamps): (Vec<_>, Vec<_>) =
            rows.collect::<rusqlite::Result<Vec<_>>>()?.into_iter().unzip();
        let events = with_rubrics(self.conn(), events)?;
        Ok(events
            .into_iter()
            .zip(stamps)
            .map(|(event, added_at_utc)| Favorite {
                event,
                added_at_utc,
            })
            .collect())
    }

    pub fn add_favorite(&self, user_id: i64, event_id: &str) -> Result<Favorite> {
        let event = self.get_event(event_id)?;
        let added_at_utc = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO favorites (user_id, event_id, added_at_utc) VALUES (?1, ?2, ?3)",
                params![user_id, event_id, added_at_utc],
            )
            .map_err(|err| rename_conflict(err.into(), "event already in favorites"))?;
        Ok(Favorite {
            event,
            added_at_utc,
        })
    }

    pub fn remove_favorite(&self, user_id: i64, event_id: &str) -> Result<()> {
        let removed = self.conn().execute(
            "DELETE FROM favorites WHERE user_id = ?1 AND event_id = ?2",
            params![user_id, event_id],
        )?;
        if removed == 0 {
            return Err(Error::not_found(format!("favorite {event_id}")));
        }
        Ok(())
    }

    pub fn list_tickets(&self, user_id: i64) -> Result<Vec<Ticket>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {EVENT_COLUMNS}, t.purchased_at_utc AS stamp FROM tickets t
             JOIN events e ON e.id = t.event_id
             WHERE t.user_id = ?1
             ORDER BY t.rowid"
        ))?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((event_from_row(row)?, row.get::<_, String>("stamp")?))
        })?;
        let (events, stamps): (Vec<_>, Vec<_>) =
            rows.collect::<rusqlite::Result<Vec<_>>>()?.into_iter().unzip();
        let events = with_rubrics(self.conn(), events)?;
        Ok(events
            .into_iter()
            .zip(stamps)
            .map(|(event, purchased_at_utc)| Ticket {
                event,
                purchased_at_utc,
            })
            .collect())
    }

    /// Records a purchase and drops the matching favorite in one transaction.
    pub fn buy_ticket(&self, user_id: i64, event_id: &str) -> Result<Ticket> {
        let event = self.get_event(event_id)?;
        let purchased_at_utc = Utc::now().to_rfc3339();

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO tickets (user_id, event_id, purchased_at_utc) VALUES (?1, ?2, ?3)",
            params![user_id, event_id, purchased_at_utc],
        )
        .map_err(|err| rename_conflict(err.into(), "ticket already purchased"))?;
        tx.execute(
            "DELETE FROM favorites WHERE user_id = ?1 AND event_id = ?2",
            params![user_id, event_id],
        )?;
        tx.commit()?;

        Ok(Ticket {
            event,
            purchased_at_utc,
        })
    }
}
