use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed snapshot: {0}")]
    Format(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Sqlite(rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, ref msg)
                if failure.code == ErrorCode::ConstraintViolation
                    && msg.as_deref().is_some_and(|m| m.contains("UNIQUE")) =>
            {
                Error::Conflict(msg.clone().unwrap_or_else(|| "already exists".into()))
            }
            other => Error::Sqlite(other),
        }
    }
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Turns `QueryReturnedNoRows` into a `NotFound` for the given subject.
    pub fn or_not_found(err: rusqlite::Error, what: impl Into<String>) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(what.into()),
            other => other.into(),
        }
    }
}
