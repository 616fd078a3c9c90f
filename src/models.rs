use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub id: String, // source-assigned, stable across snapshots
    pub title: String,
    pub image_url: Option<String>,
    pub rating: Option<f64>,
    pub price: Option<String>,
    pub details: Option<String>,
    pub archived: bool,
    pub rubrics: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Rubric {
    pub id: i64,
    pub code: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct Favorite {
    pub event: Event,
    pub added_at_utc: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct Ticket {
    pub event: Event,
    pub purchased_at_utc: String,
}

/// Counts reported by one reconciliation pass.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub archived: usize,
    /// Previously archived events that reappeared; also counted in `updated`.
    pub restored: usize,
    pub rubrics_created: usize,
}
