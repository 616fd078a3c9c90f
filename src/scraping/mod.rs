pub mod afisha_html;
pub mod base;

use std::collections::HashMap;

use anyhow::Error;

use crate::snapshot::{Snapshot, SnapshotEntry};

pub use afisha_html::AfishaCatalog;

/// Produces the cards listed under one catalog rubric.
pub trait CatalogScraper: Send + Sync {
    fn source_id(&self) -> &str;
    fn fetch_rubric(&self, rubric: &str) -> anyhow::Result<Vec<(String, SnapshotEntry)>>;
}

/// Crawls every rubric and merges the cards into one snapshot. An event
/// listed under several rubrics keeps them all. A snapshot must be a complete
/// capture, so any failed rubric fails the whole crawl.
pub fn run_all(scraper: &dyn CatalogScraper, rubrics: &[String]) -> anyhow::Result<Snapshot> {
    let mut snapshot = Snapshot::default();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut errors: Vec<(String, Error)> = Vec::new();

    for (i, rubric) in rubrics.iter().enumerate() {
        match scraper.fetch_rubric(rubric) {
            Ok(cards) => {
                tracing::info!(
                    "scanned {}/{} rubric {rubric:?}: found {} events",
                    i + 1,
                    rubrics.len(),
                    cards.len()
                );
                for (id, entry) in cards {
                    merge_card(&mut snapshot, &mut positions, id, entry);
                }
            }
            Err(err) => {
                tracing::warn!("rubric {rubric:?} failed: {err:#}");
                errors.push((rubric.clone(), err));
            }
        }
    }

    if !errors.is_empty() {
        let joined = errors
            .into_iter()
            .map(|(rubric, err)| format!("{rubric}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(anyhow::anyhow!(
            "incomplete crawl for {}, nothing kept ({joined})",
            scraper.source_id()
        ));
    }
    if snapshot.is_empty() {
        return Err(anyhow::anyhow!("no events scraped for {}", scraper.source_id()));
    }

    Ok(snapshot)
}

/// The first card seen for an id wins; later ones only add rubrics.
fn merge_card(
    snapshot: &mut Snapshot,
    positions: &mut HashMap<String, usize>,
    id: String,
    entry: SnapshotEntry,
) {
    match positions.get(&id) {
        Some(&index) => {
            let first = &mut snapshot.entries[index].1;
            if first.title != entry.title
                || first.image_url != entry.image_url
                || first.rating != entry.rating
                || first.price != entry.price
                || first.details != entry.details
            {
                tracing::debug!("event {id} differs between rubrics, keeping the first card");
            }
            let known = first.rubrics.get_or_insert_with(Vec::new);
            for code in entry.rubric_codes() {
                if !known.iter().any(|existing| existing == code) {
                    known.push(code.to_string());
                }
            }
        }
        None => {
            positions.insert(id.clone(), snapshot.len());
            snapshot.push(id, entry);
        }
    }
}
