use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::base;
use super::CatalogScraper;
use crate::config::AppConfig;
use crate::snapshot::SnapshotEntry;

/// Price labels that only report availability.
const AVAILABILITY_LABELS: [&str; 2] = ["Есть билеты", "Нет билетов"];
const DETAILS_SEPARATOR: &str = " • ";

static CARD_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-test-id="eventCard.root"]"#).expect("afisha card selector")
});
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-test-id="eventCard.eventInfoTitle"]"#).expect("afisha title selector")
});
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img").expect("afisha image selector"));
static RATING_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-test-id="event-card-rating"]"#).expect("afisha rating selector")
});
static PRICE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-test-id="event-card-price"]"#).expect("afisha price selector")
});
static DETAILS_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-test-id="eventCard.eventInfoDetails"] li"#)
        .expect("afisha details selector")
});

/// Static rubric pages of the Afisha catalog for one city.
pub struct AfishaCatalog {
    base_url: String,
    city: String,
    client: Client,
}

impl AfishaCatalog {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.catalog_url.trim_end_matches('/').to_string(),
            city: config.source.clone(),
            client: base::http_client()?,
        })
    }

    pub fn rubric_url(&self, rubric: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}/{}", self.base_url, self.city))
            .with_context(|| format!("invalid catalog url {}", self.base_url))?;
        url.query_pairs_mut().append_pair("rubric", rubric);
        Ok(url)
    }

    pub(crate) fn parse_document(html: &str, rubric: &str) -> Vec<(String, SnapshotEntry)> {
        let document = Html::parse_document(html);
        document
            .select(&CARD_SELECTOR)
            .filter_map(|card| parse_card(card, rubric))
            .collect()
    }
}

impl CatalogScraper for AfishaCatalog {
    fn source_id(&self) -> &str {
        &self.city
    }

    fn fetch_rubric(&self, rubric: &str) -> Result<Vec<(String, SnapshotEntry)>> {
        let url = self.rubric_url(rubric)?;
        let html = base::fetch_html(&self.client, url.as_str())?;
        Ok(Self::parse_document(&html, rubric))
    }
}

fn parse_card(card: ElementRef<'_>, rubric: &str) -> Option<(String, SnapshotEntry)> {
    let id = card
        .value()
        .attr("data-event-id")
        .map(str::trim)
        .filter(|id| !id.is_empty())?
        .to_string();
    let title = base::first_text(&card, &TITLE_SELECTOR)?;

    let rating = base::first_text(&card, &RATING_SELECTOR)
        .map(Value::String)
        .unwrap_or(Value::Null);
    let price = base::first_text(&card, &PRICE_SELECTOR)
        .filter(|price| !AVAILABILITY_LABELS.contains(&price.as_str()));
    let details = base::all_texts(&card, &DETAILS_SELECTOR).join(DETAILS_SEPARATOR);

    Some((
        id,
        SnapshotEntry {
            title,
            image_url: base::first_attr(&card, &IMAGE_SELECTOR, "src"),
            rating,
            price,
            details: (!details.is_empty()).then_some(details),
            rubrics: Some(vec![rubric.to_string()]),
            rubric: None,
        },
    ))
}
