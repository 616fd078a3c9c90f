use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use scraper::{ElementRef, Selector};

use crate::utils::clean_text;

const USER_AGENT: &str = "AfishaSync/0.1 (+https://github.com/afisha-sync/afisha-sync)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .context("unable to build http client")
}

pub fn fetch_html(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("request failed for {url}"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("non-success status for {url}"))?;
    response
        .text()
        .with_context(|| format!("unable to read response body for {url}"))
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(inner_text)
        .filter(|text| !text.is_empty())
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn all_texts(element: &ElementRef<'_>, selector: &Selector) -> Vec<String> {
    element
        .select(selector)
        .map(inner_text)
        .filter(|text| !text.is_empty())
        .collect()
}
