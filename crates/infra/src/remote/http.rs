//! HAL-style event collections over HTTP.
//!
//! ```json
//! {
//!   "_embedded": { "events": [ { "publicationDate": "...", "product": { ... } } ] },
//!   "_links": { "next": { "href": "/events?page=2" } }
//! }
//! ```
//!
//! Items are read from the first array under `_embedded`, or from a top-level
//! `items` array. A response without either is an empty page.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::debug;

use super::{EventPage, FetchError, RemoteEventSource, RemoteItem};

const ACCEPT_HAL: &str = "application/hal+json, application/json;q=0.9";

#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: Client,
}

impl HttpEventSource {
    /// Every request (connect through body) is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_decode() {
        FetchError::Body(err.to_string())
    } else {
        FetchError::Transport(err.to_string())
    }
}

#[async_trait]
impl RemoteEventSource for HttpEventSource {
    async fn fetch(&self, url: &Url) -> Result<EventPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, ACCEPT_HAL)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(map_reqwest)?;
        let page = parse_page(&body, url)?;
        debug!(%url, items = page.items.len(), has_next = page.next.is_some(), "fetched event page");
        Ok(page)
    }
}

pub(crate) fn parse_page(body: &Value, base: &Url) -> Result<EventPage, FetchError> {
    let items = match body {
        Value::Array(items) => items.as_slice(),
        _ => embedded_items(body).unwrap_or(&[]),
    };

    let items = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let publication_date = item
                .get("publicationDate")
                .and_then(Value::as_str)
                .ok_or_else(|| FetchError::Body(format!("item {index} has no publicationDate")))
                .and_then(|raw| parse_publication_date(raw, index))?;
            Ok(RemoteItem {
                publication_date,
                body: item.clone(),
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;

    let next = match body.pointer("/_links/next/href").and_then(Value::as_str) {
        Some(href) => Some(
            base.join(href)
                .map_err(|e| FetchError::Body(format!("bad next link '{href}': {e}")))?,
        ),
        None => None,
    };

    Ok(EventPage { items, next })
}

fn embedded_items(body: &Value) -> Option<&[Value]> {
    if let Some(embedded) = body.get("_embedded").and_then(Value::as_object) {
        return embedded
            .values()
            .find_map(Value::as_array)
            .map(Vec::as_slice);
    }
    body.get("items").and_then(Value::as_array).map(Vec::as_slice)
}

/// RFC 3339, or a zone-less local date-time taken as UTC.
fn parse_publication_date(raw: &str, index: usize) -> Result<DateTime<Utc>, FetchError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| FetchError::Body(format!("item {index} publicationDate '{raw}': {e}")))
}
