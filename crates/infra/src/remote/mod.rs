//! Pull side of partner integration: remote event collections.

pub mod http;
pub mod uri_template;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use thiserror::Error;

pub use http::HttpEventSource;
pub use uri_template::{TemplateError, TemplateParams, expand};

/// One remote event, in the broker wire shape plus its publication date.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub publication_date: DateTime<Utc>,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPage {
    pub items: Vec<RemoteItem>,
    pub next: Option<Url>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("unreadable response body: {0}")]
    Body(String),
}

/// Source of paginated remote events.
#[async_trait]
pub trait RemoteEventSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<EventPage, FetchError>;
}

#[async_trait]
impl<S> RemoteEventSource for Arc<S>
where
    S: RemoteEventSource + ?Sized,
{
    async fn fetch(&self, url: &Url) -> Result<EventPage, FetchError> {
        (**self).fetch(url).await
    }
}
