//! Environment configuration.
//!
//! | variable | default |
//! |---|---|
//! | `MESHSYNC_PRODUCTS_TOPIC` | `products` |
//! | `MESHSYNC_ORDERS_TOPIC` | `orders` |
//! | `MESHSYNC_PARTNERS` | none; `id=kind@template;...` |
//! | `MESHSYNC_POLL_INTERVAL_MS` | 5000 |
//! | `MESHSYNC_FETCH_TIMEOUT_MS` | 10000 |
//! | `MESHSYNC_PUBLISH_TIMEOUT_MS` | 2000 |
//! | `MESHSYNC_MAX_CONFLICT_RETRIES` | 5 |
//! | `MESHSYNC_DEDUP_CAPACITY` | 10000 |
//! | `MESHSYNC_MAX_DELIVERIES` | 10 |
//! | `DATABASE_URL` | unset: in-memory cursor store |
//! | `REDIS_URL` | unset: in-memory bus |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use meshsync_core::PartnerId;
use meshsync_events::FactKind;

use crate::poller::PartnerLink;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}: invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationConfig {
    pub products_topic: String,
    pub orders_topic: String,
    pub partners: Vec<PartnerLink>,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub publish_timeout: Duration,
    pub max_conflict_retries: u32,
    pub dedup_capacity: usize,
    pub max_deliveries: u32,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            products_topic: FactKind::ProductAdded.default_topic().to_string(),
            orders_topic: FactKind::OrderCompleted.default_topic().to_string(),
            partners: Vec::new(),
            poll_interval: Duration::from_millis(5_000),
            fetch_timeout: Duration::from_millis(10_000),
            publish_timeout: Duration::from_millis(2_000),
            max_conflict_retries: 5,
            dedup_capacity: 10_000,
            max_deliveries: 10,
            database_url: None,
            redis_url: None,
        }
    }
}

impl IntegrationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset or blank variables take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            products_topic: get("MESHSYNC_PRODUCTS_TOPIC").unwrap_or(defaults.products_topic),
            orders_topic: get("MESHSYNC_ORDERS_TOPIC").unwrap_or(defaults.orders_topic),
            partners: match get("MESHSYNC_PARTNERS") {
                Some(raw) => parse_partners(&raw)?,
                None => defaults.partners,
            },
            poll_interval: millis(&get, "MESHSYNC_POLL_INTERVAL_MS", defaults.poll_interval)?,
            fetch_timeout: millis(&get, "MESHSYNC_FETCH_TIMEOUT_MS", defaults.fetch_timeout)?,
            publish_timeout: millis(&get, "MESHSYNC_PUBLISH_TIMEOUT_MS", defaults.publish_timeout)?,
            max_conflict_retries: number(
                &get,
                "MESHSYNC_MAX_CONFLICT_RETRIES",
                defaults.max_conflict_retries,
            )?,
            dedup_capacity: number(&get, "MESHSYNC_DEDUP_CAPACITY", defaults.dedup_capacity)?,
            max_deliveries: number(&get, "MESHSYNC_MAX_DELIVERIES", defaults.max_deliveries)?,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
        })
    }

    /// Topic carrying facts of `kind`.
    pub fn topic_for(&self, kind: FactKind) -> &str {
        match kind {
            FactKind::ProductAdded => &self.products_topic,
            FactKind::OrderCompleted => &self.orders_topic,
        }
    }
}

fn number<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(name, &raw, e)),
        None => Ok(default),
    }
}

fn millis<G>(get: &G, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let ms: u64 = number(get, name, default.as_millis() as u64)?;
    if ms == 0 {
        return Err(ConfigError::invalid(name, "0", "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

/// `id=kind@template;id=kind@template`
fn parse_partners(raw: &str) -> Result<Vec<PartnerLink>, ConfigError> {
    const NAME: &str = "MESHSYNC_PARTNERS";
    let mut links: Vec<PartnerLink> = Vec::new();

    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, rest) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid(NAME, entry, "expected id=kind@template"))?;
        let (kind, template) = rest
            .split_once('@')
            .ok_or_else(|| ConfigError::invalid(NAME, entry, "expected id=kind@template"))?;

        let partner_id = PartnerId::new(id).map_err(|e| ConfigError::invalid(NAME, entry, e))?;
        let kind = FactKind::from_str(kind.trim()).map_err(|e| ConfigError::invalid(NAME, entry, e))?;
        let template = template.trim();
        if template.is_empty() {
            return Err(ConfigError::invalid(NAME, entry, "missing link template"));
        }
        if links.iter().any(|l| l.partner_id == partner_id) {
            return Err(ConfigError::invalid(NAME, entry, "duplicate partner id"));
        }

        links.push(PartnerLink {
            partner_id,
            kind,
            template: template.to_string(),
        });
    }

    Ok(links)
}
