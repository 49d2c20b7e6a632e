//! Cursor-based incremental polling of a partner's event collection.
//!
//! One cycle walks `Idle → Fetching → Applying → Committing → Idle`:
//!
//! 1. load the partner's [`Integration`] and build `{type, since?}`
//! 2. expand the partner link and fetch, following `next` links
//! 3. apply every item in delivery order
//! 4. advance the watermark to the newest `publicationDate` applied
//!
//! A transient failure abandons the cycle before step 4, so the cursor store
//! is never written for a partially applied batch. Items of an abandoned
//! batch are fetched and applied again next cycle; appliers are idempotent.
//!
//! An item that can never apply (undecodable, or rejected by the domain) is
//! logged at `error`, counted in [`PollReport::skipped`] and passed over. Its
//! `publicationDate` still counts towards the watermark.

pub mod worker;

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use meshsync_core::PartnerId;
use meshsync_events::{Fact, FactKind};

use crate::applier::ApplyError;
use crate::consumer::HandleError;
use crate::cursor_store::{CursorStore, CursorStoreError, Integration};
use crate::remote::{FetchError, RemoteEventSource, TemplateParams, expand};

pub use worker::PollerWorker;

/// Where and what to poll for one partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerLink {
    pub partner_id: PartnerId,
    pub kind: FactKind,
    /// URI template, e.g. `http://catalog/events{?type,since}`.
    pub template: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Applying,
    Committing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub partner: PartnerId,
    pub applied: usize,
    /// Items dropped because they can never apply.
    pub skipped: usize,
    pub pages: usize,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PollError {
    #[error("cursor store: {0}")]
    Cursor(#[from] CursorStoreError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("item {index} could not be applied: {source}")]
    Apply { index: usize, source: ApplyError },

    #[error("partner misconfigured: {0}")]
    Configuration(String),
}

impl PollError {
    /// Fatal errors stop the partner's poller; everything else is retried
    /// next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PollError::Configuration(_))
    }
}

type ItemHandler = Box<dyn Fn(&serde_json::Value) -> Result<(), HandleError> + Send + Sync>;

/// Polls one partner and applies what it finds.
pub struct IncrementalPoller<C, R> {
    link: PartnerLink,
    cursors: C,
    source: R,
    handler: ItemHandler,
}

impl<C, R> IncrementalPoller<C, R>
where
    C: CursorStore,
    R: RemoteEventSource,
{
    /// `F` must be the fact kind the partner link announces.
    pub fn new<F, H, O>(link: PartnerLink, cursors: C, source: R, handler: H) -> Result<Self, PollError>
    where
        F: Fact,
        H: Fn(F) -> Result<O, ApplyError> + Send + Sync + 'static,
        O: core::fmt::Debug,
    {
        if F::KIND != link.kind {
            return Err(PollError::Configuration(format!(
                "partner {} announces {} but the handler applies {}",
                link.partner_id,
                link.kind,
                F::KIND
            )));
        }
        if link.template.trim().is_empty() {
            return Err(PollError::Configuration(format!(
                "partner {} has no link",
                link.partner_id
            )));
        }
        expand(&link.template, &TemplateParams::new())
            .map_err(|e| PollError::Configuration(format!("partner {}: {e}", link.partner_id)))?;

        let handler: ItemHandler = Box::new(move |body| {
            let fact = F::decode_value(body).map_err(HandleError::Decode)?;
            let identity = fact.identity();
            let outcome = handler(fact).map_err(HandleError::Apply)?;
            debug!(fact = %identity, ?outcome, "polled item applied");
            Ok(())
        });

        Ok(Self {
            link,
            cursors,
            source,
            handler,
        })
    }

    pub fn partner(&self) -> &PartnerId {
        &self.link.partner_id
    }

    pub async fn poll_once(&self) -> Result<PollReport, PollError> {
        let partner = &self.link.partner_id;
        let cycle = Uuid::now_v7();

        transition(partner, cycle, PollState::Fetching);
        let stored = self.cursors.load(partner).await?;
        let integration = stored
            .clone()
            .unwrap_or_else(|| Integration::new(partner.clone()));

        let mut params = TemplateParams::new();
        params.insert("type", self.link.kind.as_str().to_string());
        if let Some(since) = integration.last_update() {
            params.insert("since", since.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        }
        let first = expand(&self.link.template, &params)
            .map_err(|e| PollError::Configuration(format!("partner {partner}: {e}")))?;
        info!(partner = %partner, %cycle, url = %first, "requesting new events");

        let mut next: Option<Url> = Some(first);
        let mut visited = HashSet::new();
        let mut applied = 0usize;
        let mut skipped = 0usize;
        let mut pages = 0usize;
        let mut newest: Option<DateTime<Utc>> = None;

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                debug!(partner = %partner, %cycle, %url, "next link points back to a visited page; stopping");
                break;
            }
            let page = self.source.fetch(&url).await?;
            pages += 1;

            transition(partner, cycle, PollState::Applying);
            for item in &page.items {
                let index = applied + skipped;
                match (self.handler)(&item.body) {
                    Ok(()) => applied += 1,
                    Err(HandleError::Apply(source)) if source.is_transient() => {
                        return Err(PollError::Apply { index, source });
                    }
                    Err(err) => {
                        error!(
                            partner = %partner,
                            %cycle,
                            index,
                            publication_date = %item.publication_date,
                            error = %err,
                            "dropping polled item that can never apply"
                        );
                        skipped += 1;
                    }
                }
                newest = newest.max(Some(item.publication_date));
            }

            next = page.next;
            if next.is_some() {
                transition(partner, cycle, PollState::Fetching);
            }
        }

        transition(partner, cycle, PollState::Committing);
        let advanced = match newest {
            Some(at) => integration.advanced_to(at),
            None => integration,
        };
        if stored.as_ref() != Some(&advanced) {
            self.cursors.save(&advanced).await?;
        }
        transition(partner, cycle, PollState::Idle);

        info!(
            partner = %partner,
            %cycle,
            applied,
            skipped,
            pages,
            last_update = ?advanced.last_update(),
            "poll cycle committed"
        );

        Ok(PollReport {
            partner: partner.clone(),
            applied,
            skipped,
            pages,
            last_update: advanced.last_update(),
        })
    }
}

fn transition(partner: &PartnerId, cycle: Uuid, state: PollState) {
    debug!(partner = %partner, %cycle, ?state, "poll state");
}
