//! Item collection for every configured site.
//!
//! A site is scraped in one of two ways, chosen by its `source.kind`:
//!
//! | Kind | Module | Flow |
//! |------|--------|------|
//! | `html` | [`listing`] | Listing page → containers → fields, optionally one [`detail`] page per item |
//! | `api` | [`api`] | JSON endpoint → visible objects → fields |
//!
//! Collection is strictly sequential: the listing fetch, then one detail
//! fetch per retained item in listing order with a politeness delay in
//! between. A failed listing fetch yields no items; a failed detail fetch
//! degrades that one item to its listing-level fields.

pub mod api;
pub mod detail;
pub mod listing;

use crate::config::{ConfigError, SiteConfig, Source};
use crate::dates::DateNormalizer;
use crate::http::FetchClient;
use crate::models::Item;
use chrono::{DateTime, FixedOffset};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// A site definition with its base URL and date rules resolved.
#[derive(Debug, Clone)]
pub struct SiteContext<'a> {
    pub config: &'a SiteConfig,
    pub base: Url,
    pub dates: DateNormalizer,
}

impl<'a> SiteContext<'a> {
    pub fn new(config: &'a SiteConfig) -> Result<Self, ConfigError> {
        let base = config.base()?;
        let dates = DateNormalizer::new(
            config.dates.locale,
            config.dates.formats.as_deref(),
            config.offset()?,
        );
        Ok(Self {
            config,
            base,
            dates,
        })
    }

    /// Timestamp from the first candidate that parses, else the current time.
    ///
    /// Candidates are raw date strings in priority order (e.g. detail page,
    /// then listing row). Unparseable candidates are logged.
    pub fn published_at(&self, candidates: &[Option<&str>]) -> DateTime<FixedOffset> {
        for raw in candidates.iter().flatten() {
            match self.dates.try_parse(raw) {
                Some(ts) => return ts,
                None => warn!(site = %self.config.name, raw, "Could not parse date"),
            }
        }
        debug!(site = %self.config.name, "No usable date; using current time");
        self.dates.now()
    }
}

/// Collect the items for one site, in listing order.
///
/// Never fails: fetch and extraction problems are logged and reflected in
/// the result (fewer items, or items with default fields).
#[instrument(level = "info", skip_all, fields(site = %site.config.name))]
pub async fn collect(site: &SiteContext<'_>, client: &FetchClient) -> Vec<Item> {
    let items = match &site.config.source {
        Source::Html(listing) => listing::collect(site, listing, client).await,
        Source::Api(api) => api::collect(site, api, client).await,
    };
    info!(count = items.len(), "Collected items");
    items
}
