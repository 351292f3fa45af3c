//! HTML listing pages: containers, per-item fields and optional detail visits.

use super::detail::{fetch_detail, DetailPage};
use super::SiteContext;
use crate::compose::{compose, join_parts};
use crate::config::ListingConfig;
use crate::extract::{escape_html, extract, extract_fragment, extract_url, find_containers};
use crate::http::FetchClient;
use crate::models::{fallback_guid, Item};
use crate::utils::truncate_for_log;
use futures::stream::{self, StreamExt};
use scraper::{ElementRef, Html};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Fields read from one listing container. Values are raw (dates unparsed,
/// links already absolute).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub date: Option<String>,
    pub label: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    /// Body fragment, already safe to embed as HTML.
    pub body: Option<String>,
    pub author: Option<String>,
}

impl ListingEntry {
    fn from_container(container: ElementRef<'_>, site: &SiteContext<'_>, listing: &ListingConfig) -> Self {
        let fields = &listing.fields;
        let body = extract_fragment(container, &fields.body).or_else(|| {
            join_parts(
                listing
                    .body_parts
                    .iter()
                    .map(|part| (part.prefix.as_str(), extract(container, &part.from))),
            )
        });

        Self {
            title: extract(container, &fields.title),
            link: extract_url(container, &fields.link, &site.base),
            date: extract(container, &fields.date),
            label: extract(container, &fields.label),
            category: extract(container, &fields.category),
            image_url: extract_url(container, &fields.image, &site.base),
            body,
            author: extract(container, &fields.author),
        }
    }
}

/// Parse a listing page into at most `max_items` entries, in document order.
///
/// The cap applies to containers, before entries without both a title and a
/// link are dropped.
pub fn parse_listing(html: &str, site: &SiteContext<'_>, listing: &ListingConfig) -> Vec<ListingEntry> {
    let document = Html::parse_document(html);
    let containers = find_containers(&document, &listing.containers);
    if containers.is_empty() {
        warn!(preview = %truncate_for_log(html.trim(), 200), "No item containers on listing page");
    }
    debug!(found = containers.len(), "Listing containers");

    containers
        .into_iter()
        .take(site.config.max_items)
        .map(|container| ListingEntry::from_container(container, site, listing))
        .filter(|entry| {
            let keep = entry.title.is_some() || entry.link.is_some();
            if !keep {
                debug!("Skipping container without title or link");
            }
            keep
        })
        .collect()
}

/// Turn a listing entry (and its detail page, if visited) into a feed item.
pub fn build_item(
    site: &SiteContext<'_>,
    listing: &ListingConfig,
    entry: ListingEntry,
    detail: Option<DetailPage>,
) -> Item {
    let (detail_date, detail_body) = match detail {
        Some(page) => (page.date, Some(page.body).filter(|b| !b.trim().is_empty())),
        None => (None, None),
    };

    let published_at = site.published_at(&[detail_date.as_deref(), entry.date.as_deref()]);
    let title = entry
        .title
        .unwrap_or_else(|| listing.untitled.clone());
    let body = detail_body
        .or(entry.body)
        .or_else(|| {
            (listing.title_as_description && !title.is_empty()).then(|| escape_html(&title))
        })
        .unwrap_or_default();

    let listing_url = site.config.listing_url();
    let guid = entry.link.is_none().then(|| fallback_guid(listing_url, &title));

    Item {
        link: entry.link.unwrap_or_else(|| listing_url.to_string()),
        guid,
        description: compose(entry.label.as_deref(), entry.image_url.as_deref(), &body),
        title,
        published_at,
        category: entry.category,
        image_url: entry.image_url,
        author: entry.author,
    }
}

/// Fetch the listing, then each retained item's detail page in order.
#[instrument(level = "info", skip_all, fields(url = %site.config.listing_url()))]
pub async fn collect(site: &SiteContext<'_>, listing: &ListingConfig, client: &FetchClient) -> Vec<Item> {
    let html = match client.get_text(site.config.listing_url()).await {
        Ok(html) => html,
        Err(e) => {
            error!(error = %e, "Listing fetch failed");
            return Vec::new();
        }
    };

    let entries = parse_listing(&html, site, listing);
    info!(count = entries.len(), "Parsed listing entries");

    let Some(detail) = &listing.detail else {
        return entries
            .into_iter()
            .map(|entry| build_item(site, listing, entry, None))
            .collect();
    };

    // The delay goes between detail fetches, never before the first one.
    let delay = Duration::from_millis(detail.delay_ms);
    let fetched = AtomicUsize::new(0);
    let fetched = &fetched;
    stream::iter(entries)
        .then(|entry| async move {
            let page = match entry.link.as_deref() {
                Some(url) => {
                    if fetched.fetch_add(1, Ordering::Relaxed) > 0 && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Some(fetch_detail(client, url, detail).await)
                }
                None => None,
            };
            build_item(site, listing, entry, page)
        })
        .collect()
        .await
}
