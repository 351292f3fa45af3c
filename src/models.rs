//! Data models for scraped items and the feeds built from them.
//!
//! - [`Item`]: one syndicated entry extracted from a listing, detail page or API
//! - [`ChannelMeta`]: channel-level metadata for the RSS document
//! - [`Feed`]: channel metadata plus the ordered items of a single run
//!
//! A [`Feed`] is built from scratch on every run and never merged with the
//! output of a previous one.

use chrono::{DateTime, FixedOffset};
use sha2::{Digest, Sha256};

/// A single syndicated entry.
///
/// `link` and `image_url` are always absolute once stored; the collectors
/// resolve relative references against the site's base URL before building
/// an `Item`.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Display title. May be a placeholder, never omitted from the output.
    pub title: String,
    /// Absolute permalink of the entry, or the listing URL when the entry
    /// has no page of its own.
    pub link: String,
    /// Non-permalink identifier, set when `link` is a shared fallback.
    /// `None` means `link` itself identifies the entry.
    pub guid: Option<String>,
    /// Best-effort publication timestamp in the site's declared offset.
    pub published_at: DateTime<FixedOffset>,
    /// HTML-bearing description fragment.
    pub description: String,
    /// Short label, emitted as `<category>`.
    pub category: Option<String>,
    /// Absolute URL of the lead image.
    pub image_url: Option<String>,
    pub author: Option<String>,
}

/// Identifier for an entry without a permalink: the listing URL plus a
/// SHA-256 of the title, stable across runs.
pub fn fallback_guid(listing_url: &str, title: &str) -> String {
    format!("{listing_url}#{:x}", Sha256::digest(title.as_bytes()))
}

/// Channel-level metadata for one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMeta {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Language tag such as `nl-NL` or `en-US`.
    pub language: Option<String>,
    pub generator: Option<String>,
    /// URL of the feed itself, emitted as `<atom:link rel="self">`.
    pub self_link: Option<String>,
    /// Generation timestamp, emitted as `<lastBuildDate>`.
    pub built_at: DateTime<FixedOffset>,
}

/// The complete result of one run for one site.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub channel: ChannelMeta,
    /// Items in source listing order.
    pub items: Vec<Item>,
}

impl Feed {
    pub fn new(channel: ChannelMeta, items: Vec<Item>) -> Self {
        Self { channel, items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
