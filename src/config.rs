//! Declarative per-site configuration.
//!
//! Every supported site is a [`SiteConfig`] record: where to fetch, how to
//! find item containers, which ordered locator chain to try for each field,
//! whether to visit detail pages, and the channel metadata for the resulting
//! feed. The built-in sites live in `sites.yaml` at the crate root and are
//! embedded at compile time; `--config` replaces them with a user file of the
//! same shape.
//!
//! All selectors, regexes, URLs and offsets are checked by
//! [`SiteConfig::validate`] when the file is loaded, so a typo fails at
//! startup instead of silently matching nothing halfway through a run.

use crate::dates::{parse_utc_offset, MonthLocale};
use chrono::FixedOffset;
use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

const BUILTIN_SITES: &str = include_str!("../sites.yaml");

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Errors raised while loading or validating site definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in site configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("site {site}: invalid URL \"{url}\": {source}")]
    InvalidUrl {
        site: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("site {site}: invalid CSS selector \"{selector}\": {reason}")]
    InvalidSelector {
        site: String,
        selector: String,
        reason: String,
    },

    #[error("site {site}: invalid regex \"{pattern}\": {source}")]
    InvalidRegex {
        site: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("site {site}: invalid UTC offset \"{offset}\" (expected e.g. +0100)")]
    InvalidOffset { site: String, offset: String },

    #[error("site {site}: {reason}")]
    Invalid { site: String, reason: String },

    #[error("unknown site \"{0}\"")]
    UnknownSite(String),

    #[error("site \"{0}\" is defined more than once")]
    DuplicateSite(String),
}

/// Top-level shape of a sites file.
#[derive(Debug, Clone, Deserialize)]
pub struct SitesFile {
    pub sites: Vec<SiteConfig>,
}

/// Everything the pipeline needs to know about one site.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Short identifier used on the command line.
    pub name: String,
    /// Base for resolving relative links and image URLs.
    pub base_url: String,
    /// Page (or API endpoint host page) listing the items. Defaults to `base_url`.
    #[serde(default)]
    pub listing_url: Option<String>,
    /// Output filename, written inside the output directory.
    pub output: String,
    pub channel: ChannelConfig,
    /// Items kept from the listing, in document order.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Offset stamped on every `pubDate`, e.g. `+0100`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub dates: DateConfig,
    pub source: Source,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub title: String,
    pub description: String,
    /// Channel `<link>`. Defaults to the listing URL.
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub generator: Option<String>,
    #[serde(default)]
    pub self_link: Option<String>,
}

/// Request settings for every fetch made on behalf of a site.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub accept: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            accept: None,
            accept_language: None,
        }
    }
}

/// Date parsing hints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateConfig {
    /// Month-name table tried before anything else.
    #[serde(default)]
    pub locale: Option<MonthLocale>,
    /// Explicit `strftime` layout order, replacing the built-in list.
    #[serde(default)]
    pub formats: Option<Vec<String>>,
}

/// Where items come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    /// Scrape an HTML listing page, optionally visiting each item's page.
    Html(ListingConfig),
    /// Map objects returned by a JSON endpoint.
    Api(ApiConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Container strategies; the first one that finds anything wins.
    pub containers: Vec<ContainerLocator>,
    #[serde(default)]
    pub fields: FieldSpecs,
    /// Plain-text body assembled from labelled parts, joined with ` | `.
    #[serde(default)]
    pub body_parts: Vec<BodyPart>,
    /// Title used when no title locator matches.
    #[serde(default = "default_untitled")]
    pub untitled: String,
    /// Use the title as the body when nothing else is available.
    #[serde(default)]
    pub title_as_description: bool,
    #[serde(default)]
    pub detail: Option<DetailConfig>,
}

/// Ordered locator chains, one per item field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSpecs {
    #[serde(default)]
    pub title: Vec<Locator>,
    #[serde(default)]
    pub link: Vec<Locator>,
    #[serde(default)]
    pub date: Vec<Locator>,
    #[serde(default)]
    pub label: Vec<Locator>,
    #[serde(default)]
    pub category: Vec<Locator>,
    #[serde(default)]
    pub image: Vec<Locator>,
    #[serde(default)]
    pub body: Vec<Locator>,
    #[serde(default)]
    pub author: Vec<Locator>,
}

/// A CSS selector from a site definition. Parsed on first use, which is
/// validation for loaded files; extraction reuses the parsed form.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "String")]
pub struct Css {
    source: String,
    #[serde(skip)]
    compiled: OnceCell<Result<Selector, String>>,
}

impl Css {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn compile(&self) -> Result<&Selector, &str> {
        self.compiled
            .get_or_init(|| Selector::parse(&self.source).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(String::as_str)
    }
}

impl From<String> for Css {
    fn from(source: String) -> Self {
        Self {
            source,
            compiled: OnceCell::new(),
        }
    }
}

impl From<&str> for Css {
    fn from(source: &str) -> Self {
        Self::from(source.to_string())
    }
}

impl fmt::Display for Css {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A regex matched against an element's class attribute, compiled once.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "String")]
pub struct ClassPattern {
    source: String,
    #[serde(skip)]
    compiled: OnceCell<Result<Regex, regex::Error>>,
}

impl ClassPattern {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn compile(&self) -> Result<&Regex, &regex::Error> {
        self.compiled
            .get_or_init(|| Regex::new(&self.source))
            .as_ref()
    }
}

impl From<String> for ClassPattern {
    fn from(source: String) -> Self {
        Self {
            source,
            compiled: OnceCell::new(),
        }
    }
}

impl From<&str> for ClassPattern {
    fn from(source: &str) -> Self {
        Self::from(source.to_string())
    }
}

/// Finds the item containers on a listing page.
///
/// With `css`, containers are the selector's matches. Otherwise every
/// element (below `within`, if set) whose tag equals `tag` and whose class
/// attribute matches the `class` regex is a container.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerLocator {
    /// Selector for the element that scopes the search, e.g. a table.
    #[serde(default)]
    pub within: Option<Css>,
    #[serde(default)]
    pub css: Option<Css>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub class: Option<ClassPattern>,
    /// Drop header rows: rows holding `th` cells or with a `head` class.
    #[serde(default)]
    pub skip_header: bool,
}

/// One strategy for pulling a value out of a container.
///
/// Element selection: `css` matches, else elements filtered by `tag` and the
/// `class` regex, else the container itself. The `nth` match is taken, then
/// `inner` descends into it. The value read is, in priority order, the CSS
/// `url(...)` in the style attribute (`style_url`), an attribute (`attr`),
/// the outer HTML (`html`), or the whitespace-collapsed text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Locator {
    #[serde(default)]
    pub css: Option<Css>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub class: Option<ClassPattern>,
    #[serde(default)]
    pub nth: usize,
    #[serde(default)]
    pub inner: Option<Css>,
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub html: bool,
    #[serde(default)]
    pub style_url: bool,
    /// Characters deleted from the value, e.g. `,` in `1,234`.
    #[serde(default)]
    pub remove: Option<String>,
    /// Truncate the value to this many characters.
    #[serde(default)]
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BodyPart {
    pub prefix: String,
    pub from: Vec<Locator>,
}

/// Visit each item's own page for its date and full content.
#[derive(Debug, Clone, Deserialize)]
pub struct DetailConfig {
    /// Element holding the article. When set but missing, the page is
    /// treated as having no date and an empty body.
    #[serde(default)]
    pub scope: Option<Css>,
    #[serde(default)]
    pub date: Vec<Locator>,
    pub body: BodyPolicy,
    /// Pause between consecutive detail fetches.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Body used when the detail page cannot be fetched.
    #[serde(default = "default_failure_body")]
    pub failure_body: String,
}

/// How the body HTML is pulled out of a detail page.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyPolicy {
    /// Walk the scope in document order, keeping elements whose tag is in
    /// `tags`, plus elements whose tag is in `containers` and that carry
    /// `marker_class`. If nothing is kept, the whole scope minus
    /// `style`/`script` is used instead.
    AllowList {
        tags: Vec<String>,
        #[serde(default)]
        containers: Vec<String>,
        #[serde(default)]
        marker_class: Option<String>,
    },
    /// First locator that matches, optionally falling back to the page text.
    Locators {
        locators: Vec<Locator>,
        #[serde(default)]
        page_text_fallback: bool,
    },
}

/// A JSON endpoint returning an array of item objects.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Endpoint, absolute or relative to `base_url`.
    pub url: String,
    /// JSON pointer to the array, e.g. `/data/posts`. Defaults to the root.
    #[serde(default)]
    pub items_path: Option<String>,
    pub fields: ApiFields,
}

/// Keys (or JSON pointers starting with `/`) of each field in an item object.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiFields {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Boolean flag; objects where it is not `true` are skipped.
    #[serde(default)]
    pub visible: Option<String>,
}

fn default_max_items() -> usize {
    10
}

fn default_utc_offset() -> String {
    "+0000".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_untitled() -> String {
    "Untitled".to_string()
}

fn default_delay_ms() -> u64 {
    500
}

fn default_failure_body() -> String {
    "Could not fetch article content.".to_string()
}

impl SiteConfig {
    pub fn listing_url(&self) -> &str {
        self.listing_url.as_deref().unwrap_or(&self.base_url)
    }

    pub fn channel_link(&self) -> &str {
        self.channel.link.as_deref().unwrap_or(self.listing_url())
    }

    pub fn base(&self) -> Result<Url, ConfigError> {
        self.parse_url(&self.base_url)
    }

    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.utc_offset).ok_or_else(|| ConfigError::InvalidOffset {
            site: self.name.clone(),
            offset: self.utc_offset.clone(),
        })
    }

    fn parse_url(&self, raw: &str) -> Result<Url, ConfigError> {
        Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            site: self.name.clone(),
            url: raw.to_string(),
            source,
        })
    }

    /// Check every URL, selector, regex and offset in this definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.base()?;
        self.parse_url(self.listing_url())?;
        self.offset()?;
        if self.max_items == 0 {
            return Err(self.invalid("max_items must be at least 1"));
        }
        if self.output.trim().is_empty() {
            return Err(self.invalid("output filename is empty"));
        }

        match &self.source {
            Source::Html(listing) => {
                if listing.containers.is_empty() {
                    return Err(self.invalid("at least one container locator is required"));
                }
                for container in &listing.containers {
                    self.check_css(container.within.as_ref())?;
                    self.check_css(container.css.as_ref())?;
                    self.check_regex(container.class.as_ref())?;
                    if container.css.is_none() && container.tag.is_none() && container.class.is_none() {
                        return Err(self.invalid("container locator needs css, tag or class"));
                    }
                }
                let f = &listing.fields;
                for chain in [
                    &f.title, &f.link, &f.date, &f.label, &f.category, &f.image, &f.body, &f.author,
                ] {
                    self.check_locators(chain)?;
                }
                for part in &listing.body_parts {
                    self.check_locators(&part.from)?;
                }
                if let Some(detail) = &listing.detail {
                    self.check_css(detail.scope.as_ref())?;
                    self.check_locators(&detail.date)?;
                    match &detail.body {
                        BodyPolicy::AllowList { tags, .. } if tags.is_empty() => {
                            return Err(self.invalid("allow_list body needs at least one tag"));
                        }
                        BodyPolicy::AllowList { .. } => {}
                        BodyPolicy::Locators { locators, .. } => self.check_locators(locators)?,
                    }
                }
            }
            Source::Api(api) => {
                base.join(&api.url).map_err(|source| ConfigError::InvalidUrl {
                    site: self.name.clone(),
                    url: api.url.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            site: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn check_locators(&self, chain: &[Locator]) -> Result<(), ConfigError> {
        for locator in chain {
            self.check_css(locator.css.as_ref())?;
            self.check_css(locator.inner.as_ref())?;
            self.check_regex(locator.class.as_ref())?;
        }
        Ok(())
    }

    fn check_css(&self, css: Option<&Css>) -> Result<(), ConfigError> {
        if let Some(css) = css {
            css.compile().map_err(|reason| ConfigError::InvalidSelector {
                site: self.name.clone(),
                selector: css.to_string(),
                reason: reason.to_string(),
            })?;
        }
        Ok(())
    }

    fn check_regex(&self, pattern: Option<&ClassPattern>) -> Result<(), ConfigError> {
        if let Some(pattern) = pattern {
            pattern.compile().map_err(|source| ConfigError::InvalidRegex {
                site: self.name.clone(),
                pattern: pattern.as_str().to_string(),
                source: source.clone(),
            })?;
        }
        Ok(())
    }
}

/// Parse and validate a YAML sites document.
pub fn parse_sites(yaml: &str) -> Result<Vec<SiteConfig>, ConfigError> {
    let file: SitesFile = serde_yaml::from_str(yaml)?;
    let mut seen = HashSet::new();
    for site in &file.sites {
        if !seen.insert(site.name.as_str()) {
            return Err(ConfigError::DuplicateSite(site.name.clone()));
        }
        site.validate()?;
    }
    debug!(count = file.sites.len(), "Parsed site definitions");
    Ok(file.sites)
}

/// The site definitions shipped with the binary.
pub fn builtin_sites() -> Result<Vec<SiteConfig>, ConfigError> {
    parse_sites(BUILTIN_SITES)
}

/// Load site definitions from a YAML file.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_sites(path: impl AsRef<Path>) -> Result<Vec<SiteConfig>, ConfigError> {
    let path = path.as_ref();
    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
    parse_sites(&yaml)
}

/// Keep the named sites, in the order requested. No names keeps them all.
pub fn select_sites(
    sites: Vec<SiteConfig>,
    names: &[String],
) -> Result<Vec<SiteConfig>, ConfigError> {
    if names.is_empty() {
        return Ok(sites);
    }
    names
        .iter()
        .map(|name| {
            sites
                .iter()
                .find(|s| &s.name == name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownSite(name.clone()))
        })
        .collect()
}
