//! # pagefeed
//!
//! Turns websites without a feed into RSS 2.0 feeds. Each configured site is
//! scraped (an HTML listing page, optionally one detail page per item, or a
//! JSON endpoint), its items are normalized, and one RSS file per site is
//! written to the output directory.
//!
//! ## Usage
//!
//! ```sh
//! pagefeed -o ./feeds
//! pagefeed -o ./feeds -s sparta -s kia_updates
//! pagefeed --config my_sites.yaml
//! ```
//!
//! ## Architecture
//!
//! The application runs one pipeline per site, sites one after another:
//! 1. **Collecting**: fetch the listing, locate item containers, extract fields
//!    (see [`scrapers`])
//! 2. **Normalizing**: parse dates into the site's offset, resolve URLs, compose
//!    HTML descriptions (see [`dates`], [`extract`], [`compose`])
//! 3. **Output**: render RSS 2.0 and replace the site's feed file (see [`outputs`])
//!
//! A site that yields no items leaves its previous feed file untouched.

use chrono::{DateTime, FixedOffset};
use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod compose;
mod config;
mod dates;
mod extract;
mod http;
mod models;
mod outputs;
mod scrapers;
mod utils;

use cli::Cli;
use config::{builtin_sites, load_sites, select_sites, SiteConfig};
use http::FetchClient;
use models::{ChannelMeta, Feed};
use outputs::rss;
use scrapers::SiteContext;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("pagefeed starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // ---- Load site definitions ----
    let sites = match &args.config {
        Some(path) => load_sites(path).await?,
        None => builtin_sites()?,
    };
    info!(count = sites.len(), source = args.config.as_deref().unwrap_or("built-in"), "Loaded site definitions");

    if args.list_sites {
        for site in &sites {
            println!("{}\t{}\t{}", site.name, site.output, site.listing_url());
        }
        return Ok(());
    }

    let sites = select_sites(sites, &args.site)?;

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Run each site ----
    let mut written = 0usize;
    for site in &sites {
        match run_site(site, Path::new(&args.output_dir)).await {
            Ok(Some(_)) => written += 1,
            Ok(None) => {}
            Err(e) => error!(site = %site.name, error = %e, "Site run failed"),
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        sites = sites.len(),
        feeds_written = written,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

/// Channel metadata for a site, stamped with the generation time.
fn channel_meta(site: &SiteConfig, built_at: DateTime<FixedOffset>) -> ChannelMeta {
    ChannelMeta {
        title: site.channel.title.clone(),
        link: site.channel_link().to_string(),
        description: site.channel.description.clone(),
        language: site.channel.language.clone(),
        generator: site.channel.generator.clone(),
        self_link: site.channel.self_link.clone(),
        built_at,
    }
}

/// Collect one site and write its feed.
///
/// Returns the path written, or `None` when no items were found, in which
/// case nothing is written.
#[instrument(level = "info", skip_all, fields(site = %site.name))]
async fn run_site(site: &SiteConfig, output_dir: &Path) -> Result<Option<PathBuf>, Box<dyn Error>> {
    let context = SiteContext::new(site)?;
    let client = FetchClient::new(&site.http)?;

    let items = scrapers::collect(&context, &client).await;
    let feed = Feed::new(channel_meta(site, context.dates.now()), items);
    if feed.is_empty() {
        error!(url = %site.listing_url(), "No items found; feed not written");
        return Ok(None);
    }

    let xml = rss::serialize(&feed)?;
    let path = output_dir.join(&site.output);
    rss::write_feed(&path, &xml).await?;
    info!(path = %path.display(), items = feed.items.len(), "RSS feed generated");
    Ok(Some(path))
}
