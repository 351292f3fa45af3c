//! Command-line interface definitions for pagefeed.
//!
//! All options can be provided via command-line flags or environment variables.

use clap::Parser;

/// Scrape news, update and blog listings into RSS 2.0 feeds.
///
/// # Examples
///
/// ```sh
/// # Every built-in site, feeds written to the current directory
/// pagefeed
///
/// # Two sites into a web root
/// pagefeed -o /var/www/feeds -s sparta -s sparta_kids
///
/// # Custom site definitions
/// pagefeed --config ./sites.yaml --list-sites
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory the feed files are written to
    #[arg(short, long, env = "PAGEFEED_OUTPUT_DIR", default_value = ".")]
    pub output_dir: String,

    /// YAML file of site definitions, replacing the built-in sites
    #[arg(short, long, env = "PAGEFEED_CONFIG")]
    pub config: Option<String>,

    /// Site to scrape; repeat for several (default: every configured site)
    #[arg(short, long = "site")]
    pub site: Vec<String>,

    /// Print the configured site names and exit
    #[arg(long)]
    pub list_sites: bool,
}
