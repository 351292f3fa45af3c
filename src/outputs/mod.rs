//! Output generation.
//!
//! - [`rss`]: renders a [`Feed`](crate::models::Feed) as RSS 2.0 and writes it to disk
//!
//! # Output Structure
//!
//! One file per site, named by the site definition, replaced wholesale on
//! every run that finds at least one item:
//!
//! ```text
//! output_dir/
//! ├── sparta_rss.xml
//! ├── sparta_kids_rss.xml
//! ├── kia_updates.xml
//! └── ui_blog_rss.xml
//! ```

pub mod rss;
