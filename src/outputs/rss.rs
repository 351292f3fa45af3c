//! RSS 2.0 rendering and the feed file writer.
//!
//! Plain-text values are written as escaped XML text. Values carrying markup
//! go into CDATA sections instead, so an HTML description reaches the feed
//! reader unmodified. A CDATA payload containing `]]>` is split across
//! adjacent sections; concatenating the sections yields the original bytes.

use crate::dates::rfc822;
use crate::models::{ChannelMeta, Feed, Item};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use regex::Regex;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument, warn};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

static MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid markup regex"));

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#[0-9]+|#x[0-9A-Fa-f]+|[A-Za-z][A-Za-z0-9]*);").expect("valid entity regex")
});

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to write XML: {0}")]
    Xml(#[from] io::Error),

    #[error("rendered XML is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// How a field value is put into the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Content {
    /// Text that may contain tags.
    Text,
    /// An HTML fragment; entity references also count as markup.
    Html,
}

fn needs_cdata(value: &str, content: Content) -> bool {
    MARKUP.is_match(value) || (content == Content::Html && ENTITY.is_match(value))
}

fn write_cdata<W: io::Write>(writer: &mut Writer<W>, value: &str) -> io::Result<()> {
    let mut rest = value;
    while let Some(pos) = rest.find("]]>") {
        writer.write_event(Event::CData(BytesCData::new(&rest[..pos + 2])))?;
        rest = &rest[pos + 2..];
    }
    writer.write_event(Event::CData(BytesCData::new(rest)))
}

fn write_element<W: io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
    content: Content,
) -> io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    if needs_cdata(value, content) {
        write_cdata(writer, value)?;
    } else {
        writer.write_event(Event::Text(BytesText::new(value)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))
}

fn write_optional<W: io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: Option<&str>,
) -> io::Result<()> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => write_element(writer, name, v, Content::Text),
        None => Ok(()),
    }
}

fn write_channel_meta<W: io::Write>(writer: &mut Writer<W>, meta: &ChannelMeta) -> io::Result<()> {
    write_element(writer, "title", &meta.title, Content::Text)?;
    write_element(writer, "link", &meta.link, Content::Text)?;
    write_element(writer, "description", &meta.description, Content::Html)?;
    write_optional(writer, "language", meta.language.as_deref())?;
    write_element(writer, "lastBuildDate", &rfc822(&meta.built_at), Content::Text)?;
    write_optional(writer, "generator", meta.generator.as_deref())?;
    if let Some(href) = &meta.self_link {
        let mut link = BytesStart::new("atom:link");
        link.push_attribute(("href", href.as_str()));
        link.push_attribute(("rel", "self"));
        link.push_attribute(("type", "application/rss+xml"));
        writer.write_event(Event::Empty(link))?;
    }
    Ok(())
}

/// MIME type guessed from the image URL's extension.
fn image_mime_type(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("avif") => "image/avif",
        _ => "image/jpeg",
    }
}

fn write_item<W: io::Write>(writer: &mut Writer<W>, item: &Item) -> io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;
    write_element(writer, "title", &item.title, Content::Text)?;
    write_element(writer, "link", &item.link, Content::Text)?;
    write_element(writer, "description", &item.description, Content::Html)?;
    write_element(writer, "pubDate", &rfc822(&item.published_at), Content::Text)?;

    let (id, permalink) = match &item.guid {
        Some(id) => (id.as_str(), "false"),
        None => (item.link.as_str(), "true"),
    };
    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", permalink));
    writer.write_event(Event::Start(guid))?;
    writer.write_event(Event::Text(BytesText::new(id)))?;
    writer.write_event(Event::End(BytesEnd::new("guid")))?;

    write_optional(writer, "category", item.category.as_deref())?;
    write_optional(writer, "author", item.author.as_deref())?;
    if let Some(url) = &item.image_url {
        let mut enclosure = BytesStart::new("enclosure");
        enclosure.push_attribute(("url", url.as_str()));
        enclosure.push_attribute(("length", "0"));
        enclosure.push_attribute(("type", image_mime_type(url)));
        writer.write_event(Event::Empty(enclosure))?;
    }
    writer.write_event(Event::End(BytesEnd::new("item")))
}

fn write_document<W: io::Write>(writer: &mut Writer<W>, feed: &Feed) -> io::Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    if feed.channel.self_link.is_some() {
        rss.push_attribute(("xmlns:atom", ATOM_NS));
    }
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    write_channel_meta(writer, &feed.channel)?;
    for item in &feed.items {
        write_item(writer, item)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))
}

/// Render `feed` as an RSS 2.0 document, indented when `pretty`.
pub fn render(feed: &Feed, pretty: bool) -> Result<String, FeedError> {
    let mut writer = if pretty {
        Writer::new_with_indent(Vec::new(), b' ', 2)
    } else {
        Writer::new(Vec::new())
    };
    write_document(&mut writer, feed)?;
    let mut xml = String::from_utf8(writer.into_inner())?;
    xml.push('\n');
    Ok(xml)
}

/// Render `feed`, falling back to unindented output if pretty-printing fails.
pub fn serialize(feed: &Feed) -> Result<String, FeedError> {
    render(feed, true).or_else(|e| {
        warn!(error = %e, "Pretty-printing failed; writing unformatted XML");
        render(feed, false)
    })
}

/// Replace the file at `path` with `xml` in a single write.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn write_feed(path: impl AsRef<Path>, xml: &str) -> Result<(), Box<dyn std::error::Error>> {
    tokio::fs::write(path.as_ref(), xml).await?;
    info!(bytes = xml.len(), "Wrote feed");
    Ok(())
}
