//! Field extraction from item containers.
//!
//! A field is described by an ordered chain of [`Locator`]s. Each locator is
//! a pure function `container -> Option<String>`; [`extract`] evaluates the
//! chain in order and keeps the first non-empty value. Container discovery
//! works the same way with [`ContainerLocator`] chains.
//!
//! Text values are whitespace-collapsed and trimmed. HTML values are the
//! serialized sub-tree, untouched.

use crate::config::{ClassPattern, ContainerLocator, Css, Locator};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::fmt::Write;
use tracing::warn;
use url::Url;

static STYLE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("valid style url regex")
});

static HEADER_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)head").expect("valid header regex"));

static HEADER_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th").expect("valid th selector"));

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements never copied into a description.
pub const STRIPPED_ELEMENTS: &[&str] = &["style", "script"];

/// The parsed form of a configured selector, logging instead of failing.
pub fn selector(css: &Css) -> Option<&Selector> {
    match css.compile() {
        Ok(sel) => Some(sel),
        Err(reason) => {
            warn!(selector = %css, reason, "Invalid CSS selector");
            None
        }
    }
}

fn class_regex(pattern: Option<&ClassPattern>) -> Result<Option<&Regex>, &regex::Error> {
    pattern.map(ClassPattern::compile).transpose()
}

fn matches_filters(el: &ElementRef<'_>, tag: Option<&str>, class: Option<&Regex>) -> bool {
    if let Some(tag) = tag {
        if !el.value().name().eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(re) = class {
        return el.value().attr("class").is_some_and(|c| re.is_match(c));
    }
    true
}

/// Elements below `scope` (not `scope` itself) passing the tag/class filters.
fn filtered_descendants<'a>(
    scope: ElementRef<'a>,
    tag: Option<&str>,
    class: Option<&Regex>,
) -> Vec<ElementRef<'a>> {
    scope
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|el| matches_filters(el, tag, class))
        .collect()
}

/// Whether a table row is a header row rather than data.
pub fn is_header_row(row: ElementRef<'_>) -> bool {
    row.value().name() == "thead"
        || row.select(&HEADER_CELL).next().is_some()
        || row.value().attr("class").is_some_and(|c| HEADER_CLASS.is_match(c))
}

fn containers_for<'a>(document: &'a Html, locator: &ContainerLocator) -> Vec<ElementRef<'a>> {
    let scope = match &locator.within {
        Some(css) => match selector(css).and_then(|sel| document.select(sel).next()) {
            Some(scope) => scope,
            None => return Vec::new(),
        },
        None => document.root_element(),
    };
    let Ok(class) = class_regex(locator.class.as_ref()) else {
        return Vec::new();
    };
    let tag = locator.tag.as_deref();

    let mut found: Vec<ElementRef<'a>> = match &locator.css {
        Some(css) => match selector(css) {
            Some(sel) => scope
                .select(sel)
                .filter(|el| matches_filters(el, tag, class))
                .collect(),
            None => Vec::new(),
        },
        None => filtered_descendants(scope, tag, class),
    };
    if locator.skip_header {
        found.retain(|row| !is_header_row(*row));
    }
    found
}

/// Item containers from the first strategy that finds any, in document order.
pub fn find_containers<'a>(document: &'a Html, chain: &[ContainerLocator]) -> Vec<ElementRef<'a>> {
    chain
        .iter()
        .map(|locator| containers_for(document, locator))
        .find(|found| !found.is_empty())
        .unwrap_or_default()
}

fn select_element<'a>(container: ElementRef<'a>, locator: &Locator) -> Option<ElementRef<'a>> {
    let class = class_regex(locator.class.as_ref()).ok()?;
    let tag = locator.tag.as_deref();

    let candidates = match &locator.css {
        Some(css) => {
            let sel = selector(css)?;
            container
                .select(sel)
                .filter(|el| matches_filters(el, tag, class))
                .collect::<Vec<_>>()
        }
        None if tag.is_some() || class.is_some() => filtered_descendants(container, tag, class),
        None => vec![container],
    };
    let element = candidates.into_iter().nth(locator.nth)?;

    match &locator.inner {
        Some(css) => element.select(selector(css)?).next(),
        None => Some(element),
    }
}

/// Text content with runs of whitespace collapsed to single spaces.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().split_whitespace().join(" ")
}

/// The payload of the first `url(...)` in an inline style attribute.
pub fn style_url(style: &str) -> Option<String> {
    STYLE_URL
        .captures(style)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|url| !url.is_empty())
}

/// Resolve a possibly relative reference against `base` (standard URL join).
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match base.join(href) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            warn!(%base, href, error = %e, "Could not resolve URL");
            None
        }
    }
}

/// Apply a single locator to a container.
pub fn apply(container: ElementRef<'_>, locator: &Locator) -> Option<String> {
    let el = select_element(container, locator)?;

    let mut value = if locator.style_url {
        style_url(el.value().attr("style")?)?
    } else if let Some(attr) = &locator.attr {
        el.value().attr(attr)?.trim().to_string()
    } else if locator.html {
        html_without_scripts(el)
    } else {
        element_text(el)
    };

    if let Some(chars) = &locator.remove {
        value.retain(|c| !chars.contains(c));
    }
    if let Some(max) = locator.max_chars {
        if let Some((idx, _)) = value.char_indices().nth(max) {
            value.truncate(idx);
        }
    }
    if !locator.html {
        value = value.trim().to_string();
    }

    (!value.trim().is_empty()).then_some(value)
}

/// First non-empty value produced by the chain, or `None`.
pub fn extract(container: ElementRef<'_>, chain: &[Locator]) -> Option<String> {
    chain.iter().find_map(|locator| apply(container, locator))
}

/// Like [`extract`], but text values are HTML-escaped so the result is
/// always safe to embed as a fragment.
pub fn extract_fragment(container: ElementRef<'_>, chain: &[Locator]) -> Option<String> {
    chain.iter().find_map(|locator| {
        apply(container, locator).map(|value| {
            if locator.html {
                value
            } else {
                escape_html(&value)
            }
        })
    })
}

/// Like [`extract`], resolving the value against `base`.
pub fn extract_url(container: ElementRef<'_>, chain: &[Locator], base: &Url) -> Option<String> {
    extract(container, chain).and_then(|href| resolve_url(base, &href))
}

/// Escape text for inclusion in HTML element content.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape text for inclusion in a double-quoted HTML attribute.
pub fn escape_attr(text: &str) -> String {
    escape_html(text).replace('"', "&quot;")
}

fn write_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if STRIPPED_ELEMENTS.contains(&name) {
        return;
    }
    out.push('<');
    out.push_str(name);
    for (key, value) in el.value().attrs() {
        let _ = write!(out, " {key}=\"{}\"", escape_attr(value));
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    write_children(el, out);
    let _ = write!(out, "</{name}>");
}

fn write_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&escape_html(text));
        } else if let Some(child) = ElementRef::wrap(child) {
            write_element(child, out);
        }
    }
}

/// Outer HTML of `el` with every `style` and `script` sub-tree removed.
pub fn html_without_scripts(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    write_element(el, &mut out);
    out
}

/// Inner HTML of `el` with every `style` and `script` sub-tree removed.
pub fn inner_html_without_scripts(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    write_children(el, &mut out);
    out
}

/// Visible text of a whole document, ignoring `style` and `script`.
pub fn page_text(document: &Html) -> String {
    document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let inside_stripped = node.ancestors().filter_map(ElementRef::wrap).any(|a| {
                STRIPPED_ELEMENTS.contains(&a.value().name())
            });
            (!inside_stripped).then_some(&**text)
        })
        .join(" ")
        .split_whitespace()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Locator {
        Locator::default()
    }

    fn first<'a>(doc: &'a Html, css: &str) -> ElementRef<'a> {
        doc.select(&Selector::parse(css).unwrap()).next().unwrap()
    }

    const SPARTA_ITEM: &str = r#"
        <article class="news_item" style="background-image:url(http://x/y.jpg)">
            <a class="item_link" href="/a">
                <h3>  Title
                   A </h3>
                <span class="item_label">Label</span>
            </a>
        </article>"#;

    #[test]
    fn test_text_locator_collapses_whitespace() {
        let doc = Html::parse_fragment(SPARTA_ITEM);
        let container = first(&doc, "article");
        let chain = vec![Locator { css: Some("h3".into()), ..loc() }];
        assert_eq!(extract(container, &chain).as_deref(), Some("Title A"));
    }

    #[test]
    fn test_chain_falls_through_to_first_non_empty() {
        let doc = Html::parse_fragment(r#"<div><h2>  </h2><h3>Fallback</h3></div>"#);
        let container = first(&doc, "div");
        let chain = vec![
            Locator { css: Some("h1".into()), ..loc() },
            Locator { css: Some("h2".into()), ..loc() },
            Locator { css: Some("h3".into()), ..loc() },
        ];
        assert_eq!(extract(container, &chain).as_deref(), Some("Fallback"));
    }

    #[test]
    fn test_chain_absent_when_nothing_matches() {
        let doc = Html::parse_fragment("<div><p>x</p></div>");
        let container = first(&doc, "div");
        let chain = vec![Locator { css: Some("h1".into()), ..loc() }];
        assert_eq!(extract(container, &chain), None);
        assert_eq!(extract(container, &[]), None);
    }

    #[test]
    fn test_attr_locator_and_url_resolution() {
        let doc = Html::parse_fragment(SPARTA_ITEM);
        let container = first(&doc, "article");
        let base = Url::parse("https://site/").unwrap();
        let chain = vec![Locator {
            css: Some("a.item_link".into()),
            attr: Some("href".into()),
            ..loc()
        }];
        assert_eq!(extract_url(container, &chain, &base).as_deref(), Some("https://site/a"));
    }

    #[test]
    fn test_style_url_on_container_itself() {
        let doc = Html::parse_fragment(SPARTA_ITEM);
        let container = first(&doc, "article");
        let chain = vec![Locator { style_url: true, ..loc() }];
        assert_eq!(extract(container, &chain).as_deref(), Some("http://x/y.jpg"));
    }

    #[test]
    fn test_style_url_variants() {
        assert_eq!(style_url("background-image:url(http://x/y.jpg)").as_deref(), Some("http://x/y.jpg"));
        assert_eq!(style_url("background: url('/img/a.png') no-repeat").as_deref(), Some("/img/a.png"));
        assert_eq!(style_url(r#"background: url( "b.webp" )"#).as_deref(), Some("b.webp"));
        assert_eq!(style_url("color: red"), None);
        assert_eq!(style_url("background: url()"), None);
    }

    #[test]
    fn test_resolve_url_join_semantics() {
        let base = Url::parse("https://www.sparta-rotterdam.nl/kidsclub/").unwrap();
        assert_eq!(
            resolve_url(&base, "/nieuws/a").as_deref(),
            Some("https://www.sparta-rotterdam.nl/nieuws/a")
        );
        assert_eq!(
            resolve_url(&base, "nieuws/a").as_deref(),
            Some("https://www.sparta-rotterdam.nl/kidsclub/nieuws/a")
        );
        assert_eq!(
            resolve_url(&base, "https://other.example/x").as_deref(),
            Some("https://other.example/x")
        );
        assert_eq!(
            resolve_url(&base, "//cdn.example/i.jpg").as_deref(),
            Some("https://cdn.example/i.jpg")
        );
        assert_eq!(resolve_url(&base, "  "), None);
    }

    #[test]
    fn test_class_regex_nth_and_inner() {
        let doc = Html::parse_fragment(
            r#"<div class="row body">
                 <div class="col-1">Navigation</div>
                 <div class="col-2"><a href="/notice/7">Map update Q3</a></div>
                 <div class="col-3">09-Jul-2025</div>
                 <div class="col-4">1,234</div>
               </div>"#,
        );
        let row = first(&doc, "div.row");
        let col = |nth: usize| Locator {
            tag: Some("div".into()),
            class: Some("col-".into()),
            nth,
            ..loc()
        };

        assert_eq!(apply(row, &col(0)).as_deref(), Some("Navigation"));
        assert_eq!(
            apply(row, &Locator { inner: Some("a".into()), ..col(1) }).as_deref(),
            Some("Map update Q3")
        );
        assert_eq!(
            apply(row, &Locator { inner: Some("a".into()), attr: Some("href".into()), ..col(1) })
                .as_deref(),
            Some("/notice/7")
        );
        assert_eq!(apply(row, &col(2)).as_deref(), Some("09-Jul-2025"));
        assert_eq!(
            apply(row, &Locator { remove: Some(",".into()), ..col(3) }).as_deref(),
            Some("1234")
        );
        assert_eq!(apply(row, &col(4)), None);
    }

    #[test]
    fn test_html_locator_preserves_markup() {
        let doc = Html::parse_fragment(
            r#"<section><div class="entry-content"><p>Hi <b>there</b> &amp; bye</p></div></section>"#,
        );
        let container = first(&doc, "section");
        let chain = vec![Locator {
            css: Some("div.entry-content".into()),
            html: true,
            ..loc()
        }];
        assert_eq!(
            extract(container, &chain).as_deref(),
            Some(r#"<div class="entry-content"><p>Hi <b>there</b> &amp; bye</p></div>"#)
        );
    }

    #[test]
    fn test_html_locator_drops_scripts_and_styles() {
        let doc = Html::parse_fragment(
            r#"<section><div class="entry-content"><style>.a{}</style><p>Text</p><script>track()</script></div></section>"#,
        );
        let container = first(&doc, "section");
        let chain = vec![Locator {
            css: Some("div.entry-content".into()),
            html: true,
            ..loc()
        }];
        assert_eq!(
            extract_fragment(container, &chain).as_deref(),
            Some(r#"<div class="entry-content"><p>Text</p></div>"#)
        );
    }

    #[test]
    fn test_max_chars_truncates_on_char_boundary() {
        let doc = Html::parse_fragment("<div><p>één twee drie</p></div>");
        let container = first(&doc, "div");
        let chain = vec![Locator { css: Some("p".into()), max_chars: Some(3), ..loc() }];
        assert_eq!(extract(container, &chain).as_deref(), Some("één"));
    }

    #[test]
    fn test_find_containers_first_strategy_with_results_wins() {
        let doc = Html::parse_document(
            r#"<html><body>
                 <div class="blog-post">one</div>
                 <div class="card">two</div>
                 <div class="POST big">three</div>
               </body></html>"#,
        );
        let chain = vec![
            ContainerLocator { css: Some("article".into()), ..Default::default() },
            ContainerLocator {
                tag: Some("div".into()),
                class: Some("(?i)post|article|entry|blog-post".into()),
                ..Default::default()
            },
            ContainerLocator {
                tag: Some("div".into()),
                class: Some("(?i)card".into()),
                ..Default::default()
            },
        ];
        let found: Vec<String> = find_containers(&doc, &chain)
            .into_iter()
            .map(element_text)
            .collect();
        assert_eq!(found, vec!["one", "three"]);
    }

    #[test]
    fn test_find_containers_skips_header_rows() {
        let doc = Html::parse_document(
            r#"<table id="t">
                 <tr><th>Type</th><th>Title</th></tr>
                 <tr><td>Nav</td><td>A</td></tr>
                 <tr><td>Map</td><td>B</td></tr>
               </table>"#,
        );
        let chain = vec![ContainerLocator {
            within: Some("table#t".into()),
            css: Some("tr".into()),
            skip_header: true,
            ..Default::default()
        }];
        let rows = find_containers(&doc, &chain);
        assert_eq!(rows.len(), 2);
        assert!(element_text(rows[0]).starts_with("Nav"));
    }

    #[test]
    fn test_find_containers_div_table_with_header_class() {
        let doc = Html::parse_document(
            r#"<div class="tbl">
                 <div class="row head"><div class="col-1">Category</div></div>
                 <div class="row body"><div class="col-1">Nav</div></div>
                 <div class="row body"><div class="col-1">Map</div></div>
               </div>"#,
        );
        let chain = vec![ContainerLocator {
            within: Some("div.tbl".into()),
            tag: Some("div".into()),
            class: Some("^row".into()),
            skip_header: true,
            ..Default::default()
        }];
        assert_eq!(find_containers(&doc, &chain).len(), 2);
    }

    #[test]
    fn test_find_containers_missing_scope() {
        let doc = Html::parse_document("<div><p>x</p></div>");
        let chain = vec![ContainerLocator {
            within: Some("div.tbl".into()),
            css: Some("p".into()),
            ..Default::default()
        }];
        assert!(find_containers(&doc, &chain).is_empty());
    }

    #[test]
    fn test_inner_html_without_scripts() {
        let doc = Html::parse_fragment(
            r#"<article><style>.x{}</style><p class="a">One &amp; <img src="i.jpg"></p><script>alert(1)</script><em>two</em></article>"#,
        );
        let article = first(&doc, "article");
        assert_eq!(
            inner_html_without_scripts(article),
            r#"<p class="a">One &amp; <img src="i.jpg"></p><em>two</em>"#
        );
    }

    #[test]
    fn test_html_without_scripts_keeps_outer_element() {
        let doc = Html::parse_fragment(r#"<div><p>a<script>x()</script><em>b</em></p></div>"#);
        let p = first(&doc, "p");
        assert_eq!(html_without_scripts(p), "<p>a<em>b</em></p>");
    }

    #[test]
    fn test_extract_fragment_escapes_text_only() {
        let doc = Html::parse_fragment(r#"<div><p>1 &lt; 2</p><section><b>x</b></section></div>"#);
        let container = first(&doc, "div");
        let text = vec![Locator { css: Some("p".into()), ..loc() }];
        assert_eq!(extract_fragment(container, &text).as_deref(), Some("1 &lt; 2"));
        let html = vec![Locator { css: Some("section".into()), html: true, ..loc() }];
        assert_eq!(
            extract_fragment(container, &html).as_deref(),
            Some("<section><b>x</b></section>")
        );
    }

    #[test]
    fn test_page_text_ignores_scripts() {
        let doc = Html::parse_document(
            "<html><head><style>p{}</style></head><body><p>Hello</p><script>x()</script><p>world</p></body></html>",
        );
        assert_eq!(page_text(&doc), "Hello world");
    }

    #[test]
    fn test_escape_helpers() {
        assert_eq!(escape_html("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
    }
}
