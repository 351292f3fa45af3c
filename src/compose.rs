//! Description assembly.
//!
//! The description of every item is built in one fixed order: the label as
//! `<strong>` text, then the lead image, then the body HTML, each of the first
//! two followed by a `<br>`. Nothing is reordered and the body is not checked
//! for an image it may already contain.

use crate::extract::{escape_attr, escape_html};

/// Compose the HTML description of an item.
///
/// ```ignore
/// let html = compose(Some("Label"), Some("http://x/y.jpg"), "<p>Body</p>");
/// assert_eq!(html, r#"<strong>Label</strong><br><img src="http://x/y.jpg"><br><p>Body</p>"#);
/// ```
pub fn compose(label: Option<&str>, image_url: Option<&str>, body_html: &str) -> String {
    let mut html = String::new();
    if let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) {
        html.push_str("<strong>");
        html.push_str(&escape_html(label));
        html.push_str("</strong><br>");
    }
    if let Some(src) = image_url.map(str::trim).filter(|s| !s.is_empty()) {
        html.push_str("<img src=\"");
        html.push_str(&escape_attr(src));
        html.push_str("\"><br>");
    }
    html.push_str(body_html);
    html
}

/// Join labelled plain-text parts with ` | `, skipping absent ones.
///
/// The result is escaped so it can be used as a body fragment.
pub fn join_parts<'a, I>(parts: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, Option<String>)>,
{
    let joined = parts
        .into_iter()
        .filter_map(|(prefix, value)| value.map(|v| format!("{prefix}{v}")))
        .collect::<Vec<_>>()
        .join(" | ");
    (!joined.is_empty()).then(|| escape_html(&joined))
}
