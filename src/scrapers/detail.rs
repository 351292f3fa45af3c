//! Detail page scraping: the publication date and the full article body.

use crate::config::{BodyPolicy, DetailConfig};
use crate::extract::{
    escape_html, extract, extract_fragment, html_without_scripts, inner_html_without_scripts,
    page_text, selector, STRIPPED_ELEMENTS,
};
use crate::http::FetchClient;
use scraper::{ElementRef, Html};
use tracing::{debug, instrument, warn};

/// What a detail page contributes to its item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailPage {
    /// Raw date text, still to be normalized.
    pub date: Option<String>,
    /// Body HTML; empty when the page had nothing usable.
    pub body: String,
}

impl DetailPage {
    fn empty() -> Self {
        Self {
            date: None,
            body: String::new(),
        }
    }
}

/// Extract date and body from a detail page document.
///
/// When a scope selector is configured but absent from the page, the page
/// yields no date and an empty body.
pub fn parse_detail(html: &str, config: &DetailConfig) -> DetailPage {
    let document = Html::parse_document(html);
    let scope = match &config.scope {
        Some(css) => match selector(css).and_then(|sel| document.select(sel).next()) {
            Some(scope) => scope,
            None => {
                debug!(scope = %css, "Detail scope not found");
                return DetailPage::empty();
            }
        },
        None => document.root_element(),
    };

    let date = extract(scope, &config.date);
    let body = match &config.body {
        BodyPolicy::AllowList {
            tags,
            containers,
            marker_class,
        } => {
            let mut body = String::new();
            collect_allowed(scope, tags, containers, marker_class.as_deref(), &mut body);
            if body.is_empty() {
                inner_html_without_scripts(scope)
            } else {
                body
            }
        }
        BodyPolicy::Locators {
            locators,
            page_text_fallback,
        } => extract_fragment(scope, locators)
            .or_else(|| {
                page_text_fallback
                    .then(|| page_text(&document))
                    .filter(|text| !text.is_empty())
                    .map(|text| escape_html(&text))
            })
            .unwrap_or_default(),
    };

    DetailPage { date, body }
}

/// Depth-first walk keeping allowed elements whole.
///
/// A kept element is serialized with its descendants and not descended into
/// again, so nested allowed elements appear once.
fn collect_allowed(
    parent: ElementRef<'_>,
    tags: &[String],
    containers: &[String],
    marker_class: Option<&str>,
    out: &mut String,
) {
    for child in parent.children().filter_map(ElementRef::wrap) {
        let name = child.value().name();
        if STRIPPED_ELEMENTS.contains(&name) {
            continue;
        }
        let allowed = tags.iter().any(|t| t.eq_ignore_ascii_case(name));
        let marked = containers.iter().any(|t| t.eq_ignore_ascii_case(name))
            && marker_class.is_some_and(|marker| child.value().classes().any(|c| c == marker));

        if allowed || marked {
            out.push_str(&html_without_scripts(child));
        } else {
            collect_allowed(child, tags, containers, marker_class, out);
        }
    }
}

/// Fetch and parse one detail page.
///
/// A failed fetch is not fatal: the item keeps its listing fields and gets
/// the configured placeholder body.
#[instrument(level = "info", skip(client, config))]
pub async fn fetch_detail(client: &FetchClient, url: &str, config: &DetailConfig) -> DetailPage {
    match client.get_text(url).await {
        Ok(html) => parse_detail(&html, config),
        Err(e) => {
            warn!(error = %e, "Detail fetch failed");
            DetailPage {
                date: None,
                body: config.failure_body.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, Locator};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sparta_detail() -> DetailConfig {
        DetailConfig {
            scope: Some("article.single".into()),
            date: vec![Locator {
                css: Some("span.datetime".into()),
                ..Default::default()
            }],
            body: BodyPolicy::AllowList {
                tags: vec!["p".into(), "img".into(), "em".into()],
                containers: vec!["div".into()],
                marker_class: Some("gallery".into()),
            },
            delay_ms: 0,
            failure_body: "Could not fetch article content.".into(),
        }
    }

    const ARTICLE: &str = r#"<html><body>
        <article class="single">
          <header><span class="datetime">27 juni 2025 - 17:00</span></header>
          <style>.x { color: red }</style>
          <p>Eerste <em>alinea</em></p>
          <div class="text"><p>Tweede</p><script>track()</script></div>
          <div class="gallery big"><img src="/g/1.jpg"><span>foto</span></div>
          <img src="/hero.jpg">
        </article>
      </body></html>"#;

    #[test]
    fn test_allow_list_walk_in_document_order() {
        let page = parse_detail(ARTICLE, &sparta_detail());
        assert_eq!(page.date.as_deref(), Some("27 juni 2025 - 17:00"));
        assert_eq!(
            page.body,
            concat!(
                "<p>Eerste <em>alinea</em></p>",
                "<p>Tweede</p>",
                r#"<div class="gallery big"><img src="/g/1.jpg"><span>foto</span></div>"#,
                r#"<img src="/hero.jpg">"#,
            )
        );
    }

    #[test]
    fn test_allow_list_falls_back_to_whole_scope() {
        let html = r#"<article class="single"><h2>Kop</h2><script>x()</script><span>los</span></article>"#;
        let page = parse_detail(html, &sparta_detail());
        assert_eq!(page.body, "<h2>Kop</h2><span>los</span>");
        assert_eq!(page.date, None);
    }

    #[test]
    fn test_missing_scope_yields_empty_page() {
        let page = parse_detail("<html><body><p>elders</p></body></html>", &sparta_detail());
        assert_eq!(page, DetailPage::empty());
    }

    #[test]
    fn test_locator_policy_with_page_text_fallback() {
        let config = DetailConfig {
            scope: None,
            date: Vec::new(),
            body: BodyPolicy::Locators {
                locators: vec![Locator {
                    css: Some("div.entry-content".into()),
                    html: true,
                    ..Default::default()
                }],
                page_text_fallback: true,
            },
            delay_ms: 0,
            failure_body: String::new(),
        };

        let page = parse_detail(
            r#"<html><body><div class="entry-content"><p>Vol</p></div></body></html>"#,
            &config,
        );
        assert_eq!(page.body, r#"<div class="entry-content"><p>Vol</p></div>"#);

        let page = parse_detail("<html><body><p>A &amp; B</p></body></html>", &config);
        assert_eq!(page.body, "A &amp; B");
    }

    #[tokio::test]
    async fn test_fetch_detail_failure_uses_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = FetchClient::new(&HttpConfig::default()).unwrap();
        let page = fetch_detail(&client, &format!("{}/gone", server.uri()), &sparta_detail()).await;
        assert_eq!(page.date, None);
        assert_eq!(page.body, "Could not fetch article content.");
    }

    #[tokio::test]
    async fn test_fetch_detail_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nieuws/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
            .mount(&server)
            .await;

        let client = FetchClient::new(&HttpConfig::default()).unwrap();
        let page =
            fetch_detail(&client, &format!("{}/nieuws/a", server.uri()), &sparta_detail()).await;
        assert!(page.body.starts_with("<p>Eerste"));
    }
}
