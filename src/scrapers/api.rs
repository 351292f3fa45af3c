//! JSON endpoints: one object per item, mapped through configured keys.

use super::SiteContext;
use crate::compose::compose;
use crate::config::{ApiConfig, ApiFields};
use crate::extract::{escape_html, resolve_url};
use crate::http::FetchClient;
use crate::models::{fallback_guid, Item};
use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

/// Look up a field by plain key, or by JSON pointer when it starts with `/`.
fn lookup<'v>(object: &'v Value, key: &str) -> Option<&'v Value> {
    if key.starts_with('/') {
        object.pointer(key)
    } else {
        object.get(key)
    }
}

/// A scalar field rendered as trimmed text; empty strings count as absent.
fn text(object: &Value, key: Option<&str>) -> Option<String> {
    let value = match lookup(object, key?)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

fn is_visible(object: &Value, key: Option<&str>) -> bool {
    let Some(key) = key else {
        return true;
    };
    match lookup(object, key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Map the objects of a decoded response into items, in response order.
pub fn map_items(site: &SiteContext<'_>, api: &ApiConfig, payload: &Value) -> Vec<Item> {
    let array = match api.items_path.as_deref() {
        Some(pointer) => payload.pointer(pointer),
        None => Some(payload),
    }
    .and_then(Value::as_array);

    let Some(objects) = array else {
        warn!(items_path = ?api.items_path, "Response holds no item array");
        return Vec::new();
    };

    objects
        .iter()
        .filter(|object| is_visible(object, api.fields.visible.as_deref()))
        .take(site.config.max_items)
        .filter_map(|object| map_item(site, &api.fields, object))
        .collect()
}

fn map_item(site: &SiteContext<'_>, fields: &ApiFields, object: &Value) -> Option<Item> {
    let title = text(object, Some(fields.title.as_str()));
    let link = text(object, Some(fields.link.as_str())).and_then(|href| resolve_url(&site.base, &href));
    if title.is_none() && link.is_none() {
        debug!("Skipping object without title or link");
        return None;
    }

    let published_at = match fields.date.as_deref().and_then(|key| lookup(object, key)) {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|ts| ts.with_timezone(&site.dates.now().timezone()))
            .unwrap_or_else(|| site.dates.now()),
        Some(Value::String(raw)) => site.dates.parse(raw),
        _ => site.dates.now(),
    };
    let image_url = text(object, fields.image.as_deref()).and_then(|src| resolve_url(&site.base, &src));
    let title = title.unwrap_or_else(|| "Untitled".to_string());
    let body = text(object, fields.body.as_deref()).unwrap_or_else(|| escape_html(&title));
    let listing_url = site.config.listing_url();
    let guid = link.is_none().then(|| fallback_guid(listing_url, &title));

    Some(Item {
        link: link.unwrap_or_else(|| listing_url.to_string()),
        guid,
        description: compose(None, image_url.as_deref(), &body),
        title,
        published_at,
        category: text(object, fields.category.as_deref()),
        image_url,
        author: text(object, fields.author.as_deref()),
    })
}

/// Fetch the endpoint and map its objects. A failed fetch yields no items.
#[instrument(level = "info", skip_all, fields(url = %api.url))]
pub async fn collect(site: &SiteContext<'_>, api: &ApiConfig, client: &FetchClient) -> Vec<Item> {
    let Some(url) = resolve_url(&site.base, &api.url) else {
        error!("Endpoint URL does not resolve");
        return Vec::new();
    };
    match client.get_json(&url).await {
        Ok(payload) => map_items(site, api, &payload),
        Err(e) => {
            error!(error = %e, "API fetch failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, SiteConfig, Source};
    use crate::scrapers::test_support::site_from_yaml;
    use chrono::{Datelike, Timelike};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_site(base: &str) -> SiteConfig {
        site_from_yaml(&format!(
            r#"
sites:
  - name: blog
    base_url: {base}
    output: blog.xml
    max_items: 2
    channel:
      title: Blog
      description: Blog posts
    source:
      kind: api
      url: /api/posts
      items_path: /data/posts
      fields:
        title: title
        link: slug
        date: published_at
        body: /content/html
        image: /cover/url
        category: tag
        visible: is_public
"#
        ))
    }

    fn api_config(config: &SiteConfig) -> &ApiConfig {
        match &config.source {
            Source::Api(api) => api,
            Source::Html(_) => panic!("expected an api source"),
        }
    }

    fn payload() -> Value {
        json!({
            "data": { "posts": [
                {
                    "title": "Hidden",
                    "slug": "/hidden",
                    "is_public": false
                },
                {
                    "title": "First",
                    "slug": "/posts/first",
                    "published_at": "2025-02-01T08:00:00Z",
                    "content": { "html": "<p>Body</p>" },
                    "cover": { "url": "/img/first.png" },
                    "tag": "Release",
                    "is_public": true
                },
                {
                    "title": "Second",
                    "slug": "https://elsewhere.example/second",
                    "published_at": 1735689600,
                    "is_public": 1
                },
                {
                    "title": "Third",
                    "slug": "/third",
                    "is_public": true
                }
            ]}
        })
    }

    #[test]
    fn test_map_items_filters_caps_and_maps() {
        let config = api_site("https://blog.example/");
        let site = SiteContext::new(&config).unwrap();
        let items = map_items(&site, api_config(&config), &payload());

        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);

        let first = &items[0];
        assert_eq!(first.link, "https://blog.example/posts/first");
        assert_eq!(first.guid, None);
        assert_eq!(
            first.description,
            r#"<img src="https://blog.example/img/first.png"><br><p>Body</p>"#
        );
        assert_eq!(first.category.as_deref(), Some("Release"));
        assert_eq!((first.published_at.month(), first.published_at.hour()), (2, 8));

        let second = &items[1];
        assert_eq!(second.link, "https://elsewhere.example/second");
        assert_eq!(second.description, "Second");
        assert_eq!(second.published_at.year(), 2025);
        assert_eq!(second.published_at.day(), 1);
    }

    #[test]
    fn test_object_without_link_gets_fallback_guid() {
        let config = api_site("https://blog.example/");
        let site = SiteContext::new(&config).unwrap();
        let payload = json!({ "data": { "posts": [
            { "title": "No slug", "is_public": true },
            { "title": "Also no slug", "is_public": true }
        ]}});
        let items = map_items(&site, api_config(&config), &payload);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link, config.listing_url());
        assert_eq!(
            items[0].guid.as_deref(),
            Some(fallback_guid(config.listing_url(), "No slug").as_str())
        );
        assert_ne!(items[0].guid, items[1].guid);
    }

    #[test]
    fn test_map_items_without_array() {
        let config = api_site("https://blog.example/");
        let site = SiteContext::new(&config).unwrap();
        assert!(map_items(&site, api_config(&config), &json!({ "data": {} })).is_empty());
    }

    #[tokio::test]
    async fn test_collect_from_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload()))
            .mount(&server)
            .await;

        let config = api_site(&format!("{}/", server.uri()));
        let site = SiteContext::new(&config).unwrap();
        let client = FetchClient::new(&HttpConfig::default()).unwrap();
        let items = collect(&site, api_config(&config), &client).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_collect_endpoint_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = api_site(&format!("{}/", server.uri()));
        let site = SiteContext::new(&config).unwrap();
        let client = FetchClient::new(&HttpConfig::default()).unwrap();
        assert!(collect(&site, api_config(&config), &client).await.is_empty());
    }
}
