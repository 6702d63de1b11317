use serde_json::Value;
use tracing::warn;
use url::{Origin, Url};

use super::GraphTransport;
use crate::error::ConnectorError;
use crate::utils::{collect_paginated_with_cursor, Collected, Page};

pub const DEFAULT_MAX_REQUESTS: usize = 20;

/// Items of a Graph collection response (`value` array).
pub fn page_values(body: &Value) -> Vec<Value> {
    body.get("value")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

pub fn next_link(body: &Value) -> Option<String> {
    body.get("@odata.nextLink")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A next link is only followed when it points at the same origin as the
/// first page; the transport attaches the bearer token to every request.
fn same_origin(link: &str, origin: Option<&Origin>) -> bool {
    match (origin, Url::parse(link)) {
        (Some(origin), Ok(url)) => url.origin() == *origin,
        _ => false,
    }
}

/// Follows `@odata.nextLink` from `first_url` until `max_items` items are
/// gathered, `max_requests` pages were fetched, or no next link is returned.
/// Items repeating an `id` already seen are dropped.
pub async fn collect_pages(
    transport: &dyn GraphTransport,
    first_url: &str,
    max_items: usize,
    max_requests: usize,
) -> Result<Collected<Value, String>, ConnectorError> {
    walk(transport, first_url, max_items, max_requests, true).await
}

/// Like [`collect_pages`] but keeps repeated ids, for callers that resolve
/// duplicates themselves.
pub async fn collect_pages_raw(
    transport: &dyn GraphTransport,
    first_url: &str,
    max_items: usize,
    max_requests: usize,
) -> Result<Collected<Value, String>, ConnectorError> {
    walk(transport, first_url, max_items, max_requests, false).await
}

async fn walk(
    transport: &dyn GraphTransport,
    first_url: &str,
    max_items: usize,
    max_requests: usize,
    dedupe: bool,
) -> Result<Collected<Value, String>, ConnectorError> {
    let origin = Url::parse(first_url).ok().map(|u| u.origin());
    let origin = origin.as_ref();
    collect_paginated_with_cursor(
        max_items,
        max_requests,
        None,
        |cursor: Option<String>, _remaining| {
            let url = cursor.unwrap_or_else(|| first_url.to_string());
            async move {
                let body = transport.get_json(&url).await?;
                let next_cursor = next_link(&body).filter(|link| {
                    let ok = same_origin(link, origin);
                    if !ok {
                        warn!(%link, "ignoring nextLink to a different origin");
                    }
                    ok
                });
                Ok(Page {
                    items: page_values(&body),
                    next_cursor,
                })
            }
        },
        |item: &Value| {
            if !dedupe {
                return None;
            }
            item.get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_ascii_lowercase())
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::FakeGraph;
    use serde_json::json;

    #[tokio::test]
    async fn follows_next_links_until_exhausted() {
        let fake = FakeGraph::new()
            .json(
                "skiptoken=2",
                json!({"value": [{"id": "B"}, {"id": "c"}]}),
            )
            .json(
                "/messages",
                json!({
                    "value": [{"id": "a"}, {"id": "b"}],
                    "@odata.nextLink": "https://graph.test/v1.0/me/messages?$skiptoken=2"
                }),
            );
        let collected = collect_pages(&fake, "https://graph.test/v1.0/me/messages", 10, 5)
            .await
            .unwrap();
        let ids: Vec<&str> = collected
            .items
            .iter()
            .filter_map(|v| v["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(collected.requests, 2);
        assert!(collected.next_cursor.is_none());
    }

    #[tokio::test]
    async fn stops_at_item_cap() {
        let fake = FakeGraph::new().json(
            "/messages",
            json!({
                "value": [{"id": "1"}, {"id": "2"}, {"id": "3"}],
                "@odata.nextLink": "https://graph.test/v1.0/me/messages?page=2"
            }),
        );
        let collected = collect_pages(&fake, "https://graph.test/v1.0/me/messages", 2, 5)
            .await
            .unwrap();
        assert_eq!(collected.items.len(), 2);
        assert_eq!(fake.requested().len(), 1);
        assert!(collected.next_cursor.is_some());
    }

    #[tokio::test]
    async fn foreign_next_links_are_not_followed() {
        let fake = FakeGraph::new().json(
            "/messages",
            json!({
                "value": [{"id": "a"}],
                "@odata.nextLink": "https://evil.test/v1.0/me/messages?page=2"
            }),
        );
        let collected = collect_pages(&fake, "https://graph.test/v1.0/me/messages", 10, 5)
            .await
            .unwrap();
        assert_eq!(collected.items.len(), 1);
        assert_eq!(fake.requested().len(), 1);
        assert!(collected.next_cursor.is_none());
    }

    #[tokio::test]
    async fn raw_walk_keeps_repeats() {
        let fake = FakeGraph::new().json(
            "/messages",
            json!({"value": [{"id": "a"}, {"id": "A"}]}),
        );
        let collected = collect_pages_raw(&fake, "https://graph.test/v1.0/me/messages", 10, 5)
            .await
            .unwrap();
        assert_eq!(collected.items.len(), 2);
    }
}
