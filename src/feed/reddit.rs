// Reddit public JSON client.
//
// Reads r/all listings without authentication: `/r/all/new.json` for posts
// and `/r/all/comments.json` for comments. Listings are newest-first, and
// `before=<fullname>` asks for the items immediately newer than that
// fullname, so the newest fullname on a page is the next cursor position.
// A fullname that has aged out of Reddit's listing window just yields empty
// pages, which the ingestion loop treats as staleness.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::client::{FeedClient, FeedPage};
use super::rate_limiter::RateLimiter;
use crate::db::models::{FeedItem, FeedKind};
use crate::error::FetchError;

/// Default Reddit endpoint.
pub const DEFAULT_API_URL: &str = "https://www.reddit.com";

/// Reddit caps listing pages at 100 items.
pub const MAX_PAGE_LIMIT: u32 = 100;

pub struct RedditClient {
    client: reqwest::Client,
    base_url: String,
    page_limit: u32,
    rate_limiter: RateLimiter,
}

impl RedditClient {
    pub fn new(
        base_url: &str,
        user_agent: &str,
        page_limit: u32,
        rate_limiter: RateLimiter,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_limit: page_limit.clamp(1, MAX_PAGE_LIMIT),
            rate_limiter,
        })
    }

    fn listing_url(&self, kind: FeedKind) -> String {
        let path = match kind {
            FeedKind::Post => "/r/all/new.json",
            FeedKind::Comment => "/r/all/comments.json",
        };
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl FeedClient for RedditClient {
    async fn fetch(&self, kind: FeedKind, position: Option<&str>) -> Result<FeedPage, FetchError> {
        self.rate_limiter.acquire().await;

        let limit = self.page_limit.to_string();
        let mut params: Vec<(&str, &str)> = vec![("limit", limit.as_str()), ("raw_json", "1")];
        if let Some(before) = position {
            params.push(("before", before));
        }

        debug!(stream = %kind, before = ?position, "Fetching listing");

        let response = self
            .client
            .get(self.listing_url(kind))
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(response.headers());
            if let Some(delay) = retry_after {
                self.rate_limiter.pause_for(delay).await;
            }
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(FetchError::Transient(format!(
                "{} returned {status}: {snippet}",
                kind.stream_name()
            )));
        }

        let listing: Listing = response
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("malformed listing: {e}")))?;

        Ok(page_from_listing(kind, listing, Utc::now()))
    }
}

/// Read the server's back-off hint: `Retry-After` (seconds), falling back to
/// Reddit's `x-ratelimit-reset` (seconds until the window resets).
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    ["retry-after", "x-ratelimit-reset"].iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    })
}

/// Convert a decoded listing into a feed page.
pub fn page_from_listing(kind: FeedKind, listing: Listing, fetched_at: DateTime<Utc>) -> FeedPage {
    let children = listing.data.children;
    if children.is_empty() {
        return FeedPage::stale();
    }

    // Newest-first, so the first child is where the next page starts from
    let next_position = children.first().map(|c| c.data.name.clone());

    let items = children
        .into_iter()
        .filter(|c| !c.data.name.is_empty())
        .map(|c| c.data.into_item(kind, fetched_at))
        .collect();

    FeedPage {
        items,
        next_position,
        page_is_stale: false,
    }
}

// -- Serde types for Reddit listings --

#[derive(Debug, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
pub struct Thing {
    pub data: ThingData,
}

/// Union of the post (t3) and comment (t1) fields we keep.
#[derive(Debug, Deserialize)]
pub struct ThingData {
    /// Fullname, e.g. `t3_1abcde`
    #[serde(default)]
    pub name: String,
    pub title: Option<String>,
    pub selftext: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub subreddit: Option<String>,
    pub permalink: Option<String>,
    pub created_utc: Option<f64>,
}

impl ThingData {
    fn into_item(self, kind: FeedKind, fetched_at: DateTime<Utc>) -> FeedItem {
        let text = match kind {
            FeedKind::Post => {
                let title = self.title.unwrap_or_default();
                match self.selftext.filter(|s| !s.trim().is_empty()) {
                    Some(body) => format!("{title}\n\n{body}"),
                    None => title,
                }
            }
            FeedKind::Comment => self.body.unwrap_or_default(),
        };

        let created_at = self
            .created_utc
            .filter(|secs| secs.is_finite())
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64))
            .unwrap_or(fetched_at);

        FeedItem {
            external_id: self.name,
            kind,
            author: self.author.unwrap_or_else(|| "[unknown]".to_string()),
            text,
            community: self.subreddit.unwrap_or_default(),
            permalink: self.permalink.unwrap_or_default(),
            created_at,
            fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn fetched() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn deserialize_post_listing() {
        let json = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_old",
                "before": null,
                "children": [
                    {"kind": "t3", "data": {
                        "name": "t3_new", "title": "Rust 1.90 released",
                        "selftext": "Lots of goodies", "author": "ferris",
                        "subreddit": "rust", "permalink": "/r/rust/comments/new/",
                        "created_utc": 1769932800.0, "score": 12
                    }},
                    {"kind": "t3", "data": {
                        "name": "t3_old", "title": "Link post", "selftext": "",
                        "author": "bob", "subreddit": "pics",
                        "permalink": "/r/pics/comments/old/", "created_utc": 1769932700.5
                    }}
                ]
            }
        }"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        let page = page_from_listing(FeedKind::Post, listing, fetched());

        assert!(!page.page_is_stale);
        assert_eq!(page.next_position.as_deref(), Some("t3_new"));
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].text, "Rust 1.90 released\n\nLots of goodies");
        assert_eq!(page.items[1].text, "Link post");
        assert_eq!(page.items[0].community, "rust");
        assert_eq!(page.items[0].created_at.timestamp(), 1769932800);
        assert_eq!(page.items[1].created_at.timestamp_millis(), 1769932700500);
        assert!(page.items.iter().all(|i| i.fetched_at == fetched()));
    }

    #[test]
    fn deserialize_comment_listing() {
        let json = r#"{"data": {"children": [
            {"kind": "t1", "data": {"name": "t1_c1", "body": "great crate",
             "author": "alice", "subreddit": "rust", "permalink": "/r/rust/c1",
             "created_utc": 1769932800}}
        ]}}"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        let page = page_from_listing(FeedKind::Comment, listing, fetched());
        assert_eq!(page.items[0].kind, FeedKind::Comment);
        assert_eq!(page.items[0].text, "great crate");
        assert_eq!(page.items[0].author, "alice");
    }

    #[test]
    fn empty_listing_is_stale() {
        let json = r#"{"kind": "Listing", "data": {"children": [], "after": null}}"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        let page = page_from_listing(FeedKind::Post, listing, fetched());
        assert!(page.page_is_stale);
        assert!(page.items.is_empty());
        assert!(page.next_position.is_none());
    }

    #[test]
    fn missing_author_gets_placeholder() {
        let json = r#"{"data": {"children": [{"data": {"name": "t1_x", "body": "hi"}}]}}"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        let page = page_from_listing(FeedKind::Comment, listing, fetched());
        assert_eq!(page.items[0].author, "[unknown]");
        // No created_utc: the item is dated when it was fetched
        assert_eq!(page.items[0].created_at, fetched());
    }

    #[test]
    fn retry_after_prefers_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("42"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(42)));

        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));
    }

    #[test]
    fn retry_after_ignores_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn client_clamps_page_limit() {
        let client =
            RedditClient::new("https://example.test/", "feedwatch-test", 500, RateLimiter::per_minute(10))
                .unwrap();
        assert_eq!(client.page_limit, MAX_PAGE_LIMIT);
        assert_eq!(
            client.listing_url(FeedKind::Comment),
            "https://example.test/r/all/comments.json"
        );
    }
}
