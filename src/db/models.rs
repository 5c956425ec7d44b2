// Data models: Rust structs that map to database rows.
//
// These are the types that flow between ingestion, the cache, and the
// matching jobs. They're separate from the queries so other modules can use
// them without depending on rusqlite directly.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Campaign intervals are never shorter than this.
pub const MIN_INTERVAL_SECS: u32 = 30;

/// Maximum length (in chars) of the excerpt stored alongside a match.
pub const EXCERPT_CHARS: usize = 200;

/// Which listing an item came from. Each kind is its own feed stream with
/// its own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Post,
    Comment,
}

impl FeedKind {
    pub const ALL: [FeedKind; 2] = [FeedKind::Post, FeedKind::Comment];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Post => "post",
            FeedKind::Comment => "comment",
        }
    }

    /// Name of the stream this kind is ingested from ("posts" / "comments").
    pub fn stream_name(&self) -> &'static str {
        match self {
            FeedKind::Post => "posts",
            FeedKind::Comment => "comments",
        }
    }

    /// Parse either the item kind or the stream name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" | "posts" => Some(FeedKind::Post),
            "comment" | "comments" => Some(FeedKind::Comment),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stream_name())
    }
}

/// An item ingested from the feed. Immutable once cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Feed-assigned unique id (Reddit fullname, e.g. `t3_abc123`)
    pub external_id: String,
    pub kind: FeedKind,
    pub author: String,
    pub text: String,
    /// Subreddit the item was posted in
    pub community: String,
    pub permalink: String,
    pub created_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// The ingestion pointer into one feed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedCursor {
    pub kind: FeedKind,
    /// Opaque position token. `None` means "feed head".
    pub position: Option<String>,
    pub last_advanced_at: Option<DateTime<Utc>>,
    pub consecutive_stale_count: u32,
}

impl FeedCursor {
    /// A fresh cursor pointing at the feed head.
    pub fn at_head(kind: FeedKind) -> Self {
        Self {
            kind,
            position: None,
            last_advanced_at: None,
            consecutive_stale_count: 0,
        }
    }
}

/// A keyword campaign. Owned by whoever creates it; the matching core only
/// reads it and writes `last_checked_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub keywords: Vec<String>,
    pub interval_secs: u32,
    pub active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Error from the most recent failed matching job, cleared on success
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn interval(&self) -> Duration {
        Duration::seconds(i64::from(self.interval_secs))
    }

    /// When the next matching job is due. A campaign that was never checked
    /// is due immediately.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.last_checked_at.map(|t| t + self.interval())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_due_at().map_or(true, |due| due <= now)
    }
}

/// Input for creating a campaign.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub keywords: Vec<String>,
    pub interval_secs: u32,
}

impl NewCampaign {
    /// Build a campaign with normalized keywords and a clamped interval.
    pub fn new(name: &str, keywords: &[String], interval_secs: u32) -> Self {
        Self {
            name: name.trim().to_string(),
            keywords: normalize_keywords(keywords),
            interval_secs: interval_secs.max(MIN_INTERVAL_SECS),
        }
    }
}

/// Trim, drop empties, and dedupe case-insensitively (first spelling wins).
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// A stored match between a campaign and a cached feed item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMatch {
    pub id: i64,
    pub campaign_id: i64,
    /// The matched item's `external_id`
    pub feed_item_id: String,
    pub keyword: Option<String>,
    pub excerpt: String,
    pub score: Option<f64>,
    pub matched_at: DateTime<Utc>,
    /// Joined from the cached item for display
    pub author: String,
    pub permalink: String,
}

/// Input for recording a match.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub campaign_id: i64,
    pub feed_item_id: String,
    pub keyword: Option<String>,
    pub excerpt: String,
    pub score: Option<f64>,
    pub matched_at: DateTime<Utc>,
}

/// Per-stream ingestion progress, stored as JSON in `scan_state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestProgress {
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_count: usize,
    pub new_count: usize,
    pub total: i64,
    pub status: String,
    pub error: Option<String>,
}

impl IngestProgress {
    pub fn state_key(kind: FeedKind) -> String {
        format!("ingest_progress:{}", kind.stream_name())
    }
}

/// Cache row counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub posts: i64,
    pub comments: i64,
}

impl CacheCounts {
    pub fn total(&self) -> i64 {
        self.posts + self.comments
    }
}

/// Keyset position for paging through the cache in `(fetched_at, external_id)`
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemKey {
    pub fetched_at: DateTime<Utc>,
    pub external_id: String,
}

impl ItemKey {
    pub fn of(item: &FeedItem) -> Self {
        Self {
            fetched_at: item.fetched_at,
            external_id: item.external_id.clone(),
        }
    }
}

/// Format a timestamp for storage. Fixed-width UTC with millisecond precision
/// so lexical order in SQLite equals chronological order.
pub fn to_db_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Collapse whitespace and cut to `max_chars` characters (UTF-8 safe).
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        collapsed.chars().take(max_chars).collect()
    }
}
