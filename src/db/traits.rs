// Database trait: async interface for everything the pipeline stores.
//
// The ingestion loops, the scheduler, and the matching jobs all hold an
// `Arc<dyn Database>`. The trait mirrors the queries.rs free functions so the
// SQLite implementation is a thin locking wrapper.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{
    CacheCounts, Campaign, CampaignMatch, FeedCursor, FeedItem, FeedKind, ItemKey, NewCampaign,
    NewMatch,
};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Scan state ---

    /// Get a scan state value by key.
    async fn get_scan_state(&self, key: &str) -> Result<Option<String>>;

    /// Set a scan state value (upsert).
    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()>;

    // --- Feed cursors ---

    async fn load_cursor(&self, kind: FeedKind) -> Result<Option<FeedCursor>>;

    async fn save_cursor(&self, cursor: &FeedCursor) -> Result<()>;

    // --- Local cache ---

    /// Insert-or-ignore keyed by `external_id`. Returns the number of new rows.
    async fn upsert_items(&self, items: &[FeedItem]) -> Result<usize>;

    /// One keyset page of items fetched at or after `since`.
    async fn items_since(
        &self,
        since: DateTime<Utc>,
        hints: &[String],
        after: Option<&ItemKey>,
        limit: usize,
    ) -> Result<Vec<FeedItem>>;

    async fn cache_counts(&self) -> Result<CacheCounts>;

    // --- Campaigns ---

    async fn insert_campaign(&self, campaign: &NewCampaign) -> Result<i64>;

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>>;

    async fn list_campaigns(&self, active_only: bool) -> Result<Vec<Campaign>>;

    /// Pause or resume. Returns false if the campaign doesn't exist.
    async fn set_campaign_active(&self, id: i64, active: bool) -> Result<bool>;

    /// Commit `last_checked_at` (and the failure reason, if any) after a job.
    async fn record_campaign_check(
        &self,
        id: i64,
        checked_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()>;

    // --- Matches ---

    /// Returns false if the (campaign, item) pair already has a match.
    async fn insert_match(&self, m: &NewMatch) -> Result<bool>;

    async fn get_matches(&self, campaign_id: i64, limit: u32) -> Result<Vec<CampaignMatch>>;

    /// (campaign_id, match count) pairs.
    async fn match_counts(&self) -> Result<Vec<(i64, i64)>>;
}
