// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// Ingestion writes and job reads are short statements, so one connection
// serializes them without noticeable contention.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{
    CacheCounts, Campaign, CampaignMatch, FeedCursor, FeedItem, FeedKind, ItemKey, NewCampaign,
    NewMatch,
};
use super::queries;
use super::traits::Database;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn get_scan_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        queries::get_scan_state(&conn, key)
    }

    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::set_scan_state(&conn, key, value)
    }

    async fn load_cursor(&self, kind: FeedKind) -> Result<Option<FeedCursor>> {
        let conn = self.conn.lock().await;
        queries::load_cursor(&conn, kind)
    }

    async fn save_cursor(&self, cursor: &FeedCursor) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::save_cursor(&conn, cursor)
    }

    async fn upsert_items(&self, items: &[FeedItem]) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::upsert_items(&conn, items)
    }

    async fn items_since(
        &self,
        since: DateTime<Utc>,
        hints: &[String],
        after: Option<&ItemKey>,
        limit: usize,
    ) -> Result<Vec<FeedItem>> {
        let conn = self.conn.lock().await;
        queries::items_since(&conn, &since, hints, after, limit)
    }

    async fn cache_counts(&self) -> Result<CacheCounts> {
        let conn = self.conn.lock().await;
        queries::cache_counts(&conn)
    }

    async fn insert_campaign(&self, campaign: &NewCampaign) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::insert_campaign(&conn, campaign)
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        let conn = self.conn.lock().await;
        queries::get_campaign(&conn, id)
    }

    async fn list_campaigns(&self, active_only: bool) -> Result<Vec<Campaign>> {
        let conn = self.conn.lock().await;
        queries::list_campaigns(&conn, active_only)
    }

    async fn set_campaign_active(&self, id: i64, active: bool) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::set_campaign_active(&conn, id, active)
    }

    async fn record_campaign_check(
        &self,
        id: i64,
        checked_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::record_campaign_check(&conn, id, &checked_at, error)
    }

    async fn insert_match(&self, m: &NewMatch) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::insert_match(&conn, m)
    }

    async fn get_matches(&self, campaign_id: i64, limit: u32) -> Result<Vec<CampaignMatch>> {
        let conn = self.conn.lock().await;
        queries::get_matches(&conn, campaign_id, limit)
    }

    async fn match_counts(&self) -> Result<Vec<(i64, i64)>> {
        let conn = self.conn.lock().await;
        queries::match_counts(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;

    fn test_db() -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        SqliteDatabase::new(conn)
    }

    #[tokio::test]
    async fn test_trait_cursor_roundtrip() {
        let db = test_db();
        assert!(db.load_cursor(FeedKind::Comment).await.unwrap().is_none());
        let mut cursor = FeedCursor::at_head(FeedKind::Comment);
        cursor.position = Some("t1_xyz".to_string());
        db.save_cursor(&cursor).await.unwrap();
        assert_eq!(
            db.load_cursor(FeedKind::Comment).await.unwrap(),
            Some(cursor)
        );
    }

    #[tokio::test]
    async fn test_trait_table_count() {
        let db = test_db();
        assert_eq!(db.table_count().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_trait_campaign_roundtrip() {
        let db = test_db();
        let id = db
            .insert_campaign(&NewCampaign::new("Crabs", &["ferris".to_string()], 300))
            .await
            .unwrap();
        let campaign = db.get_campaign(id).await.unwrap().unwrap();
        assert_eq!(campaign.name, "Crabs");
        assert_eq!(campaign.interval_secs, 300);
        assert!(db.get_campaign(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trait_empty_cache_counts() {
        let db = test_db();
        let counts = db.cache_counts().await.unwrap();
        assert_eq!(counts, CacheCounts::default());
    }
}
