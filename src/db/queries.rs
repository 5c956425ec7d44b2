// Database queries: every SQL statement lives here.
//
// Keeps SQL contained in one module and gives the rest of the app clean
// Rust interfaces. Timestamps go through `to_db_time` so they compare
// correctly as text.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::models::{
    to_db_time, CacheCounts, Campaign, CampaignMatch, FeedCursor, FeedItem, FeedKind, ItemKey,
    NewCampaign, NewMatch,
};

/// Read a stored timestamp column.
fn get_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(&raw, idx)
}

fn get_opt_time(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_time(&s, idx)).transpose()
}

fn parse_time(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_kind(row: &Row, idx: usize) -> rusqlite::Result<FeedKind> {
    let raw: String = row.get(idx)?;
    FeedKind::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown feed kind: {raw}").into(),
        )
    })
}

// --- Scan state ---

/// Get a scan state value by key (e.g. "ingest_progress:posts").
pub fn get_scan_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM scan_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Set a scan state value (upsert).
pub fn set_scan_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

// --- Feed cursors ---

/// Load the persisted cursor for a stream, if one was ever saved.
pub fn load_cursor(conn: &Connection, kind: FeedKind) -> Result<Option<FeedCursor>> {
    let mut stmt = conn.prepare(
        "SELECT position, last_advanced_at, consecutive_stale_count
         FROM feed_cursors WHERE stream = ?1",
    )?;
    let cursor = stmt
        .query_row(params![kind.stream_name()], |row| {
            Ok(FeedCursor {
                kind,
                position: row.get(0)?,
                last_advanced_at: get_opt_time(row, 1)?,
                consecutive_stale_count: row.get(2)?,
            })
        })
        .optional()?;
    Ok(cursor)
}

/// Persist a stream's cursor (upsert).
pub fn save_cursor(conn: &Connection, cursor: &FeedCursor) -> Result<()> {
    conn.execute(
        "INSERT INTO feed_cursors (stream, position, last_advanced_at, consecutive_stale_count, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(stream) DO UPDATE SET
            position = ?2,
            last_advanced_at = ?3,
            consecutive_stale_count = ?4,
            updated_at = datetime('now')",
        params![
            cursor.kind.stream_name(),
            cursor.position,
            cursor.last_advanced_at.as_ref().map(to_db_time),
            cursor.consecutive_stale_count,
        ],
    )?;
    Ok(())
}

// --- Feed items (local cache) ---

/// Insert items that aren't cached yet. Returns how many rows were new.
///
/// Runs in one transaction, so a failed page leaves nothing half-written.
pub fn upsert_items(conn: &Connection, items: &[FeedItem]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO feed_items
                (external_id, kind, author, text, community, permalink, created_at, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for item in items {
            inserted += stmt.execute(params![
                item.external_id,
                item.kind.as_str(),
                item.author,
                item.text,
                item.community,
                item.permalink,
                to_db_time(&item.created_at),
                to_db_time(&item.fetched_at),
            ])?;
        }
    }
    tx.commit().context("Failed to commit cached items")?;
    Ok(inserted)
}

/// Matches text containing at least one character outside U+0001..U+007F.
const NON_ASCII_GLOB: &str = "*[^\u{1}-\u{7f}]*";

/// One page of cached items fetched at or after `since`, in
/// `(fetched_at, external_id)` order, starting after `after`.
///
/// `hints` are lowercase ASCII substrings; when non-empty an item must
/// contain at least one of them or have non-ASCII text. The hint is a coarse
/// prefilter: the caller still decides the real match.
pub fn items_since(
    conn: &Connection,
    since: &DateTime<Utc>,
    hints: &[String],
    after: Option<&ItemKey>,
    limit: usize,
) -> Result<Vec<FeedItem>> {
    let mut sql = String::from(
        "SELECT external_id, kind, author, text, community, permalink, created_at, fetched_at
         FROM feed_items
         WHERE fetched_at >= ?",
    );
    let mut values: Vec<Value> = vec![Value::Text(to_db_time(since))];

    if let Some(key) = after {
        let fetched = to_db_time(&key.fetched_at);
        sql.push_str(" AND (fetched_at > ? OR (fetched_at = ? AND external_id > ?))");
        values.push(Value::Text(fetched.clone()));
        values.push(Value::Text(fetched));
        values.push(Value::Text(key.external_id.clone()));
    }

    if !hints.is_empty() {
        // Rows with any non-ASCII text always pass: Unicode case folding can
        // turn them into an ASCII hit that SQLite's lower() never sees.
        let clauses = vec!["instr(lower(text), ?) > 0"; hints.len()].join(" OR ");
        sql.push_str(&format!(" AND (text GLOB ? OR {clauses})"));
        values.push(Value::Text(NON_ASCII_GLOB.to_string()));
        values.extend(hints.iter().map(|h| Value::Text(h.clone())));
    }

    sql.push_str(" ORDER BY fetched_at ASC, external_id ASC LIMIT ?");
    values.push(Value::Integer(limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok(FeedItem {
            external_id: row.get(0)?,
            kind: get_kind(row, 1)?,
            author: row.get(2)?,
            text: row.get(3)?,
            community: row.get(4)?,
            permalink: row.get(5)?,
            created_at: get_time(row, 6)?,
            fetched_at: get_time(row, 7)?,
        })
    })?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

/// Number of cached items of each kind.
pub fn cache_counts(conn: &Connection) -> Result<CacheCounts> {
    let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM feed_items GROUP BY kind")?;
    let rows = stmt.query_map([], |row| Ok((get_kind(row, 0)?, row.get::<_, i64>(1)?)))?;

    let mut counts = CacheCounts::default();
    for row in rows {
        match row? {
            (FeedKind::Post, n) => counts.posts = n,
            (FeedKind::Comment, n) => counts.comments = n,
        }
    }
    Ok(counts)
}

// --- Campaigns ---

const CAMPAIGN_COLUMNS: &str =
    "id, name, keywords, interval_secs, active, last_checked_at, last_error, created_at";

fn campaign_from_row(row: &Row) -> rusqlite::Result<Campaign> {
    let keywords_json: String = row.get(2)?;
    let keywords: Vec<String> = serde_json::from_str(&keywords_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        keywords,
        interval_secs: row.get(3)?,
        active: row.get(4)?,
        last_checked_at: get_opt_time(row, 5)?,
        last_error: row.get(6)?,
        created_at: get_time(row, 7)?,
    })
}

/// Create a campaign and return its id.
pub fn insert_campaign(conn: &Connection, campaign: &NewCampaign) -> Result<i64> {
    let keywords_json = serde_json::to_string(&campaign.keywords)?;
    conn.execute(
        "INSERT INTO campaigns (name, keywords, interval_secs, active, created_at)
         VALUES (?1, ?2, ?3, 1, ?4)",
        params![
            campaign.name,
            keywords_json,
            campaign.interval_secs,
            to_db_time(&Utc::now()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_campaign(conn: &Connection, id: i64) -> Result<Option<Campaign>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"))?;
    let campaign = stmt.query_row(params![id], campaign_from_row).optional()?;
    Ok(campaign)
}

/// All campaigns, optionally only the active ones, ordered by id.
pub fn list_campaigns(conn: &Connection, active_only: bool) -> Result<Vec<Campaign>> {
    let sql = if active_only {
        format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE active = 1 ORDER BY id")
    } else {
        format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY id")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], campaign_from_row)?;

    let mut campaigns = Vec::new();
    for row in rows {
        campaigns.push(row?);
    }
    Ok(campaigns)
}

/// Pause or resume a campaign. Returns false if no such campaign exists.
pub fn set_campaign_active(conn: &Connection, id: i64, active: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE campaigns SET active = ?2 WHERE id = ?1",
        params![id, active],
    )?;
    Ok(changed > 0)
}

/// Record the outcome of a matching job: the window start for the next run,
/// plus the failure reason (or `None` on success).
pub fn record_campaign_check(
    conn: &Connection,
    id: i64,
    checked_at: &DateTime<Utc>,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE campaigns SET last_checked_at = ?2, last_error = ?3 WHERE id = ?1",
        params![id, to_db_time(checked_at), error],
    )?;
    Ok(())
}

// --- Matches ---

/// Record a match. Returns false if this (campaign, item) pair already has one.
pub fn insert_match(conn: &Connection, m: &NewMatch) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO matches
            (campaign_id, feed_item_id, keyword, excerpt, score, matched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            m.campaign_id,
            m.feed_item_id,
            m.keyword,
            m.excerpt,
            m.score,
            to_db_time(&m.matched_at),
        ],
    )?;
    Ok(inserted > 0)
}

/// Most recent matches for a campaign, newest first.
pub fn get_matches(conn: &Connection, campaign_id: i64, limit: u32) -> Result<Vec<CampaignMatch>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.campaign_id, m.feed_item_id, m.keyword, m.excerpt, m.score,
                m.matched_at, i.author, i.permalink
         FROM matches m
         JOIN feed_items i ON i.external_id = m.feed_item_id
         WHERE m.campaign_id = ?1
         ORDER BY m.matched_at DESC, m.id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![campaign_id, limit], |row| {
        Ok(CampaignMatch {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            feed_item_id: row.get(2)?,
            keyword: row.get(3)?,
            excerpt: row.get(4)?,
            score: row.get(5)?,
            matched_at: get_time(row, 6)?,
            author: row.get(7)?,
            permalink: row.get(8)?,
        })
    })?;

    let mut matches = Vec::new();
    for row in rows {
        matches.push(row?);
    }
    Ok(matches)
}

/// Number of matches per campaign id.
pub fn match_counts(conn: &Connection) -> Result<Vec<(i64, i64)>> {
    let mut stmt =
        conn.prepare("SELECT campaign_id, COUNT(*) FROM matches GROUP BY campaign_id")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut counts = Vec::new();
    for row in rows {
        counts.push(row?);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;
    use chrono::{Duration, TimeZone};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn item(id: &str, text: &str, fetched_at: DateTime<Utc>) -> FeedItem {
        FeedItem {
            external_id: id.to_string(),
            kind: FeedKind::Post,
            author: "someone".to_string(),
            text: text.to_string(),
            community: "rust".to_string(),
            permalink: format!("/r/rust/{id}"),
            created_at: fetched_at - Duration::seconds(5),
            fetched_at,
        }
    }

    #[test]
    fn test_scan_state_roundtrip() {
        let conn = test_conn();
        assert_eq!(get_scan_state(&conn, "k").unwrap(), None);
        set_scan_state(&conn, "k", "v1").unwrap();
        set_scan_state(&conn, "k", "v2").unwrap();
        assert_eq!(get_scan_state(&conn, "k").unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn test_cursor_roundtrip() {
        let conn = test_conn();
        assert!(load_cursor(&conn, FeedKind::Post).unwrap().is_none());

        let cursor = FeedCursor {
            kind: FeedKind::Post,
            position: Some("t3_abc".to_string()),
            last_advanced_at: Some(base_time()),
            consecutive_stale_count: 3,
        };
        save_cursor(&conn, &cursor).unwrap();
        assert_eq!(load_cursor(&conn, FeedKind::Post).unwrap(), Some(cursor));
        // Streams are independent
        assert!(load_cursor(&conn, FeedKind::Comment).unwrap().is_none());
    }

    #[test]
    fn test_upsert_items_is_idempotent() {
        let conn = test_conn();
        let t = base_time();
        let page = vec![item("t3_a", "hello", t), item("t3_b", "world", t)];
        assert_eq!(upsert_items(&conn, &page).unwrap(), 2);
        assert_eq!(upsert_items(&conn, &page).unwrap(), 0);

        // Re-fetched copy with different content does not replace the original
        let changed = vec![item("t3_a", "edited", t + Duration::seconds(60))];
        assert_eq!(upsert_items(&conn, &changed).unwrap(), 0);
        let all = items_since(&conn, &(t - Duration::hours(1)), &[], None, 100).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text, "hello");
        assert_eq!(cache_counts(&conn).unwrap().total(), 2);
    }

    #[test]
    fn test_items_since_orders_and_filters() {
        let conn = test_conn();
        let t = base_time();
        upsert_items(
            &conn,
            &[
                item("t3_c", "Rust 2024 edition", t + Duration::seconds(20)),
                item("t3_a", "old news", t - Duration::seconds(20)),
                item("t3_b", "python tips", t + Duration::seconds(10)),
            ],
        )
        .unwrap();

        let since = items_since(&conn, &t, &[], None, 100).unwrap();
        let ids: Vec<_> = since.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["t3_b", "t3_c"]);

        let hinted = items_since(&conn, &t, &["rust".to_string()], None, 100).unwrap();
        assert_eq!(hinted.len(), 1);
        assert_eq!(hinted[0].external_id, "t3_c");
    }

    #[test]
    fn test_hint_keeps_non_ascii_rows() {
        let conn = test_conn();
        let t = base_time();
        upsert_items(
            &conn,
            &[
                // KELVIN SIGN folds to 'k' in Unicode, not in SQLite's lower()
                item("t3_k", "0 \u{212A}ELVIN", t),
                item("t3_p", "plain ascii", t),
            ],
        )
        .unwrap();

        let hinted = items_since(&conn, &t, &["kelvin".to_string()], None, 100).unwrap();
        let ids: Vec<_> = hinted.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["t3_k"]);
    }

    #[test]
    fn test_items_since_keyset_paging() {
        let conn = test_conn();
        let t = base_time();
        // Same fetched_at for all: order falls back to external_id
        let page: Vec<_> = (0..5).map(|i| item(&format!("t3_{i}"), "x", t)).collect();
        upsert_items(&conn, &page).unwrap();

        let first = items_since(&conn, &t, &[], None, 2).unwrap();
        assert_eq!(first.len(), 2);
        let key = ItemKey::of(first.last().unwrap());
        let second = items_since(&conn, &t, &[], Some(&key), 10).unwrap();
        let ids: Vec<_> = second.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["t3_2", "t3_3", "t3_4"]);
    }

    #[test]
    fn test_campaign_lifecycle() {
        let conn = test_conn();
        let id = insert_campaign(
            &conn,
            &NewCampaign::new("Rust", &["rust".to_string(), "cargo".to_string()], 60),
        )
        .unwrap();

        let c = get_campaign(&conn, id).unwrap().unwrap();
        assert_eq!(c.keywords, vec!["rust", "cargo"]);
        assert!(c.active);
        assert!(c.last_checked_at.is_none());

        assert!(set_campaign_active(&conn, id, false).unwrap());
        assert!(list_campaigns(&conn, true).unwrap().is_empty());
        assert_eq!(list_campaigns(&conn, false).unwrap().len(), 1);
        assert!(!set_campaign_active(&conn, 999, false).unwrap());

        record_campaign_check(&conn, id, &base_time(), Some("boom")).unwrap();
        let c = get_campaign(&conn, id).unwrap().unwrap();
        assert_eq!(c.last_checked_at, Some(base_time()));
        assert_eq!(c.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_insert_match_once_per_pair() {
        let conn = test_conn();
        let t = base_time();
        upsert_items(&conn, &[item("t3_a", "rust", t)]).unwrap();
        let cid = insert_campaign(&conn, &NewCampaign::new("c", &["rust".to_string()], 60))
            .unwrap();

        let m = NewMatch {
            campaign_id: cid,
            feed_item_id: "t3_a".to_string(),
            keyword: Some("rust".to_string()),
            excerpt: "rust".to_string(),
            score: None,
            matched_at: t,
        };
        assert!(insert_match(&conn, &m).unwrap());
        assert!(!insert_match(&conn, &m).unwrap());

        let stored = get_matches(&conn, cid, 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].permalink, "/r/rust/t3_a");
        assert_eq!(match_counts(&conn).unwrap(), vec![(cid, 1)]);
    }
}
