// Database schema: table creation and migrations.
//
// A `schema_version` table tracks which migrations have run, and each
// migration is a function that executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent, safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Local cache of ingested posts and comments. Rows are never updated.
        CREATE TABLE IF NOT EXISTS feed_items (
            external_id TEXT PRIMARY KEY,      -- Reddit fullname (t3_/t1_)
            kind TEXT NOT NULL,                -- 'post' or 'comment'
            author TEXT NOT NULL,
            text TEXT NOT NULL,
            community TEXT NOT NULL,           -- subreddit
            permalink TEXT NOT NULL,
            created_at TEXT NOT NULL,
            fetched_at TEXT NOT NULL
        );

        -- One ingestion pointer per feed stream
        CREATE TABLE IF NOT EXISTS feed_cursors (
            stream TEXT PRIMARY KEY,           -- 'posts' or 'comments'
            position TEXT,                     -- NULL = feed head
            last_advanced_at TEXT,
            consecutive_stale_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            keywords TEXT NOT NULL,            -- JSON array of strings
            interval_secs INTEGER NOT NULL CHECK (interval_secs >= 30),
            active INTEGER NOT NULL DEFAULT 1,
            last_checked_at TEXT,
            created_at TEXT NOT NULL
        );

        -- At most one match per (campaign, item)
        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            feed_item_id TEXT NOT NULL REFERENCES feed_items(external_id),
            keyword TEXT,
            excerpt TEXT NOT NULL,
            score REAL,
            matched_at TEXT NOT NULL,
            UNIQUE (campaign_id, feed_item_id)
        );

        -- Free-form key/value state (ingestion progress and the like)
        CREATE TABLE IF NOT EXISTS scan_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Cache scans walk items in fetch order
        CREATE INDEX IF NOT EXISTS idx_items_fetched
            ON feed_items(fetched_at, external_id);

        CREATE INDEX IF NOT EXISTS idx_matches_campaign
            ON matches(campaign_id, matched_at);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: remember why a campaign's last matching job failed, so a
    // silently stalling campaign can be spotted from `status`.
    run_migration(conn, 2, |c| {
        c.execute_batch("ALTER TABLE campaigns ADD COLUMN last_error TEXT;")
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
