// System status display: DB stats, cursor positions, campaign health.

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::models::{FeedKind, IngestProgress};
use crate::db::Database;
use crate::output::format_bytes;

/// Display system status to the terminal. The database must already exist.
pub async fn show(db: &Arc<dyn Database>, db_display_path: &str) -> Result<()> {
    let file_size = std::fs::metadata(db_display_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_display_path, file_size);

    let counts = db.cache_counts().await?;
    println!(
        "Cached items: {} ({} posts, {} comments)",
        counts.total(),
        counts.posts,
        counts.comments
    );

    println!("\nFeed streams:");
    for kind in FeedKind::ALL {
        show_stream(db, kind).await?;
    }

    let campaigns = db.list_campaigns(false).await?;
    let match_counts: HashMap<i64, i64> = db.match_counts().await?.into_iter().collect();
    let now = Utc::now();

    if campaigns.is_empty() {
        println!("\nCampaigns: none");
        println!("  Run `feedwatch campaign add` to create one");
        return Ok(());
    }

    let active = campaigns.iter().filter(|c| c.active).count();
    println!("\nCampaigns: {} total, {} active", campaigns.len(), active);
    for c in &campaigns {
        let last = match c.last_checked_at {
            Some(t) => format!("checked {}", t.format("%Y-%m-%d %H:%M:%S")),
            None => "never checked".to_string(),
        };
        let due = if c.active && c.is_due(now) {
            " (due)".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  #{} {}: {} matches, {}{}",
            c.id,
            c.name,
            match_counts.get(&c.id).copied().unwrap_or(0),
            last,
            due
        );
        if let Some(err) = &c.last_error {
            println!("    {} {}", "last error:".red(), err);
        }
    }

    Ok(())
}

async fn show_stream(db: &Arc<dyn Database>, kind: FeedKind) -> Result<()> {
    let Some(cursor) = db.load_cursor(kind).await? else {
        println!("  {}: never ingested", kind);
        return Ok(());
    };

    let position = cursor.position.as_deref().unwrap_or("<head>");
    let advanced = cursor
        .last_advanced_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "  {}: cursor {}, last advanced {}, {} stale pages",
        kind, position, advanced, cursor.consecutive_stale_count
    );

    // Progress JSON is best-effort; a malformed entry just isn't shown
    if let Some(json) = db.get_scan_state(&IngestProgress::state_key(kind)).await? {
        if let Ok(progress) = serde_json::from_str::<IngestProgress>(&json) {
            let when = progress
                .last_fetch_at
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "?".to_string());
            let status = if progress.status == "error" {
                progress.status.red()
            } else {
                progress.status.green()
            };
            println!(
                "    last fetch {} {}: {} items, {} new",
                when, status, progress.last_count, progress.new_count
            );
            if let Some(err) = progress.error {
                println!("    {}", err.dimmed());
            }
        }
    }
    Ok(())
}
