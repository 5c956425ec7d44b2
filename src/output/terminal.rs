// Colored terminal output for campaigns, matches, and ingest steps.
//
// main.rs and status.rs delegate all colors and table layout here.

use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};

use crate::db::models::{Campaign, CampaignMatch, FeedCursor, FeedKind};
use crate::ingest::{IngestState, Transition};
use crate::matching::JobReport;

/// Display campaigns as a table.
pub fn display_campaigns(campaigns: &[Campaign], now: DateTime<Utc>) {
    if campaigns.is_empty() {
        println!("No campaigns yet. Add one with `feedwatch campaign add <name> -k <keyword>`.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Campaigns ({}) ===", campaigns.len()).bold()
    );
    println!();
    println!(
        "  {:>4}  {:<20} {:<8} {:>8}  {:<20}  {}",
        "ID".dimmed(),
        "Name".dimmed(),
        "State".dimmed(),
        "Every".dimmed(),
        "Last checked".dimmed(),
        "Keywords".dimmed(),
    );
    println!("  {}", "-".repeat(84).dimmed());

    for c in campaigns {
        let state = if c.active {
            if c.is_due(now) {
                "due".yellow()
            } else {
                "active".green()
            }
        } else {
            "paused".dimmed()
        };
        let last_checked = c
            .last_checked_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!(
            "  {:>4}  {:<20} {:<8} {:>7}s  {:<20}  {}",
            c.id,
            super::truncate_chars(&c.name, 17),
            state,
            c.interval_secs,
            last_checked,
            c.keywords.join(", "),
        );
        if let Some(err) = &c.last_error {
            println!("        {} {}", "last run failed:".red(), err);
        }
    }
    println!();
}

/// Display a campaign's matches, newest first.
pub fn display_matches(campaign: &Campaign, matches: &[CampaignMatch]) {
    println!(
        "\n{}",
        format!("=== Matches for \"{}\" ({}) ===", campaign.name, matches.len()).bold()
    );

    if matches.is_empty() {
        println!("  No matches yet.");
        return;
    }

    for m in matches {
        let keyword = m.keyword.as_deref().unwrap_or("?");
        let score = m
            .score
            .map(|s| format!(" score {:.2}", s))
            .unwrap_or_default();
        println!(
            "\n  {} {} by u/{}{}",
            m.matched_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            format!("[{keyword}]").cyan(),
            m.author,
            score.dimmed(),
        );
        println!("    {}", super::truncate_chars(&m.excerpt, 160));
        if !m.permalink.is_empty() {
            println!("    {}", m.permalink.dimmed());
        }
    }
    println!();
}

/// One line per ingest step, used by `feedwatch ingest`.
pub fn display_transition(kind: FeedKind, step: usize, transition: &Transition, cursor: &FeedCursor) {
    let position = cursor.position.as_deref().unwrap_or("<head>");
    println!(
        "  {:<9} #{:<3} {:<12} cursor {}  stale {}  next in {}s",
        kind.to_string(),
        step,
        colorize_state(transition.state),
        position,
        cursor.consecutive_stale_count,
        transition.delay.as_secs(),
    );
}

/// Summary line for one finished matching job.
pub fn display_job_report(campaign: &Campaign, report: &JobReport) {
    let new = if report.new_matches > 0 {
        report.new_matches.to_string().green().bold()
    } else {
        report.new_matches.to_string().normal()
    };
    println!(
        "  {:<20} scanned {:>6}  new matches {}{}",
        super::truncate_chars(&campaign.name, 17),
        report.scanned,
        new,
        if report.filter_errors > 0 {
            format!("  ({} skipped)", report.filter_errors)
                .yellow()
                .to_string()
        } else {
            String::new()
        },
    );
}

pub fn colorize_state(state: IngestState) -> ColoredString {
    match state {
        IngestState::Advancing => state.as_str().green(),
        IngestState::BackingOff => state.as_str().yellow(),
        IngestState::Reset => state.as_str().red().bold(),
    }
}
