// One matching job: scan the cache window for a campaign and record matches.
//
// The window starts at the campaign's last check minus an overlap margin, so
// items cached slightly out of order relative to the scheduler's clock are
// still seen. Items in the overlap are scanned twice; the match table's
// (campaign, item) uniqueness turns the second hit into a no-op.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::traits::MatchFilter;
use crate::db::cache::{query_since, DEFAULT_BATCH_SIZE};
use crate::db::models::{excerpt, Campaign, NewMatch, EXCERPT_CHARS};
use crate::db::Database;
use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobSettings {
    /// How far before `last_checked_at` each scan starts
    pub overlap: Duration,
    /// Window for a campaign that has never been checked
    pub initial_lookback: Duration,
    /// Cache rows fetched per batch
    pub batch_size: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            overlap: Duration::seconds(30),
            initial_lookback: Duration::minutes(30),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl JobSettings {
    /// Earliest `fetched_at` a job started at `started_at` looks at.
    pub fn window_start(&self, campaign: &Campaign, started_at: DateTime<Utc>) -> DateTime<Utc> {
        match campaign.last_checked_at {
            Some(last) => last - self.overlap,
            None => started_at - self.initial_lookback,
        }
    }
}

/// What a job did.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub campaign_id: i64,
    pub window_start: DateTime<Utc>,
    pub scanned: usize,
    pub new_matches: usize,
    /// Items the filter couldn't judge (skipped)
    pub filter_errors: usize,
}

/// Lowercased keywords usable as a SQL prefilter. SQLite's `lower()` only
/// folds ASCII, so any non-ASCII keyword disables the prefilter entirely.
/// Rows with non-ASCII text bypass the prefilter on the SQL side.
pub fn prefilter_hints(keywords: &[String]) -> Vec<String> {
    if keywords.iter().all(|k| k.is_ascii()) {
        keywords.iter().map(|k| k.to_ascii_lowercase()).collect()
    } else {
        Vec::new()
    }
}

/// Scan the cache for one campaign and record new matches.
///
/// Per-item filter errors are logged and skipped. A cache read or match write
/// failure aborts the job.
pub async fn run_matching_job(
    db: Arc<dyn Database>,
    filter: &dyn MatchFilter,
    campaign: &Campaign,
    started_at: DateTime<Utc>,
    settings: &JobSettings,
) -> Result<JobReport, JobError> {
    let window_start = settings.window_start(campaign, started_at);
    let mut report = JobReport {
        campaign_id: campaign.id,
        window_start,
        scanned: 0,
        new_matches: 0,
        filter_errors: 0,
    };

    if campaign.keywords.is_empty() {
        info!(campaign = campaign.id, "Campaign has no keywords, nothing to match");
        return Ok(report);
    }

    debug!(
        campaign = campaign.id,
        since = %window_start,
        keywords = campaign.keywords.len(),
        "Scanning cache"
    );

    let mut items = query_since(
        db.clone(),
        window_start,
        prefilter_hints(&campaign.keywords),
        settings.batch_size,
    );

    while let Some(item) = items.next().await {
        let item = item.map_err(JobError::CacheQuery)?;
        report.scanned += 1;

        let decision = match filter.filter(&item, &campaign.keywords).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    campaign = campaign.id,
                    item = %item.external_id,
                    error = %e,
                    "Filter failed on item, skipping"
                );
                report.filter_errors += 1;
                continue;
            }
        };
        if !decision.matched {
            continue;
        }

        let new_match = NewMatch {
            campaign_id: campaign.id,
            feed_item_id: item.external_id.clone(),
            keyword: decision.keyword,
            excerpt: excerpt(&item.text, EXCERPT_CHARS),
            score: decision.score,
            matched_at: Utc::now(),
        };
        if db
            .insert_match(&new_match)
            .await
            .map_err(JobError::MatchWrite)?
        {
            report.new_matches += 1;
        }
    }

    info!(
        campaign = campaign.id,
        name = %campaign.name,
        scanned = report.scanned,
        new_matches = report.new_matches,
        filter_errors = report.filter_errors,
        "Matching job finished"
    );

    Ok(report)
}
