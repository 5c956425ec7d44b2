use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::db::models::FeedKind;
use crate::feed::reddit::{DEFAULT_API_URL, MAX_PAGE_LIMIT};
use crate::ingest::BackoffPolicy;
use crate::matching::JobSettings;
use crate::scheduler::SchedulerSettings;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. Every
/// setting has a default; a value that is set but malformed is an error.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// Base URL for the Reddit JSON API
    pub reddit_api_url: String,
    /// Required for ingestion
    pub reddit_user_agent: String,
    /// Which feed streams to ingest (FEEDWATCH_STREAMS, e.g. "posts,comments")
    pub streams: Vec<FeedKind>,
    /// Items per listing request (max 100)
    pub page_limit: u32,
    /// Shared request ceiling for all streams
    pub requests_per_minute: u32,
    pub backoff: BackoffPolicy,
    pub scheduler: SchedulerSettings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let streams = match env::var("FEEDWATCH_STREAMS") {
            Ok(raw) => parse_streams(&raw)?,
            Err(_) => FeedKind::ALL.to_vec(),
        };

        let backoff = BackoffPolicy {
            base_interval: Duration::from_secs(env_or("FEEDWATCH_INGEST_INTERVAL_SECS", 30)?),
            max_delay: Duration::from_secs(env_or("FEEDWATCH_MAX_BACKOFF_SECS", 600)?),
            stale_threshold: env_or("FEEDWATCH_STALE_THRESHOLD", 10)?,
        };

        let scheduler = SchedulerSettings {
            tick_interval: Duration::from_secs(env_or("FEEDWATCH_TICK_SECS", 5)?),
            max_concurrent_jobs: env_or("FEEDWATCH_MAX_JOBS", 4)?,
            job: JobSettings {
                overlap: chrono::Duration::seconds(env_or("FEEDWATCH_OVERLAP_SECS", 30)?),
                initial_lookback: chrono::Duration::minutes(env_or(
                    "FEEDWATCH_LOOKBACK_MINS",
                    30,
                )?),
                ..JobSettings::default()
            },
        };

        let config = Self {
            db_path: env::var("FEEDWATCH_DB_PATH").unwrap_or_else(|_| "./feedwatch.db".to_string()),
            reddit_api_url: env::var("REDDIT_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            reddit_user_agent: env::var("REDDIT_USER_AGENT").unwrap_or_default(),
            streams,
            page_limit: env_or("FEEDWATCH_PAGE_LIMIT", MAX_PAGE_LIMIT)?,
            requests_per_minute: env_or("FEEDWATCH_REQUESTS_PER_MINUTE", 10)?,
            backoff,
            scheduler,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.backoff.stale_threshold == 0 {
            anyhow::bail!("FEEDWATCH_STALE_THRESHOLD must be at least 1");
        }
        if self.backoff.base_interval.is_zero() {
            anyhow::bail!("FEEDWATCH_INGEST_INTERVAL_SECS must be at least 1");
        }
        if self.backoff.max_delay < self.backoff.base_interval {
            anyhow::bail!(
                "FEEDWATCH_MAX_BACKOFF_SECS ({}) is shorter than the ingest interval ({})",
                self.backoff.max_delay.as_secs(),
                self.backoff.base_interval.as_secs()
            );
        }
        if self.scheduler.tick_interval.is_zero() {
            anyhow::bail!("FEEDWATCH_TICK_SECS must be at least 1");
        }
        if self.scheduler.max_concurrent_jobs == 0 {
            anyhow::bail!("FEEDWATCH_MAX_JOBS must be at least 1");
        }
        Ok(())
    }

    /// Check that the feed can be queried.
    /// Reddit rejects requests without a descriptive User-Agent.
    pub fn require_feed(&self) -> Result<()> {
        if self.reddit_user_agent.trim().is_empty() {
            anyhow::bail!(
                "REDDIT_USER_AGENT is not set. Add it to your .env file,\n\
                 e.g. REDDIT_USER_AGENT=\"feedwatch/0.1 (by u/yourname)\"."
            );
        }
        if self.streams.is_empty() {
            anyhow::bail!("FEEDWATCH_STREAMS names no streams. Use posts, comments, or both.");
        }
        Ok(())
    }
}

/// Parse a comma-separated stream list ("posts,comments").
pub fn parse_streams(raw: &str) -> Result<Vec<FeedKind>> {
    let mut streams = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = FeedKind::parse(name)
            .with_context(|| format!("Unknown feed stream {name:?} in FEEDWATCH_STREAMS"))?;
        if !streams.contains(&kind) {
            streams.push(kind);
        }
    }
    Ok(streams)
}

/// Read a numeric env var, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
