// Typed errors for the places where the pipeline branches on the kind of
// failure. Everything else uses anyhow with context.

use std::time::Duration;

use thiserror::Error;

/// Failure fetching a page from the feed. Always retried with back-off by the
/// ingestion loop; never fatal.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by feed (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient feed error: {0}")]
    Transient(String),
}

impl FetchError {
    /// Minimum wait the feed asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            FetchError::Transient(_) => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transient(err.to_string())
    }
}

/// Failure that aborts one matching job. The scheduler logs it, records it
/// on the campaign, and tries again on the campaign's next due tick.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("cache query failed: {0:#}")]
    CacheQuery(anyhow::Error),

    #[error("failed to record match: {0:#}")]
    MatchWrite(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let limited = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(FetchError::Transient("reset".into()).retry_after(), None);
    }

    #[test]
    fn test_job_error_display_includes_cause() {
        let err = JobError::CacheQuery(anyhow::anyhow!("no such table: feed_items"));
        assert!(err.to_string().contains("no such table"));
    }
}
