// Filter traits: the swap-ready abstraction for deciding matches.

use anyhow::Result;
use async_trait::async_trait;

use crate::db::models::FeedItem;

/// Outcome of filtering one item against a campaign's keywords.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDecision {
    pub matched: bool,
    /// The keyword that triggered the match
    pub keyword: Option<String>,
    /// Relevance from 0.0 to 1.0, if the filter scores
    pub score: Option<f64>,
}

impl FilterDecision {
    pub fn miss() -> Self {
        Self {
            matched: false,
            keyword: None,
            score: None,
        }
    }

    pub fn hit(keyword: &str) -> Self {
        Self {
            matched: true,
            keyword: Some(keyword.to_string()),
            score: None,
        }
    }
}

/// Decides whether an item matches a keyword set. Async because scoring
/// implementations usually call a model or an API.
///
/// An `Err` means this one item couldn't be judged; the job logs it and moves
/// on to the next item.
#[async_trait]
pub trait MatchFilter: Send + Sync {
    async fn filter(&self, item: &FeedItem, keywords: &[String]) -> Result<FilterDecision>;
}

/// Scores how relevant a text is to a set of keywords, beyond bare
/// containment.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Relevance from 0.0 (unrelated) to 1.0 (on topic).
    async fn score_text(&self, text: &str, keywords: &[String]) -> Result<f64>;
}
