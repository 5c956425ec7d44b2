// Keyword prefilter followed by a relevance score.
//
// Only items that contain a keyword reach the scorer, which keeps scorer
// calls (usually a model or a rate-limited API) proportional to the match
// volume rather than the cache volume.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::keyword::KeywordFilter;
use super::traits::{FilterDecision, MatchFilter, RelevanceScorer};
use crate::db::models::FeedItem;

pub struct ScoredFilter<S> {
    scorer: S,
    /// Minimum score for a keyword hit to count as a match
    threshold: f64,
}

impl<S: RelevanceScorer> ScoredFilter<S> {
    pub fn new(scorer: S, threshold: f64) -> Self {
        Self {
            scorer,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl<S: RelevanceScorer> MatchFilter for ScoredFilter<S> {
    async fn filter(&self, item: &FeedItem, keywords: &[String]) -> Result<FilterDecision> {
        let Some(keyword) = KeywordFilter::first_match(&item.text, keywords) else {
            return Ok(FilterDecision::miss());
        };

        let score = self
            .scorer
            .score_text(&item.text, keywords)
            .await
            .with_context(|| format!("Scorer failed on {}", item.external_id))?;

        Ok(FilterDecision {
            matched: score >= self.threshold,
            keyword: Some(keyword.to_string()),
            score: Some(score),
        })
    }
}
