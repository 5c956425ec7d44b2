// Case-insensitive keyword containment, the default filter.

use anyhow::Result;
use async_trait::async_trait;

use super::traits::{FilterDecision, MatchFilter};
use crate::db::models::FeedItem;

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordFilter;

impl KeywordFilter {
    /// First keyword (in campaign order) that occurs in `text`.
    pub fn first_match<'a>(text: &str, keywords: &'a [String]) -> Option<&'a str> {
        let haystack = text.to_lowercase();
        keywords
            .iter()
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .find(|k| haystack.contains(&k.to_lowercase()))
    }
}

#[async_trait]
impl MatchFilter for KeywordFilter {
    async fn filter(&self, item: &FeedItem, keywords: &[String]) -> Result<FilterDecision> {
        Ok(match Self::first_match(&item.text, keywords) {
            Some(keyword) => FilterDecision::hit(keyword),
            None => FilterDecision::miss(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_match_is_case_insensitive() {
        assert_eq!(
            KeywordFilter::first_match("Learning RUST today", &kw(&["rust"])),
            Some("rust")
        );
        assert_eq!(
            KeywordFilter::first_match("learning rust today", &kw(&["Rust"])),
            Some("Rust")
        );
    }

    #[test]
    fn test_first_keyword_in_campaign_order_wins() {
        let keywords = kw(&["tokio", "rust"]);
        assert_eq!(
            KeywordFilter::first_match("rust and tokio", &keywords),
            Some("tokio")
        );
    }

    #[test]
    fn test_no_match() {
        assert_eq!(KeywordFilter::first_match("python", &kw(&["rust"])), None);
        assert_eq!(KeywordFilter::first_match("anything", &kw(&[""])), None);
        assert_eq!(KeywordFilter::first_match("anything", &[]), None);
    }

    #[test]
    fn test_non_ascii_keywords() {
        assert_eq!(
            KeywordFilter::first_match("Grüße aus MÜNCHEN", &kw(&["münchen"])),
            Some("münchen")
        );
    }
}
