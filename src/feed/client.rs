// Feed client contract.

use async_trait::async_trait;

use crate::db::models::{FeedItem, FeedKind};
use crate::error::FetchError;

/// One page of the feed, read forward from a cursor position.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    /// Position to continue from once this page is consumed
    pub next_position: Option<String>,
    /// True when the feed has nothing ahead of the requested position
    pub page_is_stale: bool,
}

impl FeedPage {
    /// A page with nothing new ahead of the cursor.
    pub fn stale() -> Self {
        Self {
            items: Vec::new(),
            next_position: None,
            page_is_stale: true,
        }
    }
}

/// Read access to an external feed.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetch the page that follows `position` in the given stream.
    /// `None` asks for the current head of the feed.
    async fn fetch(&self, kind: FeedKind, position: Option<&str>) -> Result<FeedPage, FetchError>;
}
