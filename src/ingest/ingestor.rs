// The ingestion loop for one feed stream.
//
// Each `advance()` fetches the page after the current cursor position, writes
// it to the local cache, feeds the outcome to the cursor state machine, and
// persists the cursor. `run()` repeats that until shutdown, sleeping for
// whatever delay the state machine chose. The cursor is only ever written
// here, so one Ingestor per stream is the single writer.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::state::{BackoffPolicy, CursorMachine, FetchOutcome, IngestState, Transition};
use crate::db::models::{FeedCursor, FeedKind, IngestProgress};
use crate::db::Database;
use crate::feed::FeedClient;

pub struct Ingestor {
    kind: FeedKind,
    client: Arc<dyn FeedClient>,
    db: Arc<dyn Database>,
    machine: CursorMachine,
}

impl Ingestor {
    /// Resume from the persisted cursor, or start at the feed head on first run.
    pub async fn resume(
        kind: FeedKind,
        client: Arc<dyn FeedClient>,
        db: Arc<dyn Database>,
        policy: BackoffPolicy,
    ) -> Result<Self> {
        let cursor = match db.load_cursor(kind).await? {
            Some(cursor) => {
                info!(
                    stream = %kind,
                    position = ?cursor.position,
                    stale = cursor.consecutive_stale_count,
                    "Resuming feed cursor"
                );
                cursor
            }
            None => {
                info!(stream = %kind, "No saved cursor, starting at feed head");
                let cursor = FeedCursor::at_head(kind);
                db.save_cursor(&cursor).await?;
                cursor
            }
        };

        Ok(Self {
            kind,
            client,
            db,
            machine: CursorMachine::new(cursor, policy),
        })
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    pub fn cursor(&self) -> &FeedCursor {
        self.machine.cursor()
    }

    pub fn state(&self) -> IngestState {
        self.machine.state()
    }

    /// Fetch and cache one page, then move the cursor.
    ///
    /// Never fails: fetch and cache errors become back-off transitions.
    pub async fn advance(&mut self) -> Transition {
        let position = self.machine.cursor().position.clone();
        let mut progress = IngestProgress {
            last_fetch_at: Some(Utc::now()),
            status: "success".to_string(),
            ..IngestProgress::default()
        };

        let outcome = match self.client.fetch(self.kind, position.as_deref()).await {
            Ok(page) if page.page_is_stale || page.items.is_empty() => {
                debug!(stream = %self.kind, position = ?position, "No new items ahead of cursor");
                FetchOutcome::Stale
            }
            Ok(page) => {
                progress.last_count = page.items.len();
                match self.db.upsert_items(&page.items).await {
                    Ok(new_count) => {
                        progress.new_count = new_count;
                        info!(
                            stream = %self.kind,
                            fetched = page.items.len(),
                            new = new_count,
                            next = ?page.next_position,
                            "Cached feed page"
                        );
                        FetchOutcome::Fresh {
                            next_position: page.next_position,
                        }
                    }
                    Err(e) => {
                        // The page is not consumed; the same position is
                        // fetched again after back-off.
                        error!(stream = %self.kind, error = %e, "Failed to write page to cache");
                        progress.status = "error".to_string();
                        progress.error = Some(format!("cache write: {e:#}"));
                        FetchOutcome::Failed { retry_after: None }
                    }
                }
            }
            Err(e) => {
                warn!(stream = %self.kind, error = %e, "Feed fetch failed");
                progress.status = "error".to_string();
                progress.error = Some(e.to_string());
                FetchOutcome::Failed {
                    retry_after: e.retry_after(),
                }
            }
        };

        let transition = self.machine.apply(outcome, Utc::now());
        match transition.state {
            IngestState::Reset => warn!(
                stream = %self.kind,
                expired = ?position,
                threshold = self.machine.policy().stale_threshold,
                "Cursor looks expired, skipping ahead to feed head"
            ),
            IngestState::BackingOff => debug!(
                stream = %self.kind,
                stale = self.machine.cursor().consecutive_stale_count,
                failures = self.machine.consecutive_failures(),
                delay_secs = transition.delay.as_secs_f64(),
                "Backing off"
            ),
            IngestState::Advancing => {}
        }

        self.persist_cursor().await;
        self.record_progress(progress).await;

        transition
    }

    /// Point the cursor at the feed head and persist it.
    pub async fn reset(&mut self) -> Result<()> {
        self.machine.reset();
        self.db.save_cursor(self.machine.cursor()).await
    }

    /// Run until `shutdown` flips to true, then persist the cursor and return.
    ///
    /// Shutdown is only observed between steps, so a page is never half
    /// applied.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(stream = %self.kind, "Ingestion loop started");

        while !*shutdown.borrow() {
            let transition = self.advance().await;
            tokio::select! {
                _ = tokio::time::sleep(transition.delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped: treat as shutdown
                        break;
                    }
                }
            }
        }

        self.db.save_cursor(self.machine.cursor()).await?;
        info!(
            stream = %self.kind,
            position = ?self.machine.cursor().position,
            "Ingestion loop stopped, cursor saved"
        );
        Ok(())
    }

    async fn persist_cursor(&self) {
        if let Err(e) = self.db.save_cursor(self.machine.cursor()).await {
            // In-memory cursor stays authoritative; the next step saves again
            error!(stream = %self.kind, error = %e, "Failed to persist cursor");
        }
    }

    async fn record_progress(&self, mut progress: IngestProgress) {
        let key = IngestProgress::state_key(self.kind);
        progress.total = match self.db.cache_counts().await {
            Ok(counts) => match self.kind {
                FeedKind::Post => counts.posts,
                FeedKind::Comment => counts.comments,
            },
            Err(e) => {
                warn!(
                    stream = %self.kind,
                    error = %e,
                    "Failed to count cached items, keeping previous total"
                );
                self.previous_total(&key).await
            }
        };
        let result = match serde_json::to_string(&progress) {
            Ok(json) => self.db.set_scan_state(&key, &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            debug!(stream = %self.kind, error = %e, "Failed to record ingest progress");
        }
    }

    /// Total from the last recorded progress, or 0 if there is none.
    async fn previous_total(&self, key: &str) -> i64 {
        match self.db.get_scan_state(key).await {
            Ok(Some(json)) => serde_json::from_str::<IngestProgress>(&json)
                .map(|p| p.total)
                .unwrap_or(0),
            _ => 0,
        }
    }
}
