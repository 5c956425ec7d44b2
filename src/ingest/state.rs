// Cursor and back-off state machine for one feed stream.
//
// Pure: it takes the outcome of one fetch and decides what happens to the
// cursor and how long to wait before the next fetch. No I/O, so thresholds
// and delays are tested directly.
//
//   ADVANCING --new items--> ADVANCING
//   ADVANCING --stale------> BACKING_OFF --stale x T--> RESET --> ADVANCING
//   ADVANCING --error------> BACKING_OFF --retry------> ADVANCING

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::models::FeedCursor;

/// Where the loop is after applying an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Advancing,
    BackingOff,
    /// The cursor was abandoned and now points at the feed head.
    Reset,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Advancing => "advancing",
            IngestState::BackingOff => "backing_off",
            IngestState::Reset => "reset",
        }
    }
}

/// What one `advance()` observed.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The page had content and was fully written to the cache.
    Fresh { next_position: Option<String> },
    /// The feed reported nothing ahead of the cursor.
    Stale,
    /// Fetch or cache write failed; the page was not consumed.
    Failed { retry_after: Option<Duration> },
}

/// Timing and reset policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay between fetches while the feed keeps producing items
    pub base_interval: Duration,
    /// Ceiling for exponential back-off
    pub max_delay: Duration,
    /// Consecutive stale pages after which the cursor is treated as expired
    pub stale_threshold: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
            stale_threshold: 10,
        }
    }
}

impl BackoffPolicy {
    /// `base × 2^attempt`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_interval.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of applying one outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub state: IngestState,
    pub delay: Duration,
}

/// The cursor plus the in-memory failure counter.
///
/// Stale pages and errors back off independently: only stale pages count
/// toward the reset threshold, so a flaky network never skips data.
#[derive(Debug, Clone)]
pub struct CursorMachine {
    cursor: FeedCursor,
    policy: BackoffPolicy,
    consecutive_failures: u32,
    state: IngestState,
}

impl CursorMachine {
    pub fn new(cursor: FeedCursor, policy: BackoffPolicy) -> Self {
        Self {
            cursor,
            policy,
            consecutive_failures: 0,
            state: IngestState::Advancing,
        }
    }

    pub fn cursor(&self) -> &FeedCursor {
        &self.cursor
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn apply(&mut self, outcome: FetchOutcome, now: DateTime<Utc>) -> Transition {
        let transition = match outcome {
            FetchOutcome::Fresh { next_position } => {
                if next_position.is_some() {
                    self.cursor.position = next_position;
                }
                self.cursor.last_advanced_at = Some(now);
                self.cursor.consecutive_stale_count = 0;
                self.consecutive_failures = 0;
                Transition {
                    state: IngestState::Advancing,
                    delay: self.policy.base_interval,
                }
            }
            FetchOutcome::Stale => {
                self.consecutive_failures = 0;
                self.cursor.consecutive_stale_count += 1;
                if self.cursor.consecutive_stale_count >= self.policy.stale_threshold {
                    // Skip ahead to the head: whatever lies between the
                    // expired position and the head is lost.
                    self.cursor.position = None;
                    self.cursor.consecutive_stale_count = 0;
                    Transition {
                        state: IngestState::Reset,
                        delay: self.policy.base_interval,
                    }
                } else {
                    Transition {
                        state: IngestState::BackingOff,
                        delay: self
                            .policy
                            .backoff_delay(self.cursor.consecutive_stale_count),
                    }
                }
            }
            FetchOutcome::Failed { retry_after } => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let backoff = self.policy.backoff_delay(self.consecutive_failures);
                Transition {
                    state: IngestState::BackingOff,
                    delay: retry_after.map_or(backoff, |hint| hint.max(backoff)),
                }
            }
        };
        self.state = transition.state;
        transition
    }

    /// Point the cursor back at the feed head.
    pub fn reset(&mut self) {
        self.cursor.position = None;
        self.cursor.consecutive_stale_count = 0;
        self.state = IngestState::Reset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::FeedKind;

    fn policy(threshold: u32) -> BackoffPolicy {
        BackoffPolicy {
            base_interval: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
            stale_threshold: threshold,
        }
    }

    fn machine_at(position: &str, threshold: u32) -> CursorMachine {
        let mut cursor = FeedCursor::at_head(FeedKind::Post);
        cursor.position = Some(position.to_string());
        CursorMachine::new(cursor, policy(threshold))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff_delay(0), Duration::from_secs(10));
        assert_eq!(p.backoff_delay(1), Duration::from_secs(20));
        assert_eq!(p.backoff_delay(3), Duration::from_secs(80));
        assert_eq!(p.backoff_delay(5), Duration::from_secs(300));
        assert_eq!(p.backoff_delay(64), Duration::from_secs(300));
    }

    #[test]
    fn test_fresh_page_advances_and_clears_counters() {
        let mut m = machine_at("t3_a", 5);
        m.apply(FetchOutcome::Stale, Utc::now());
        let now = Utc::now();
        let t = m.apply(
            FetchOutcome::Fresh {
                next_position: Some("t3_b".to_string()),
            },
            now,
        );
        assert_eq!(t.state, IngestState::Advancing);
        assert_eq!(t.delay, Duration::from_secs(10));
        assert_eq!(m.cursor().position.as_deref(), Some("t3_b"));
        assert_eq!(m.cursor().consecutive_stale_count, 0);
        assert_eq!(m.cursor().last_advanced_at, Some(now));
    }

    #[test]
    fn test_stale_below_threshold_holds_position() {
        let mut m = machine_at("t3_a", 5);
        for k in 1..5 {
            let t = m.apply(FetchOutcome::Stale, Utc::now());
            assert_eq!(t.state, IngestState::BackingOff);
            assert_eq!(t.delay, policy(5).backoff_delay(k));
            assert_eq!(m.cursor().position.as_deref(), Some("t3_a"));
            assert_eq!(m.cursor().consecutive_stale_count, k);
        }
    }

    #[test]
    fn test_stale_threshold_resets_to_head() {
        let mut m = machine_at("t3_a", 5);
        for _ in 0..4 {
            m.apply(FetchOutcome::Stale, Utc::now());
        }
        let t = m.apply(FetchOutcome::Stale, Utc::now());
        assert_eq!(t.state, IngestState::Reset);
        assert_eq!(t.delay, Duration::from_secs(10));
        assert_eq!(m.cursor().position, None);
        assert_eq!(m.cursor().consecutive_stale_count, 0);
    }

    #[test]
    fn test_errors_back_off_without_touching_cursor() {
        let mut m = machine_at("t3_a", 2);
        for n in 1..=6 {
            let t = m.apply(FetchOutcome::Failed { retry_after: None }, Utc::now());
            assert_eq!(t.state, IngestState::BackingOff);
            assert_eq!(t.delay, policy(2).backoff_delay(n));
        }
        // Errors never count toward the stale threshold
        assert_eq!(m.cursor().position.as_deref(), Some("t3_a"));
        assert_eq!(m.cursor().consecutive_stale_count, 0);
        assert_eq!(m.consecutive_failures(), 6);
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let mut m = machine_at("t3_a", 5);
        let t = m.apply(
            FetchOutcome::Failed {
                retry_after: Some(Duration::from_secs(120)),
            },
            Utc::now(),
        );
        assert_eq!(t.delay, Duration::from_secs(120));

        // A hint shorter than the back-off doesn't shorten it
        let t = m.apply(
            FetchOutcome::Failed {
                retry_after: Some(Duration::from_secs(1)),
            },
            Utc::now(),
        );
        assert_eq!(t.delay, Duration::from_secs(40));
    }

    #[test]
    fn test_error_between_stale_pages_keeps_stale_count() {
        let mut m = machine_at("t3_a", 3);
        m.apply(FetchOutcome::Stale, Utc::now());
        m.apply(FetchOutcome::Failed { retry_after: None }, Utc::now());
        m.apply(FetchOutcome::Stale, Utc::now());
        assert_eq!(m.cursor().consecutive_stale_count, 2);
        let t = m.apply(FetchOutcome::Stale, Utc::now());
        assert_eq!(t.state, IngestState::Reset);
    }

    #[test]
    fn test_fresh_without_next_position_keeps_position() {
        let mut m = machine_at("t3_a", 5);
        m.apply(FetchOutcome::Fresh { next_position: None }, Utc::now());
        assert_eq!(m.cursor().position.as_deref(), Some("t3_a"));
    }
}
