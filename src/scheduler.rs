// Campaign scheduler: fans out one matching job per due campaign.
//
// Each tick reads the campaigns table (the durable timer table: next due =
// `last_checked_at + interval`) and spawns a job for every active campaign
// that is due and not already running. Due-ness is confirmed again after the
// campaign is claimed. The tick itself never runs matching
// logic. Jobs run on the tokio runtime, at most `max_concurrent_jobs` at a
// time, and commit `last_checked_at` only when they finish.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::db::models::Campaign;
use crate::db::Database;
use crate::error::JobError;
use crate::matching::{run_matching_job, JobReport, JobSettings, MatchFilter};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub job: JobSettings,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            max_concurrent_jobs: 4,
            job: JobSettings::default(),
        }
    }
}

/// What one tick decided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub dispatched: Vec<i64>,
    /// Due, but the previous job for the campaign is still running
    pub skipped_running: Vec<i64>,
}

type InFlight = Arc<Mutex<HashSet<i64>>>;

/// Marks a campaign as running for as long as it lives.
struct InFlightGuard {
    set: InFlight,
    campaign_id: i64,
}

impl InFlightGuard {
    /// Claim the campaign, or `None` if a job for it is already running.
    fn claim(set: &InFlight, campaign_id: i64) -> Option<Self> {
        let mut running = set.lock().unwrap_or_else(|e| e.into_inner());
        running.insert(campaign_id).then(|| Self {
            set: set.clone(),
            campaign_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut running = self.set.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.campaign_id);
    }
}

pub struct Scheduler {
    db: Arc<dyn Database>,
    filter: Arc<dyn MatchFilter>,
    settings: SchedulerSettings,
    in_flight: InFlight,
    permits: Arc<Semaphore>,
    jobs: tokio::sync::Mutex<JoinSet<()>>,
}

impl Scheduler {
    pub fn new(
        db: Arc<dyn Database>,
        filter: Arc<dyn MatchFilter>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            db,
            filter,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1))),
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            jobs: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    pub fn is_running(&self, campaign_id: i64) -> bool {
        let running = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        running.contains(&campaign_id)
    }

    pub fn running_count(&self) -> usize {
        let running = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        running.len()
    }

    /// Dispatch a job for every due campaign that isn't already running.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.reap_finished().await;

        let mut report = TickReport::default();
        let campaigns = self.db.list_campaigns(true).await?;

        for campaign in campaigns.into_iter().filter(|c| c.is_due(now)) {
            let Some(guard) = InFlightGuard::claim(&self.in_flight, campaign.id) else {
                debug!(
                    campaign = campaign.id,
                    "Previous job still running, skipping this tick"
                );
                report.skipped_running.push(campaign.id);
                continue;
            };

            // The list above may predate a job that committed and released
            // its claim since; only the row read under the claim counts.
            match self.db.get_campaign(campaign.id).await {
                Ok(Some(fresh)) if fresh.is_due(now) => {
                    report.dispatched.push(fresh.id);
                    self.spawn_job(fresh, guard).await;
                }
                Ok(_) => {
                    debug!(
                        campaign = campaign.id,
                        "Campaign checked or paused since listing, skipping"
                    );
                }
                Err(e) => {
                    warn!(campaign = campaign.id, error = %e, "Failed to re-read campaign");
                }
            }
        }

        if !report.dispatched.is_empty() {
            info!(
                dispatched = report.dispatched.len(),
                skipped = report.skipped_running.len(),
                "Dispatched matching jobs"
            );
        }
        Ok(report)
    }

    async fn spawn_job(&self, campaign: Campaign, guard: InFlightGuard) {
        let db = self.db.clone();
        let filter = self.filter.clone();
        let permits = self.permits.clone();
        let settings = self.settings.job;

        let mut jobs = self.jobs.lock().await;
        jobs.spawn(async move {
            // Declared first so it is released last, after the check is
            // committed; a tick can never see the old `last_checked_at`
            // with the campaign already unclaimed.
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let _ = execute_job(db, filter.as_ref(), &campaign, &settings).await;
        });
    }

    /// Drop bookkeeping for jobs that already finished.
    async fn reap_finished(&self) {
        let mut jobs = self.jobs.lock().await;
        while let Some(result) = jobs.try_join_next() {
            log_join_result(result);
        }
    }

    /// Wait for every dispatched job to finish.
    pub async fn wait_idle(&self) {
        let mut jobs = self.jobs.lock().await;
        while let Some(result) = jobs.join_next().await {
            log_join_result(result);
        }
    }

    /// Tick on `tick_interval` until shutdown, then let running jobs finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_secs = self.settings.tick_interval.as_secs_f64(),
            max_jobs = self.settings.max_concurrent_jobs,
            "Campaign scheduler started"
        );

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        warn!(error = %e, "Scheduler tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(running = self.running_count(), "Scheduler stopping, waiting for running jobs");
        self.wait_idle().await;
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Matching job panicked");
        }
    }
}

/// Run one campaign's job and commit its check time.
///
/// `last_checked_at` becomes the job's start time whether or not the job
/// succeeded, so a persistently failing campaign doesn't rescan the same
/// window forever. The failure reason is stored on the campaign.
pub async fn execute_job(
    db: Arc<dyn Database>,
    filter: &dyn MatchFilter,
    campaign: &Campaign,
    settings: &JobSettings,
) -> Result<JobReport, JobError> {
    let started_at = Utc::now();
    let result = run_matching_job(db.clone(), filter, campaign, started_at, settings).await;

    let failure = match &result {
        Ok(_) => None,
        Err(e) => {
            warn!(campaign = campaign.id, error = %e, "Matching job failed");
            Some(e.to_string())
        }
    };

    if let Err(e) = db
        .record_campaign_check(campaign.id, started_at, failure.as_deref())
        .await
    {
        error!(campaign = campaign.id, error = %e, "Failed to record campaign check");
    }

    result
}
