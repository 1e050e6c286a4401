//! Clock-driven crime sweeps.
//!
//! The scheduler polls the UTC clock and runs the daily increase once per
//! calendar day and the monthly reset check once per calendar month, on every
//! configured shard. It keeps the last boundary it acted on so repeated checks
//! inside the same day never run a sweep twice. Both sweeps are safe to repeat
//! anyway: the daily increase skips states already raised today and the
//! monthly check only touches states from an earlier month.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::{debug, info, warn};
use tokio::sync::watch;

use super::crime::{CrimeIndex, SweepReport};
use super::shard::ShardId;
use crate::cache::TimedCache;
use crate::config::{CrimeConfig, SchedulerConfig};
use crate::store::{run_blocking, DocumentStore, StoreError};

/// Sweeps that a clock check found due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepsDue {
    pub daily: bool,
    pub monthly: bool,
}

impl SweepsDue {
    pub fn any(&self) -> bool {
        self.daily || self.monthly
    }
}

/// Where and how the sweeps run.
pub struct SweepTargets<S: DocumentStore> {
    pub store: Arc<S>,
    pub cache: TimedCache,
    pub shards: Vec<ShardId>,
    pub crime: CrimeConfig,
    pub operation_timeout: Duration,
}

pub struct SweepScheduler {
    config: SchedulerConfig,
    last_daily: Option<NaiveDate>,
    last_monthly: Option<(i32, u32)>,
}

impl SweepScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            last_daily: None,
            last_monthly: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Which sweeps have not yet run for the day and month containing `now`.
    pub fn due_at(&self, now: DateTime<Utc>) -> SweepsDue {
        if !self.config.enabled {
            return SweepsDue::default();
        }
        let today = now.date_naive();
        SweepsDue {
            daily: self.last_daily != Some(today),
            monthly: self.last_monthly != Some((today.year(), today.month())),
        }
    }

    /// Record that the sweeps in `due` ran for the boundary containing `now`.
    pub fn mark_run(&mut self, due: SweepsDue, now: DateTime<Utc>) {
        let today = now.date_naive();
        if due.daily {
            self.last_daily = Some(today);
        }
        if due.monthly {
            self.last_monthly = Some((today.year(), today.month()));
        }
    }

    /// One clock check: run whatever is due on every shard and mark it done.
    /// A shard whose sweep timed out does not block marking the boundary;
    /// the next boundary or a manual `sweep` catches it up.
    pub async fn tick<S: DocumentStore + 'static>(
        &mut self,
        targets: &SweepTargets<S>,
        now: DateTime<Utc>,
    ) -> Vec<(ShardId, Result<SweepReport, StoreError>)> {
        let due = self.due_at(now);
        if !due.any() {
            debug!("no crime sweeps due at {}", now.format("%Y-%m-%d %H:%M"));
            return Vec::new();
        }
        let mut results = Vec::new();
        for shard in &targets.shards {
            let outcome = run_shard(targets, shard.clone(), due, now).await;
            if let Err(e) = &outcome {
                warn!("crime sweep on {} failed: {}", shard, e);
            }
            results.push((shard.clone(), outcome));
        }
        self.mark_run(due, now);
        results
    }

    /// Check the clock every `check_interval_secs` until `shutdown` flips to true.
    pub async fn run<S: DocumentStore + 'static>(
        mut self,
        targets: SweepTargets<S>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if !self.config.enabled {
            info!("crime sweep scheduler disabled");
            return;
        }
        info!(
            "crime sweep scheduler started for {} shard(s), checking every {}s",
            targets.shards.len(),
            self.config.check_interval_secs
        );
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.check_interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&targets, Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("crime sweep scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Monthly check first, so a new month starts from the reset level before the
/// day's increase lands on it.
async fn run_shard<S: DocumentStore + 'static>(
    targets: &SweepTargets<S>,
    shard: ShardId,
    due: SweepsDue,
    now: DateTime<Utc>,
) -> Result<SweepReport, StoreError> {
    let store = Arc::clone(&targets.store);
    let cache = targets.cache.clone();
    let config = targets.crime.clone();
    run_blocking(targets.operation_timeout, move || {
        let crime = CrimeIndex::new(store, cache, shard, config);
        let mut combined = SweepReport::default();
        if due.monthly {
            merge(&mut combined, crime.monthly_reset_sweep_at(now));
        }
        if due.daily {
            merge(&mut combined, crime.daily_increase_sweep_at(now));
        }
        Ok(combined)
    })
    .await
}

fn merge(total: &mut SweepReport, part: SweepReport) {
    total.examined = total.examined.max(part.examined);
    total.changed += part.changed;
    total.created += part.created;
    total.errors.extend(part.errors);
}
