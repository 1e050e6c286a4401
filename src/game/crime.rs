//! # Crime index
//!
//! Every non-academy department on every shard carries a crime level between
//! 0 and 100. The level moves through four named transitions:
//!
//! - **lazy init**: the first read or write of a missing state creates it at
//!   the configured initial level (50)
//! - **daily increase**: +5 once per UTC day, driven by the scheduler sweep
//! - **work reduction**: a completed shift lowers the level by
//!   `base × (hours / 12) × (10 / max(headcount, 1))`, rounded to two decimals
//! - **monthly reset**: back to the initial level with zero work hours, on the
//!   first access in a new UTC month or through the monthly sweep
//!
//! The academy department is rejected by every transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::aggregation::AGGREGATES_FAMILY;
use super::organization::{self, ACADEMY_DEPARTMENT};
use super::roster;
use super::shard::ShardId;
use super::types::DepartmentCrimeState;
use super::GameError;
use crate::cache::TimedCache;
use crate::config::CrimeConfig;
use crate::metrics;
use crate::store::record::{tx_get, tx_put};
use crate::store::{decode, DocumentChange, DocumentStore, Filter, Query, Record, Subscription};

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Crime reduction earned by `hours` of work in a department with `headcount` staff.
pub fn compute_reduction(config: &CrimeConfig, hours: f64, headcount: usize) -> f64 {
    let staff = headcount.max(1) as f64;
    let hours = if hours.is_finite() { hours.max(0.0) } else { 0.0 };
    round2(
        config.base_reduction
            * (hours / config.reference_hours)
            * (config.reference_headcount / staff),
    )
}

/// Add the daily step unless it already happened on `now`'s UTC date.
pub fn apply_daily_increase(state: &mut DepartmentCrimeState, step: f64, now: DateTime<Utc>) -> bool {
    if state.increased_today(now) {
        return false;
    }
    state.crime_level = round2((state.crime_level + step).clamp(0.0, 100.0));
    state.last_daily_increase = now;
    state.updated_at = now;
    true
}

pub fn apply_reduction(state: &mut DepartmentCrimeState, reduction: f64, hours: f64, now: DateTime<Utc>) {
    state.crime_level = round2((state.crime_level - reduction).clamp(0.0, 100.0));
    state.work_hours_this_cycle += hours.max(0.0);
    state.updated_at = now;
}

pub fn apply_monthly_reset(state: &mut DepartmentCrimeState, initial_level: f64, now: DateTime<Utc>) {
    state.crime_level = initial_level.clamp(0.0, 100.0);
    state.work_hours_this_cycle = 0.0;
    state.monthly_reset_at = now;
    state.updated_at = now;
}

/// Outcome of a work shift against a department's crime level. Store
/// failures produce `success == false` with zeroed numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkReduction {
    pub success: bool,
    pub previous_level: f64,
    pub new_level: f64,
    /// Amount actually taken off, `previous_level - new_level`. Smaller than
    /// [`compute_reduction`] when the level bottoms out at 0.
    pub reduction: f64,
    pub headcount: usize,
    pub message: String,
}

impl WorkReduction {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            previous_level: 0.0,
            new_level: 0.0,
            reduction: 0.0,
            headcount: 0,
            message: message.into(),
        }
    }
}

/// Summary of a bulk pass over department states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub examined: usize,
    pub changed: usize,
    pub created: usize,
    pub errors: Vec<String>,
}

/// State change delivered by [`CrimeWatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum CrimeChange {
    Updated(DepartmentCrimeState),
    Removed,
}

/// Typed feed of one department's crime state. Dropping it unsubscribes.
pub struct CrimeWatch {
    subscription: Subscription,
}

impl CrimeWatch {
    pub fn next_timeout(&self, timeout: Duration) -> Option<CrimeChange> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.subscription.recv_timeout(remaining)? {
                DocumentChange::Upserted(doc) => match decode::<DepartmentCrimeState>(&doc) {
                    Ok(state) => return Some(CrimeChange::Updated(state)),
                    Err(e) => warn!("ignoring undecodable crime state {}: {}", doc.id, e),
                },
                DocumentChange::Removed { .. } => return Some(CrimeChange::Removed),
            }
        }
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

enum Transition {
    Unchanged,
    Created,
    Changed,
}

pub struct CrimeIndex<S: DocumentStore> {
    store: Arc<S>,
    cache: TimedCache,
    shard: ShardId,
    config: CrimeConfig,
}

impl<S: DocumentStore> CrimeIndex<S> {
    pub fn new(store: Arc<S>, cache: TimedCache, shard: ShardId, config: CrimeConfig) -> Self {
        Self {
            store,
            cache,
            shard,
            config,
        }
    }

    pub fn config(&self) -> &CrimeConfig {
        &self.config
    }

    /// Prefecture of a department that takes part in the simulation.
    fn resolve(&self, department: &str) -> Result<&'static str, GameError> {
        if organization::is_academy(department) {
            return Err(GameError::AcademyExempt(ACADEMY_DEPARTMENT.to_string()));
        }
        organization::prefecture_of(department)
            .ok_or_else(|| GameError::UnknownDepartment(department.to_string()))
    }

    fn invalidate_views(&self) {
        self.cache.remove(&self.shard.cache_key(AGGREGATES_FAMILY));
    }

    /// Read (and create if missing) a department's crime state, applying any
    /// pending monthly reset before returning it. `prefecture` must match the
    /// organisation chart.
    pub fn department_stats(&self, department: &str, prefecture: &str) -> Result<DepartmentCrimeState, GameError> {
        self.department_stats_at(department, prefecture, Utc::now())
    }

    pub fn department_stats_at(
        &self,
        department: &str,
        prefecture: &str,
        now: DateTime<Utc>,
    ) -> Result<DepartmentCrimeState, GameError> {
        let known = self.resolve(department)?;
        if known != prefecture {
            debug!(
                "department {} requested under {}, chart places it in {}",
                department, prefecture, known
            );
            return Err(GameError::UnknownDepartment(format!("{department} ({prefecture})")));
        }
        let (state, transition) = self.transition(department, known, now, |_, _| false)?;
        if matches!(transition, Transition::Created) {
            info!(
                "created crime state for {} on shard {} at {:.2}",
                department, self.shard, state.crime_level
            );
        }
        Ok(state)
    }

    /// Transactionally load-or-create a state, apply a pending monthly reset,
    /// then `mutate` it. `mutate` learns whether the state was just created and
    /// returns whether it changed anything.
    fn transition<F>(
        &self,
        department: &str,
        prefecture: &str,
        now: DateTime<Utc>,
        mutate: F,
    ) -> Result<(DepartmentCrimeState, Transition), GameError>
    where
        F: Fn(&mut DepartmentCrimeState, bool) -> bool,
    {
        let id = self.shard.qualify(department);
        let initial = self.config.initial_level;
        let shard = self.shard.as_str();
        self.store.run_transaction(|tx| {
            let (mut state, mut outcome) = match tx_get::<DepartmentCrimeState>(tx, &id)? {
                Some(state) => (state, Transition::Unchanged),
                None => (
                    DepartmentCrimeState::new(department, prefecture, shard, initial, now),
                    Transition::Created,
                ),
            };
            if state.cycle_expired(now) {
                apply_monthly_reset(&mut state, initial, now);
                outcome = Transition::Changed;
            }
            let created = matches!(outcome, Transition::Created);
            if mutate(&mut state, created) && matches!(outcome, Transition::Unchanged) {
                outcome = Transition::Changed;
            }
            if !matches!(outcome, Transition::Unchanged) {
                tx_put(tx, &id, &state)?;
            }
            Ok::<_, GameError>((state, outcome))
        })
    }

    /// Apply a completed shift of `hours` to a department.
    pub fn apply_work(&self, department: &str, hours: f64) -> Result<WorkReduction, GameError> {
        self.apply_work_at(department, hours, Utc::now())
    }

    pub fn apply_work_at(
        &self,
        department: &str,
        hours: f64,
        now: DateTime<Utc>,
    ) -> Result<WorkReduction, GameError> {
        let prefecture = self.resolve(department)?;
        if !hours.is_finite() || hours <= 0.0 {
            return Err(GameError::InvalidAmount(format!("{hours} work hours")));
        }
        let headcount = match roster::graduated_roster(self.store.as_ref(), &self.shard) {
            Ok(scan) => roster::headcount(&scan.players, department),
            Err(e) => {
                warn!("headcount for {} unavailable: {}", department, e);
                return Ok(WorkReduction::failed("Kuritegevuse andmed pole praegu kättesaadavad."));
            }
        };
        let reduction = compute_reduction(&self.config, hours, headcount);
        let before = std::cell::Cell::new(0.0f64);
        let result = self.transition(department, prefecture, now, |state, _| {
            before.set(state.crime_level);
            apply_reduction(state, reduction, hours, now);
            true
        });
        match result {
            Ok((state, _)) => {
                self.invalidate_views();
                let applied = round2(before.get() - state.crime_level);
                debug!(
                    "{} on {}: {:.2} -> {:.2} ({} staff, {}h)",
                    department, self.shard, before.get(), state.crime_level, headcount, hours
                );
                Ok(WorkReduction {
                    success: true,
                    previous_level: before.get(),
                    new_level: state.crime_level,
                    reduction: applied,
                    headcount,
                    message: format!(
                        "Kuritegevus osakonnas {} langes {:.2}% ({:.2}% → {:.2}%).",
                        department,
                        applied,
                        before.get(),
                        state.crime_level
                    ),
                })
            }
            Err(GameError::Store(e)) => {
                warn!("work reduction for {} failed: {}", department, e);
                Ok(WorkReduction::failed("Kuritegevuse andmed pole praegu kättesaadavad."))
            }
            Err(other) => Err(other),
        }
    }

    /// Run the daily increase over every department of the shard. States that
    /// already increased today, or were created by this pass, are left alone.
    pub fn daily_increase_sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let step = self.config.daily_increase;
        let report = self.sweep(now, |state| apply_daily_increase(state, step, now));
        info!(
            "daily crime increase on {}: {} raised, {} created, {} errors",
            self.shard,
            report.changed,
            report.created,
            report.errors.len()
        );
        report
    }

    /// Reset every department whose cycle started in an earlier month.
    pub fn monthly_reset_sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let report = self.sweep(now, |_| false);
        info!(
            "monthly crime check on {}: {} reset, {} errors",
            self.shard,
            report.changed,
            report.errors.len()
        );
        report
    }

    /// Forced reset of every department, regardless of cycle age.
    pub fn reset_all_at(&self, now: DateTime<Utc>) -> SweepReport {
        let initial = self.config.initial_level;
        let report = self.sweep(now, |state| {
            apply_monthly_reset(state, initial, now);
            true
        });
        warn!(
            "forced crime reset on {}: {} departments reset",
            self.shard,
            report.changed + report.created
        );
        report
    }

    fn sweep<F>(&self, now: DateTime<Utc>, mutate: F) -> SweepReport
    where
        F: Fn(&mut DepartmentCrimeState) -> bool,
    {
        let mut report = SweepReport::default();
        for (department, prefecture) in organization::departments() {
            report.examined += 1;
            // Fresh states keep their creation values until the next pass.
            let outcome = self.transition(department, prefecture, now, |state, created| {
                !created && mutate(state)
            });
            match outcome {
                Ok((_, Transition::Created)) => report.created += 1,
                Ok((_, Transition::Changed)) => report.changed += 1,
                Ok((_, Transition::Unchanged)) => {}
                Err(e) => report.errors.push(format!("{department}: {e}")),
            }
        }
        metrics::inc_sweeps_run();
        self.invalidate_views();
        report
    }

    /// Every stored state of the shard, ordered by department name. States in
    /// an expired cycle are reset before being returned.
    pub fn all_states_at(&self, now: DateTime<Utc>) -> Result<Vec<DepartmentCrimeState>, GameError> {
        let query = Query::new(DepartmentCrimeState::COLLECTION)
            .filter(Filter::eq("shard", self.shard.as_str()));
        let mut states = Vec::new();
        for doc in self.store.query(&query)? {
            let state = match decode::<DepartmentCrimeState>(&doc) {
                Ok(state) => state,
                Err(e) => {
                    warn!("skipping crime state {}: {}", doc.id, e);
                    metrics::inc_malformed_documents();
                    continue;
                }
            };
            if state.cycle_expired(now) {
                states.push(self.department_stats_at(&state.department, &state.prefecture, now)?);
            } else {
                states.push(state);
            }
        }
        states.sort_by(|a, b| a.department.cmp(&b.department));
        Ok(states)
    }

    /// Subscribe to changes of one department's state.
    pub fn watch(&self, department: &str) -> Result<CrimeWatch, GameError> {
        self.resolve(department)?;
        let subscription = self
            .store
            .subscribe(DepartmentCrimeState::COLLECTION, &self.shard.qualify(department))?;
        Ok(CrimeWatch { subscription })
    }
}
