//! Work shifts: pay the officer, then let the shift push the department's
//! crime level down.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;

use super::crime::{CrimeIndex, WorkReduction};
use super::progression::level_from_exp;
use super::shard::ShardId;
use super::types::{LedgerEntry, LedgerKind};
use super::{organization, player_doc_id, GameError};
use crate::cache::TimedCache;
use crate::config::WorkConfig;
use crate::logutil::escape_log;
use crate::store::record::tx_put;
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ShiftReport {
    pub hours: u32,
    pub wage: i64,
    pub experience_gained: u64,
    pub reputation_gained: i64,
    pub level_before: u32,
    pub level_after: u32,
    pub money_after: i64,
    pub crime: WorkReduction,
}

impl ShiftReport {
    pub fn leveled_up(&self) -> bool {
        self.level_after > self.level_before
    }
}

pub struct WorkService<S: DocumentStore> {
    store: Arc<S>,
    cache: TimedCache,
    shard: ShardId,
    config: WorkConfig,
    crime: CrimeIndex<S>,
}

impl<S: DocumentStore> WorkService<S> {
    pub fn new(store: Arc<S>, cache: TimedCache, shard: ShardId, config: WorkConfig, crime: CrimeIndex<S>) -> Self {
        Self {
            store,
            cache,
            shard,
            config,
            crime,
        }
    }

    pub fn complete_work_shift(&self, user_id: &str, hours: u32) -> Result<ShiftReport, GameError> {
        self.complete_work_shift_at(user_id, hours, Utc::now())
    }

    /// Pay out a finished shift and apply it to the player's department.
    ///
    /// The payout is one transaction. The crime reduction runs afterwards and
    /// reports its own failure through `WorkReduction::success` so a crime
    /// store hiccup never takes back the wage.
    pub fn complete_work_shift_at(
        &self,
        user_id: &str,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Result<ShiftReport, GameError> {
        if hours == 0 || hours > self.config.max_hours {
            return Err(GameError::InvalidAmount(format!(
                "{hours} hours (1..={})",
                self.config.max_hours
            )));
        }
        let player = super::load_player(self.store.as_ref(), &self.shard, user_id)?;
        let department = eligible_department(&player)?;

        let wage = self.config.wage_per_hour * hours as i64;
        let experience_gained = self.config.exp_per_hour * hours as u64;
        let reputation_gained = self.config.reputation_per_hour * hours as i64;
        let player_id = player_doc_id(&self.shard, user_id);
        let shard = self.shard.as_str();

        let (level_before, level_after, money_after) = self.store.run_transaction(|tx| {
            let mut player = super::tx_player(tx, &player_id)?;
            eligible_department(&player)?;
            let level_before = player.level;
            player.money += wage;
            player.experience += experience_gained;
            player.reputation += reputation_gained;
            player.level = level_from_exp(player.experience);
            player.updated_at = now;
            tx_put(tx, &player_id, &player)?;

            let entry = LedgerEntry::new(user_id, shard, LedgerKind::WorkShift, wage, 0, now)
                .with_memo(format!("{hours}h {department}"));
            tx_put(tx, &entry.id, &entry)?;
            Ok::<_, GameError>((level_before, player.level, player.money))
        })?;

        let crime = self.crime.apply_work_at(&department, hours as f64, now)?;
        self.cache
            .clear_by_prefix(&format!("{}_{}_", super::aggregation::LEADERBOARD_FAMILY, self.shard));
        self.cache
            .remove(&self.shard.cache_key(super::aggregation::AGGREGATES_FAMILY));

        info!(
            "{} worked {}h in {} on {}: +{} money, level {} -> {}",
            escape_log(user_id),
            hours,
            department,
            self.shard,
            wage,
            level_before,
            level_after
        );
        Ok(ShiftReport {
            hours,
            wage,
            experience_gained,
            reputation_gained,
            level_before,
            level_after,
            money_after,
            crime,
        })
    }
}

fn eligible_department(player: &super::types::PlayerRecord) -> Result<String, GameError> {
    if !player.is_graduated() {
        return Err(GameError::NotEligible(format!("{} has not graduated", player.user_id)));
    }
    match player.department.as_deref() {
        Some(department) if organization::is_academy(department) => {
            Err(GameError::NotEligible(format!("{} is still at the academy", player.user_id)))
        }
        Some(department) if organization::prefecture_of(department).is_none() => {
            Err(GameError::UnknownDepartment(department.to_string()))
        }
        Some(department) => Ok(department.to_string()),
        None => Err(GameError::NotEligible(format!("{} has no department", player.user_id))),
    }
}
