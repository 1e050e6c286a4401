//! Pollid → money conversion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;

use super::shard::ShardId;
use super::types::{LedgerEntry, LedgerKind};
use super::{player_doc_id, GameError};
use crate::config::EconomyConfig;
use crate::logutil::escape_log;
use crate::store::record::tx_put;
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub pollid_spent: i64,
    pub money_gained: i64,
    pub pollid_after: i64,
    pub money_after: i64,
    pub ledger_id: String,
}

fn check_pollid(available: i64, amount: i64) -> Result<(), GameError> {
    if available < amount {
        return Err(GameError::InsufficientFunds {
            currency: "pollid",
            needed: amount,
            available,
        });
    }
    Ok(())
}

pub struct CurrencyService<S: DocumentStore> {
    store: Arc<S>,
    shard: ShardId,
    economy: EconomyConfig,
}

impl<S: DocumentStore> CurrencyService<S> {
    pub fn new(store: Arc<S>, shard: ShardId, economy: EconomyConfig) -> Self {
        Self {
            store,
            shard,
            economy,
        }
    }

    pub fn convert_pollid(&self, user_id: &str, amount: i64) -> Result<Conversion, GameError> {
        self.convert_pollid_at(user_id, amount, Utc::now())
    }

    /// Spend `amount` pollid for `amount × rate` money in one transaction.
    /// The balance is checked before the transaction and again on the fresh
    /// document inside it, so concurrent conversions can never overdraw.
    pub fn convert_pollid_at(
        &self,
        user_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Conversion, GameError> {
        if amount <= 0 {
            return Err(GameError::InvalidAmount(format!("{amount} pollid")));
        }
        let money_gained = amount
            .checked_mul(self.economy.pollid_rate)
            .ok_or_else(|| GameError::InvalidAmount(format!("{amount} pollid")))?;

        let player = super::load_player(self.store.as_ref(), &self.shard, user_id)?;
        check_pollid(player.pollid, amount)?;

        let player_id = player_doc_id(&self.shard, user_id);
        let shard = self.shard.as_str();
        let conversion = self.store.run_transaction(|tx| {
            let mut player = super::tx_player(tx, &player_id)?;
            check_pollid(player.pollid, amount)?;
            player.pollid -= amount;
            player.money += money_gained;
            player.updated_at = now;
            tx_put(tx, &player_id, &player)?;

            let entry = LedgerEntry::new(user_id, shard, LedgerKind::PollidConversion, money_gained, -amount, now);
            tx_put(tx, &entry.id, &entry)?;
            Ok::<_, GameError>(Conversion {
                pollid_spent: amount,
                money_gained,
                pollid_after: player.pollid,
                money_after: player.money,
                ledger_id: entry.id,
            })
        })?;

        info!(
            "{} converted {} pollid to {} money on {}",
            escape_log(user_id),
            amount,
            money_gained,
            self.shard
        );
        Ok(conversion)
    }
}
