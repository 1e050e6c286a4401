//! Slot machine.
//!
//! Three reels with fixed symbol distributions and a deterministic payout
//! table. A player gets a fixed number of spins per UTC hour (more for VIPs);
//! the counter resets lazily when the stored last play falls in another hour
//! or day. Every losing spin feeds a per-shard progressive jackpot paid out on
//! three sevens.
//!
//! Payouts (multiples of the bet):
//! - 7️⃣7️⃣7️⃣ = jackpot pot
//! - 🚓🚓🚓 = ×50
//! - 🚨🚨🚨 = ×20
//! - 👮👮👮 = ×14
//! - 🔦🔦🔦 = ×10
//! - 📻📻📻 = ×8
//! - ⭐⭐⭐ = ×5
//! - two ⭐ = ×3
//! - one ⭐ = ×2

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use rand::Rng;

use super::shard::ShardId;
use super::types::{CasinoJackpot, LedgerEntry, LedgerKind, PlayerRecord};
use super::{player_doc_id, GameError};
use crate::cache::{MaxAge, TimedCache};
use crate::config::{CacheConfig, CasinoConfig};
use crate::logutil::escape_log;
use crate::metrics;
use crate::store::record::{tx_get, tx_put};
use crate::store::{decode, Direction, DocumentStore, Filter, Query, Record, StoreError};

pub const CASINO_FAMILY: &str = "casino";
const JACKPOT_MULTIPLIER: u32 = 100;
const STAR: &str = "⭐";

const REEL1: [&str; 22] = [
    "⭐", "🔦", "📻", "🚨", "⭐", "👮", "🚓", "⬜", "🔦", "⭐", "🚨", "👮", "⬜", "🔦", "📻", "7️⃣",
    "⭐", "🚨", "👮", "🔦", "📻", "⬜",
];
const REEL2: [&str; 22] = [
    "📻", "🔦", "🚨", "⭐", "👮", "📻", "🔦", "🚨", "👮", "⬜", "🚓", "📻", "7️⃣", "🔦", "🚨", "⬜",
    "👮", "📻", "🚨", "🔦", "⬜", "📻",
];
const REEL3: [&str; 22] = [
    "🔦", "📻", "⭐", "🚨", "📻", "⬜", "🔦", "👮", "🚨", "📻", "7️⃣", "🔦", "⭐", "🚨", "⬜", "📻",
    "🚓", "⬜", "📻", "🚨", "🔦", "📻",
];

pub fn spin_reels<R: Rng>(rng: &mut R) -> [&'static str; 3] {
    [
        REEL1[rng.gen_range(0..REEL1.len())],
        REEL2[rng.gen_range(0..REEL2.len())],
        REEL3[rng.gen_range(0..REEL3.len())],
    ]
}

/// Payout multiplier and description of a reel combination.
pub fn evaluate(reels: [&str; 3]) -> (u32, String) {
    let [r1, r2, r3] = reels;
    if r1 == r2 && r2 == r3 {
        let multiplier = match r1 {
            "7️⃣" => JACKPOT_MULTIPLIER,
            "🚓" => 50,
            "🚨" => 20,
            "👮" => 14,
            "🔦" => 10,
            "📻" => 8,
            STAR => 5,
            _ => 0,
        };
        let description = if multiplier == JACKPOT_MULTIPLIER {
            "JACKPOT! 7️⃣7️⃣7️⃣".to_string()
        } else if multiplier == 0 {
            "Võitu ei tulnud".to_string()
        } else {
            format!("Kolm {r1}")
        };
        return (multiplier, description);
    }
    match reels.iter().filter(|&&symbol| symbol == STAR).count() {
        2 => (3, "Kaks tähte".into()),
        1 => (2, "Täht".into()),
        _ => (0, "Võitu ei tulnud".into()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpinOutcome {
    pub reels: [&'static str; 3],
    pub multiplier: u32,
    pub bet: i64,
    pub winnings: i64,
    pub jackpot_won: bool,
    pub description: String,
    pub money_after: i64,
    pub plays_left: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CasinoLeaderboardEntry {
    pub rank: usize,
    pub username: String,
    pub total_winnings: i64,
    pub biggest_win: i64,
    pub total_spins: u64,
}

/// Ordered casino leaderboard query; needs `players:shard,casino.total_winnings`.
pub fn casino_leaderboard_query(shard: &ShardId, limit: usize) -> Query {
    Query::new(PlayerRecord::COLLECTION)
        .filter(Filter::eq("shard", shard.as_str()))
        .order_by("casino.total_winnings", Direction::Descending)
        .limit(limit)
}

pub struct CasinoService<S: DocumentStore> {
    store: Arc<S>,
    cache: TimedCache,
    shard: ShardId,
    config: CasinoConfig,
    windows: CacheConfig,
}

impl<S: DocumentStore> CasinoService<S> {
    pub fn new(store: Arc<S>, cache: TimedCache, shard: ShardId, config: CasinoConfig, windows: CacheConfig) -> Self {
        Self {
            store,
            cache,
            shard,
            config,
            windows,
        }
    }

    fn hourly_limit(&self, player: &PlayerRecord) -> u32 {
        if player.is_vip {
            self.config.vip_hourly_limit
        } else {
            self.config.hourly_limit
        }
    }

    fn check_player(&self, player: &PlayerRecord, bet: i64, now: DateTime<Utc>) -> Result<u32, GameError> {
        let limit = self.hourly_limit(player);
        let used = player.casino.effective_plays(now);
        if used >= limit {
            return Err(GameError::RateLimitExceeded { used, limit });
        }
        if player.money < bet {
            return Err(GameError::InsufficientFunds {
                currency: "money",
                needed: bet,
                available: player.money,
            });
        }
        Ok(used)
    }

    /// Plays the player still has in the current hour.
    pub fn plays_left_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<u32, GameError> {
        let player = super::load_player(self.store.as_ref(), &self.shard, user_id)?;
        Ok(self
            .hourly_limit(&player)
            .saturating_sub(player.casino.effective_plays(now)))
    }

    pub fn spin(&self, user_id: &str, bet: i64) -> Result<SpinOutcome, GameError> {
        self.spin_at(user_id, bet, &mut rand::thread_rng(), Utc::now())
    }

    /// One spin. Reels are drawn once, before the transaction, so a retried
    /// transaction settles the same result.
    pub fn spin_at<R: Rng>(
        &self,
        user_id: &str,
        bet: i64,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<SpinOutcome, GameError> {
        if bet < self.config.min_bet || bet > self.config.max_bet {
            return Err(GameError::InvalidAmount(format!(
                "bet {bet} outside {}..={}",
                self.config.min_bet, self.config.max_bet
            )));
        }
        let player = super::load_player(self.store.as_ref(), &self.shard, user_id)?;
        self.check_player(&player, bet, now)?;

        let reels = spin_reels(rng);
        let (multiplier, description) = evaluate(reels);
        let player_id = player_doc_id(&self.shard, user_id);
        let jackpot_id = self.shard.as_str();
        let seed = self.config.jackpot_seed;
        let contribution = bet * self.config.jackpot_contribution_percent as i64 / 100;

        let outcome = self.store.run_transaction(|tx| {
            let mut player = super::tx_player(tx, &player_id)?;
            let used = self.check_player(&player, bet, now)?;
            let mut jackpot = tx_get::<CasinoJackpot>(tx, jackpot_id)?
                .unwrap_or_else(|| CasinoJackpot::seeded(jackpot_id, seed));

            let jackpot_won = multiplier == JACKPOT_MULTIPLIER;
            let winnings = if jackpot_won {
                let pot = jackpot.amount;
                jackpot.amount = seed;
                jackpot.last_winner = Some(player.username.clone());
                jackpot.last_win = Some(now);
                pot
            } else {
                if multiplier == 0 {
                    jackpot.amount = jackpot.amount.saturating_add(contribution);
                }
                bet * multiplier as i64
            };

            player.money = player.money - bet + winnings;
            player.casino.plays_used = used + 1;
            player.casino.last_play = Some(now);
            player.casino.total_spins += 1;
            player.casino.total_winnings += winnings;
            player.casino.biggest_win = player.casino.biggest_win.max(winnings);
            player.updated_at = now;

            tx_put(tx, &player_id, &player)?;
            tx_put(tx, jackpot_id, &jackpot)?;
            let entry = LedgerEntry::new(&player.user_id, jackpot_id, LedgerKind::CasinoSpin, winnings - bet, 0, now)
                .with_memo(reels.concat());
            tx_put(tx, &entry.id, &entry)?;

            Ok::<_, GameError>(SpinOutcome {
                reels,
                multiplier,
                bet,
                winnings,
                jackpot_won,
                description: description.clone(),
                money_after: player.money,
                plays_left: self.hourly_limit(&player).saturating_sub(used + 1),
            })
        })?;

        if outcome.jackpot_won {
            info!(
                "{} hit the jackpot on {}: {}",
                escape_log(user_id),
                self.shard,
                outcome.winnings
            );
        }
        Ok(outcome)
    }

    pub fn jackpot(&self) -> Result<CasinoJackpot, GameError> {
        let jackpot = self
            .store
            .get(CasinoJackpot::COLLECTION, self.shard.as_str())?
            .map(|doc| decode::<CasinoJackpot>(&doc))
            .transpose()?;
        Ok(jackpot.unwrap_or_else(|| CasinoJackpot::seeded(self.shard.as_str(), self.config.jackpot_seed)))
    }

    pub fn leaderboard_at(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<CasinoLeaderboardEntry>, GameError> {
        let key = format!("{}_leaderboard_{}_{}", CASINO_FAMILY, self.shard, limit);
        let window = MaxAge::Within(Duration::minutes(self.windows.casino_leaderboard_ttl_minutes));
        if let Some(rows) = self.cache.get_at::<Vec<CasinoLeaderboardEntry>>(&key, window, now) {
            return Ok(rows);
        }
        let query = casino_leaderboard_query(&self.shard, limit);
        let docs = match self.store.query(&query) {
            Ok(docs) => docs,
            Err(StoreError::MissingIndex { fields, .. }) => {
                warn!("casino leaderboard on {} degraded: missing index [{}]", self.shard, fields);
                metrics::inc_degraded_queries();
                self.store.query(&query.unordered())?
            }
            Err(e) => return Err(e.into()),
        };
        let mut players: Vec<PlayerRecord> = docs
            .iter()
            .filter_map(|doc| match decode::<PlayerRecord>(doc) {
                Ok(player) => Some(player),
                Err(e) => {
                    warn!("casino leaderboard skipping {}: {}", doc.id, e);
                    metrics::inc_malformed_documents();
                    None
                }
            })
            .filter(|p| !p.exclude_from_leaderboard && p.casino.total_spins > 0)
            .collect();
        players.sort_by(|a, b| {
            b.casino
                .total_winnings
                .cmp(&a.casino.total_winnings)
                .then(a.username.cmp(&b.username))
        });
        let rows: Vec<CasinoLeaderboardEntry> = players
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, p)| CasinoLeaderboardEntry {
                rank: i + 1,
                username: p.username,
                total_winnings: p.casino.total_winnings,
                biggest_win: p.casino.biggest_win,
                total_spins: p.casino.total_spins,
            })
            .collect();
        self.cache.set_at(&key, rows.clone(), now);
        Ok(rows)
    }
}
