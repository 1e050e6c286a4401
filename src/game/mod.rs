//! Game services over the document store: the crime index, aggregated views,
//! admin batch jobs and the currency-moving actions that feed them.

pub mod admin;
pub mod aggregation;
pub mod casino;
pub mod context;
pub mod crime;
pub mod currency;
pub mod errors;
pub mod organization;
pub mod progression;
pub mod roster;
pub mod scheduler;
pub mod shard;
pub mod shop;
pub mod types;
pub mod work;

pub use aggregation::{AggregateViews, AggregationService, LeaderboardPage};
pub use context::GameContext;
pub use crime::{CrimeIndex, SweepReport, WorkReduction};
pub use errors::GameError;
pub use progression::{exp_for_level, exp_to_next_level, level_from_exp};
pub use shard::ShardId;
pub use types::{DepartmentCrimeState, PlayerRecord};

use crate::store::record::tx_get;
use crate::store::{decode, DocumentStore, Query, Record, TransactionOps};

/// Document id of a player on a shard.
pub fn player_doc_id(shard: &ShardId, user_id: &str) -> String {
    shard.qualify(user_id)
}

/// Read one player. Missing and malformed documents are errors.
pub fn load_player<S: DocumentStore + ?Sized>(
    store: &S,
    shard: &ShardId,
    user_id: &str,
) -> Result<PlayerRecord, GameError> {
    let id = player_doc_id(shard, user_id);
    match store.get(PlayerRecord::COLLECTION, &id)? {
        Some(doc) => Ok(decode(&doc)?),
        None => Err(GameError::NotFound(format!("player {id}"))),
    }
}

/// Read one player inside a transaction.
pub fn tx_player(tx: &mut dyn TransactionOps, id: &str) -> Result<PlayerRecord, GameError> {
    tx_get::<PlayerRecord>(tx, id)?.ok_or_else(|| GameError::NotFound(format!("player {id}")))
}

/// Ordered queries the services issue, with a label for each. Used to check
/// that the store declares every composite index they need.
pub fn indexed_queries(shard: &ShardId, leaderboard_limit: usize) -> Vec<(&'static str, Query)> {
    vec![
        ("leaderboard", aggregation::leaderboard_query(shard, leaderboard_limit)),
        ("casino leaderboard", casino::casino_leaderboard_query(shard, leaderboard_limit)),
    ]
}
