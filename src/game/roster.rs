//! Roster scans over the players collection.

use std::collections::HashMap;

use log::warn;

use super::shard::ShardId;
use super::types::{PlayerRecord, GRADUATION_COURSE};
use crate::metrics;
use crate::store::{decode, DocumentStore, Filter, Query, Record, StoreError};

/// Result of a roster fetch. Malformed documents are skipped, not fatal.
#[derive(Debug, Clone, Default)]
pub struct RosterScan {
    pub players: Vec<PlayerRecord>,
    pub skipped: usize,
}

/// Query for every graduated player of a shard.
pub fn graduated_query(shard: &ShardId) -> Query {
    Query::new(PlayerRecord::COLLECTION)
        .filter(Filter::eq("shard", shard.as_str()))
        .filter(Filter::array_contains("completed_courses", GRADUATION_COURSE))
}

pub fn graduated_roster<S: DocumentStore>(store: &S, shard: &ShardId) -> Result<RosterScan, StoreError> {
    let docs = store.query(&graduated_query(shard))?;
    let mut scan = RosterScan::default();
    for doc in &docs {
        match decode::<PlayerRecord>(doc) {
            Ok(player) => scan.players.push(player),
            Err(e) => {
                warn!("skipping player document {}: {}", doc.id, e);
                metrics::inc_malformed_documents();
                scan.skipped += 1;
            }
        }
    }
    Ok(scan)
}

/// Staff count of one department.
pub fn headcount(players: &[PlayerRecord], department: &str) -> usize {
    players
        .iter()
        .filter(|p| p.is_department_staff() && p.department.as_deref() == Some(department))
        .count()
}

/// Staff count of every department that has any.
pub fn headcounts(players: &[PlayerRecord]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for player in players.iter().filter(|p| p.is_department_staff()) {
        if let Some(department) = &player.department {
            *counts.entry(department.clone()).or_insert(0) += 1;
        }
    }
    counts
}
