//! Irreversible bulk jobs run by operators: level recompute and shop restock.
//!
//! Both jobs stage their writes and commit them in sequential write batches no
//! larger than the configured batch size. A failing batch is recorded and the
//! remaining batches are still attempted; per-record problems end up in the
//! report instead of aborting the run.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::json;

use super::progression::level_from_exp;
use super::shard::ShardId;
use super::shop::{self, StockPolicy, SHOP_FAMILY};
use super::types::{PlayerRecord, ShopStock};
use super::GameError;
use crate::cache::TimedCache;
use crate::logutil::summarize_errors;
use crate::metrics;
use crate::store::{decode, encode, DocumentStore, Fields, Query, Record, WriteBatch, MAX_BATCH_OPERATIONS};

/// Outcome of a bulk job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Records examined.
    pub processed: usize,
    /// Records written (levels corrected or items restocked).
    pub updated: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
    pub errors: Vec<String>,
}

enum StagedWrite {
    Update(Fields),
    Set(Fields),
}

/// Commits staged writes in chunks of at most `batch_size`.
fn commit_chunked<S: DocumentStore>(
    store: &S,
    collection: &str,
    staged: Vec<(String, StagedWrite)>,
    batch_size: usize,
    report: &mut BatchReport,
) {
    let batch_size = batch_size.clamp(1, MAX_BATCH_OPERATIONS);
    for (number, chunk) in staged.chunks(batch_size).enumerate() {
        let mut batch = WriteBatch::new();
        let mut staged_ok = true;
        for (id, write) in chunk {
            let queued = match write {
                StagedWrite::Update(fields) => batch.update(collection, id, fields.clone()),
                StagedWrite::Set(fields) => batch.set(collection, id, fields.clone(), false),
            };
            if let Err(e) = queued {
                report.errors.push(format!("batch {}: {}", number + 1, e));
                staged_ok = false;
                break;
            }
        }
        if !staged_ok {
            report.batches_failed += 1;
            metrics::inc_batches_failed();
            continue;
        }
        match store.commit_batch(batch) {
            Ok(()) => {
                report.batches_committed += 1;
                report.updated += chunk.len();
                metrics::inc_batches_committed();
            }
            Err(e) => {
                warn!("batch {} of {} writes failed: {}", number + 1, chunk.len(), e);
                report.batches_failed += 1;
                metrics::inc_batches_failed();
                report
                    .errors
                    .push(format!("batch {} ({} records): {}", number + 1, chunk.len(), e));
            }
        }
    }
}

/// Recompute every player's level from experience and fix the ones that disagree.
pub fn recompute_levels<S: DocumentStore>(
    store: &S,
    batch_size: usize,
    now: DateTime<Utc>,
) -> Result<BatchReport, GameError> {
    let docs = store.query(&Query::new(PlayerRecord::COLLECTION))?;
    let mut report = BatchReport {
        processed: docs.len(),
        ..BatchReport::default()
    };
    let mut staged = Vec::new();
    for doc in &docs {
        let player = match decode::<PlayerRecord>(doc) {
            Ok(player) => player,
            Err(e) => {
                report.errors.push(format!("{}: {}", doc.id, e));
                continue;
            }
        };
        let computed = level_from_exp(player.experience);
        if computed != player.level {
            let fields = json!({ "level": computed, "updated_at": now });
            if let serde_json::Value::Object(fields) = fields {
                staged.push((doc.id.clone(), StagedWrite::Update(fields)));
            }
        }
    }
    let needed = staged.len();
    commit_chunked(store, PlayerRecord::COLLECTION, staged, batch_size, &mut report);
    info!(
        "level recompute: {} processed, {}/{} corrected in {} batches, {} failed batches",
        report.processed, report.updated, needed, report.batches_committed, report.batches_failed
    );
    if !report.errors.is_empty() {
        warn!("level recompute errors: {}", summarize_errors(&report.errors, 5));
    }
    Ok(report)
}

/// Refill every limited catalog item of a shard to its maximum stock.
pub fn restock_items<S: DocumentStore>(
    store: &S,
    cache: &TimedCache,
    shard: &ShardId,
    batch_size: usize,
    now: DateTime<Utc>,
) -> BatchReport {
    let mut report = BatchReport::default();
    let mut staged = Vec::new();
    for item in shop::CATALOG {
        report.processed += 1;
        let StockPolicy::Limited(max_stock) = item.policy() else {
            continue;
        };
        let stock = ShopStock::new(item.id, shard.as_str(), max_stock, max_stock, now);
        match encode(&stock) {
            Ok(fields) => staged.push((shard.qualify(item.id), StagedWrite::Set(fields))),
            Err(e) => report.errors.push(format!("{}: {}", item.id, e)),
        }
    }
    commit_chunked(store, ShopStock::COLLECTION, staged, batch_size, &mut report);
    let cleared = cache.clear_by_prefix(&format!("{SHOP_FAMILY}_"));
    info!(
        "restock on {}: {} items restocked, {} cached shop views dropped",
        shard, report.updated, cleared
    );
    report
}
