//! Test utilities & fixtures.
//! Temp sled stores, player fixtures and a fault-injecting store wrapper.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use politsei::config::Config;
use politsei::game::shard::ShardId;
use politsei::game::types::{PlayerRecord, Position, GRADUATION_COURSE};
use politsei::store::{
    encode, Document, DocumentStore, Fields, Query, Record, SledStore, SledStoreBuilder, StoreError,
    Subscription, TransactionOps, WriteBatch,
};

pub fn main_shard() -> ShardId {
    ShardId::new("main", "main")
}

/// Sled store in a temp dir with the default composite indexes declared.
pub fn indexed_store() -> (TempDir, SledStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = SledStoreBuilder::new(dir.path())
        .with_indexes(Config::default().storage.index_specs().expect("default indexes"))
        .open()
        .expect("open store");
    (dir, store)
}

/// Sled store without any composite index.
pub fn bare_store() -> (TempDir, SledStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = SledStoreBuilder::new(dir.path()).open().expect("open store");
    (dir, store)
}

/// Graduated officer in a field department.
pub fn officer(user_id: &str, department: &str, level: u32, reputation: i64, now: DateTime<Utc>) -> PlayerRecord {
    let mut player = PlayerRecord::new(user_id, user_id, "main", now);
    player.completed_courses.push(GRADUATION_COURSE.to_string());
    player.department = Some(department.to_string());
    player.prefecture = politsei::game::organization::prefecture_of(department).map(str::to_string);
    player.unit = Some("Patrullteenistus".to_string());
    player.position = Some(Position::Patrullpolitseinik);
    player.level = level;
    player.experience = politsei::game::exp_for_level(level);
    player.reputation = reputation;
    player
}

pub fn seed_player<S: DocumentStore>(store: &S, player: &PlayerRecord) {
    let shard = ShardId::new(&player.shard, "main");
    store
        .set(
            PlayerRecord::COLLECTION,
            &shard.qualify(&player.user_id),
            encode(player).expect("encode player"),
            false,
        )
        .expect("seed player");
}

pub fn raw_fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().expect("object")
}

/// Store wrapper that fails on demand.
pub struct FlakyStore {
    inner: SledStore,
    fail_reads: AtomicBool,
    fail_queries: AtomicBool,
    fail_transactions: AtomicBool,
    fail_batches: Mutex<HashSet<usize>>,
    batches_seen: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SledStore) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            fail_transactions: AtomicBool::new(false),
            fail_batches: Mutex::new(HashSet::new()),
            batches_seen: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &SledStore {
        &self.inner
    }

    /// Make every get and query fail with `Unavailable`.
    pub fn set_reads_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    /// Make only queries fail; point reads and transactions still work.
    pub fn set_queries_failing(&self, failing: bool) {
        self.fail_queries.store(failing, Ordering::SeqCst);
    }

    /// Make only transactions fail.
    pub fn set_transactions_failing(&self, failing: bool) {
        self.fail_transactions.store(failing, Ordering::SeqCst);
    }

    /// Make the n-th (1-based) batch commit fail.
    pub fn fail_batch(&self, number: usize) {
        self.fail_batches.lock().expect("lock").insert(number);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for FlakyStore {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_reads()?;
        self.inner.get(collection, id)
    }

    fn set(&self, collection: &str, id: &str, fields: Fields, merge: bool) -> Result<(), StoreError> {
        self.inner.set(collection, id, fields, merge)
    }

    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.inner.update(collection, id, fields)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.inner.delete(collection, id)
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.check_reads()?;
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected query failure".to_string()));
        }
        self.inner.query(query)
    }

    fn commit_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let number = self.batches_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_batches.lock().expect("lock").contains(&number) {
            return Err(StoreError::Unavailable(format!("injected failure of batch {number}")));
        }
        self.inner.commit_batch(batch)
    }

    fn run_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: Fn(&mut dyn TransactionOps) -> Result<T, E>,
        E: From<StoreError>,
    {
        if self.fail_reads.load(Ordering::SeqCst) || self.fail_transactions.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected transaction failure".to_string()).into());
        }
        self.inner.run_transaction(f)
    }

    fn subscribe(&self, collection: &str, id: &str) -> Result<Subscription, StoreError> {
        self.inner.subscribe(collection, id)
    }
}

pub fn shared<S>(store: S) -> Arc<S> {
    Arc::new(store)
}
