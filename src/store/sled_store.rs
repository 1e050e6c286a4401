use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
    UnabortableTransactionError,
};
use sled::Event;

use super::{
    apply_update, deep_merge, Document, DocumentChange, DocumentStore, Fields, IndexSpec, Query,
    StoreError, Subscription, TransactionOps, WriteBatch, WriteOp,
};
use crate::metrics;

const TREE_DOCUMENTS: &str = "documents";
const WATCH_POLL: Duration = Duration::from_millis(250);

/// On-disk envelope around a document body.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    revision: u64,
    update_time: DateTime<Utc>,
    /// JSON object text; bincode cannot carry `serde_json::Value` directly.
    body: String,
}

fn doc_key(collection: &str, id: &str) -> Result<String, StoreError> {
    for (label, part) in [("collection", collection), ("id", id)] {
        if part.is_empty() || part.contains('/') {
            return Err(StoreError::InvalidPath(format!("{label} {part:?}")));
        }
    }
    Ok(format!("{collection}/{id}"))
}

fn decode_stored(collection: &str, id: &str, bytes: &[u8]) -> Result<Document, StoreError> {
    let stored: StoredDocument = bincode::deserialize(bytes)?;
    let fields: Fields = serde_json::from_str(&stored.body)?;
    Ok(Document {
        collection: collection.to_string(),
        id: id.to_string(),
        fields,
        revision: stored.revision,
        update_time: stored.update_time,
    })
}

fn encode_stored(fields: &Fields, revision: u64) -> Result<Vec<u8>, StoreError> {
    let stored = StoredDocument {
        revision,
        update_time: Utc::now(),
        body: serde_json::to_string(fields)?,
    };
    Ok(bincode::serialize(&stored)?)
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct SledStoreBuilder {
    path: PathBuf,
    indexes: Vec<IndexSpec>,
}

impl SledStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            indexes: Vec::new(),
        }
    }

    /// Declare a composite index so queries needing it are served.
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_indexes(mut self, indexes: impl IntoIterator<Item = IndexSpec>) -> Self {
        self.indexes.extend(indexes);
        self
    }

    pub fn open(self) -> Result<SledStore, StoreError> {
        SledStore::open_with_indexes(self.path, self.indexes)
    }
}

/// Sled-backed document store. All collections share one tree keyed
/// `collection/id`, which lets a single sled transaction span collections.
pub struct SledStore {
    _db: sled::Db,
    documents: sled::Tree,
    indexes: HashSet<IndexSpec>,
}

impl SledStore {
    /// Open (or create) a store rooted at `path` with no composite indexes declared.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_indexes(path, Vec::new())
    }

    fn open_with_indexes<P: AsRef<Path>>(
        path: P,
        indexes: Vec<IndexSpec>,
    ) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path_ref.display())))?;
        let db = sled::open(path_ref)?;
        let documents = db.open_tree(TREE_DOCUMENTS)?;
        debug!(
            "opened document store at {} ({} composite indexes)",
            path_ref.display(),
            indexes.len()
        );
        Ok(Self {
            _db: db,
            documents,
            indexes: indexes.into_iter().collect(),
        })
    }

    pub fn has_index(&self, index: &IndexSpec) -> bool {
        self.indexes.contains(index)
    }

    pub fn declared_indexes(&self) -> Vec<IndexSpec> {
        let mut all: Vec<IndexSpec> = self.indexes.iter().cloned().collect();
        all.sort_by_key(|spec| spec.to_string());
        all
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let prefix = format!("{collection}/");
        let mut total = 0usize;
        for entry in self.documents.scan_prefix(prefix.as_bytes()) {
            entry?;
            total += 1;
        }
        Ok(total)
    }
}

struct SledTransaction<'a> {
    tree: &'a TransactionalTree,
    conflicted: bool,
}

impl SledTransaction<'_> {
    fn note(&mut self, err: UnabortableTransactionError) -> StoreError {
        if matches!(err, UnabortableTransactionError::Conflict) {
            self.conflicted = true;
        }
        StoreError::from(err)
    }

    fn read(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let key = doc_key(collection, id)?;
        let tree = self.tree;
        let raw = tree.get(key.as_bytes()).map_err(|e| self.note(e))?;
        raw.map(|bytes| decode_stored(collection, id, &bytes))
            .transpose()
    }

    fn write(&mut self, collection: &str, id: &str, fields: &Fields, revision: u64) -> Result<(), StoreError> {
        let key = doc_key(collection, id)?;
        let bytes = encode_stored(fields, revision)?;
        let tree = self.tree;
        tree.insert(key.as_bytes(), bytes).map_err(|e| self.note(e))?;
        Ok(())
    }
}

impl TransactionOps for SledTransaction<'_> {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.read(collection, id)
    }

    fn set(
        &mut self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError> {
        let (next, revision) = match self.read(collection, id)? {
            Some(mut existing) if merge => {
                deep_merge(&mut existing.fields, fields);
                (existing.fields, existing.revision + 1)
            }
            Some(existing) => (fields, existing.revision + 1),
            None => (fields, 1),
        };
        self.write(collection, id, &next, revision)
    }

    fn update(&mut self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        let Some(mut existing) = self.read(collection, id)? else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        apply_update(&mut existing.fields, fields);
        self.write(collection, id, &existing.fields, existing.revision + 1)
    }

    fn delete(&mut self, collection: &str, id: &str) -> Result<(), StoreError> {
        let key = doc_key(collection, id)?;
        let tree = self.tree;
        tree.remove(key.as_bytes()).map_err(|e| self.note(e))?;
        Ok(())
    }
}

impl DocumentStore for SledStore {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let key = doc_key(collection, id)?;
        self.documents
            .get(key.as_bytes())?
            .map(|bytes| decode_stored(collection, id, &bytes))
            .transpose()
    }

    fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError> {
        self.run_transaction(|tx| tx.set(collection, id, fields.clone(), merge))
    }

    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.run_transaction(|tx| tx.update(collection, id, fields.clone()))
    }

    fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.run_transaction(|tx| tx.delete(collection, id))
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        if let Some(index) = query.required_index() {
            if !self.indexes.contains(&index) {
                return Err(StoreError::MissingIndex {
                    collection: index.collection,
                    fields: index.fields.join(","),
                });
            }
        }
        let prefix = format!("{}/", query.collection);
        let mut candidates = Vec::new();
        for entry in self.documents.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            let key = String::from_utf8_lossy(&key);
            let id = key.strip_prefix(prefix.as_str()).unwrap_or(key.as_ref());
            candidates.push(decode_stored(&query.collection, id, &value)?);
        }
        Ok(query.evaluate(candidates))
    }

    fn commit_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.into_operations();
        self.run_transaction(|tx| {
            for op in &ops {
                match op {
                    WriteOp::Set {
                        collection,
                        id,
                        fields,
                        merge,
                    } => tx.set(collection, id, fields.clone(), *merge)?,
                    WriteOp::Update {
                        collection,
                        id,
                        fields,
                    } => tx.update(collection, id, fields.clone())?,
                    WriteOp::Delete { collection, id } => tx.delete(collection, id)?,
                }
            }
            Ok(())
        })
    }

    fn run_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: Fn(&mut dyn TransactionOps) -> Result<T, E>,
        E: From<StoreError>,
    {
        let outcome = self.documents.transaction(|tree| {
            let mut tx = SledTransaction {
                tree,
                conflicted: false,
            };
            match f(&mut tx) {
                Ok(value) => Ok(value),
                Err(_) if tx.conflicted => Err(ConflictableTransactionError::Conflict),
                Err(err) => Err(ConflictableTransactionError::Abort(err)),
            }
        });
        match outcome {
            Ok(value) => {
                self.documents.flush().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(TransactionError::Abort(err)) => {
                metrics::inc_transactions_aborted();
                Err(err)
            }
            Err(TransactionError::Storage(err)) => Err(StoreError::from(err).into()),
        }
    }

    fn subscribe(&self, collection: &str, id: &str) -> Result<Subscription, StoreError> {
        let key = doc_key(collection, id)?;
        let mut subscriber = self.documents.watch_prefix(key.as_bytes());
        let (sender, receiver) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        std::thread::Builder::new()
            .name(format!("watch-{key}"))
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    let event = match subscriber.next_timeout(WATCH_POLL) {
                        Ok(event) => event,
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    };
                    let change = match event {
                        Event::Insert { key: changed, value } => {
                            if changed.as_ref() != key.as_bytes() {
                                continue;
                            }
                            match decode_stored(&collection, &id, &value) {
                                Ok(doc) => DocumentChange::Upserted(doc),
                                Err(e) => {
                                    warn!("dropping undecodable change for {}: {}", key, e);
                                    continue;
                                }
                            }
                        }
                        Event::Remove { key: changed } => {
                            if changed.as_ref() != key.as_bytes() {
                                continue;
                            }
                            DocumentChange::Removed {
                                collection: collection.clone(),
                                id: id.clone(),
                            }
                        }
                    };
                    if sender.send(change).is_err() {
                        break;
                    }
                }
                debug!("subscription to {} closed", key);
            })
            .map_err(|e| StoreError::Internal(format!("watch thread: {e}")))?;
        Ok(Subscription::new(receiver, cancelled))
    }
}
