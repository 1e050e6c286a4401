//! # Document Store
//!
//! Generic document database contract consumed by the game services, plus the
//! sled-backed implementation used in production and tests.
//!
//! Documents are JSON objects addressed by `(collection, id)`. The contract
//! mirrors what the game needs from a hosted document database:
//!
//! - point reads and writes (`get`, `set` with optional deep merge, `update`, `delete`)
//! - atomic multi-document transactions with retry on conflict
//! - filtered / ordered / limited queries, some of which need a declared
//!   composite index and fail with [`StoreError::MissingIndex`] otherwise
//! - write batches of at most [`MAX_BATCH_OPERATIONS`] operations
//! - per-document change subscriptions delivered over a channel
//!
//! ```rust,no_run
//! use politsei::store::{DocumentStore, Query, Filter, SledStoreBuilder};
//!
//! let store = SledStoreBuilder::new("./data/store").open().unwrap();
//! let page = store
//!     .query(&Query::new("players").filter(Filter::eq("shard", "main")).limit(10))
//!     .unwrap();
//! println!("{} players", page.len());
//! ```

pub mod errors;
pub mod record;
pub mod sled_store;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use errors::StoreError;
pub use record::{decode, encode, Record};
pub use sled_store::{SledStore, SledStoreBuilder};

/// Field map of a single document.
pub type Fields = serde_json::Map<String, Value>;

/// Maximum number of queued operations a single [`WriteBatch`] may carry.
pub const MAX_BATCH_OPERATIONS: usize = 500;

/// A stored document with its store-managed metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub fields: Fields,
    /// Incremented on every write.
    pub revision: u64,
    pub update_time: DateTime<Utc>,
}

impl Document {
    pub fn field(&self, path: &str) -> Option<&Value> {
        field(&self.fields, path)
    }
}

/// Resolve a dotted field path (`casino.plays_used`) inside a field map.
pub fn field<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Write `value` at a dotted field path, creating intermediate maps.
pub fn set_field(fields: &mut Fields, path: &str, value: Value) {
    let mut parents: Vec<&str> = path.split('.').collect();
    let last = parents.pop().unwrap_or(path);
    let mut current = fields;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Fields::new()));
        if !entry.is_object() {
            *entry = Value::Object(Fields::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => unreachable!("entry was just replaced with an object"),
        };
    }
    current.insert(last.to_string(), value);
}

/// Recursively merge `patch` into `target`; nested maps merge, everything else overwrites.
pub fn deep_merge(target: &mut Fields, patch: Fields) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Apply an `update` payload: every key is treated as a dotted field path.
pub fn apply_update(target: &mut Fields, patch: Fields) {
    for (path, value) in patch {
        set_field(target, &path, value);
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: first by type, then by value within the type.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    ArrayContains,
    In,
}

/// A single `field <op> value` predicate. Documents lacking the field never match.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::ArrayContains, value)
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        let Some(actual) = field(fields, &self.field) else {
            return false;
        };
        let same_type = type_rank(actual) == type_rank(&self.value);
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::NotEq => !values_equal(actual, &self.value),
            FilterOp::Lt => same_type && compare_values(actual, &self.value) == Ordering::Less,
            FilterOp::Lte => same_type && compare_values(actual, &self.value) != Ordering::Greater,
            FilterOp::Gt => same_type && compare_values(actual, &self.value) == Ordering::Greater,
            FilterOp::Gte => same_type && compare_values(actual, &self.value) != Ordering::Less,
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(item, &self.value))),
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|options| options.iter().any(|option| values_equal(actual, option))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Composite index declaration: a collection plus the ordered field list a query touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    pub collection: String,
    pub fields: Vec<String>,
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.fields.join(","))
    }
}

impl FromStr for IndexSpec {
    type Err = StoreError;

    /// Parses `collection:field_a,field_b`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (collection, fields) = s
            .split_once(':')
            .ok_or_else(|| StoreError::InvalidPath(format!("index spec without ':' ({s})")))?;
        let fields: Vec<String> = fields
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if collection.trim().is_empty() || fields.is_empty() {
            return Err(StoreError::InvalidPath(format!("incomplete index spec ({s})")));
        }
        Ok(Self {
            collection: collection.trim().to_string(),
            fields,
        })
    }
}

/// Query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same filters and limit, no ordering. Used for the missing-index fallback.
    pub fn unordered(&self) -> Self {
        Self {
            order_by: Vec::new(),
            ..self.clone()
        }
    }

    /// Composite index this query needs, if any: more than one ordering, or a
    /// single ordering combined with a filter on some other field.
    pub fn required_index(&self) -> Option<IndexSpec> {
        let needs_index = match self.order_by.as_slice() {
            [] => false,
            [single] => self.filters.iter().any(|f| f.field != single.field),
            _ => true,
        };
        if !needs_index {
            return None;
        }
        let mut fields: Vec<String> = Vec::new();
        let touched = self
            .filters
            .iter()
            .map(|f| &f.field)
            .chain(self.order_by.iter().map(|o| &o.field));
        for name in touched {
            if !fields.contains(name) {
                fields.push(name.clone());
            }
        }
        Some(IndexSpec {
            collection: self.collection.clone(),
            fields,
        })
    }

    /// Filter, order and limit an in-memory candidate set. Documents missing an
    /// ordering field are dropped, as an index over that field would not contain them.
    pub fn evaluate(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.filters.iter().all(|f| f.matches(&doc.fields)))
            .filter(|doc| self.order_by.iter().all(|o| doc.field(&o.field).is_some()))
            .collect();
        if !self.order_by.is_empty() {
            matched.sort_by(|a, b| {
                for order in &self.order_by {
                    let (Some(left), Some(right)) = (a.field(&order.field), b.field(&order.field))
                    else {
                        continue;
                    };
                    let ord = match order.direction {
                        Direction::Ascending => compare_values(left, right),
                        Direction::Descending => compare_values(right, left),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.id.cmp(&b.id)
            });
        }
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        fields: Fields,
        merge: bool,
    },
    Update {
        collection: String,
        id: String,
        fields: Fields,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Up to [`MAX_BATCH_OPERATIONS`] writes committed atomically as one unit.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, op: WriteOp) -> Result<(), StoreError> {
        if self.is_full() {
            return Err(StoreError::BatchFull {
                limit: MAX_BATCH_OPERATIONS,
            });
        }
        self.ops.push(op);
        Ok(())
    }

    pub fn set(
        &mut self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError> {
        self.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            merge,
        })
    }

    pub fn update(&mut self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.push(WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        })
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ops.len() >= MAX_BATCH_OPERATIONS
    }

    pub fn operations(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_operations(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Change pushed to a [`Subscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    Upserted(Document),
    Removed { collection: String, id: String },
}

/// Receiving end of a document subscription. Dropping it cancels the feed.
pub struct Subscription {
    receiver: mpsc::Receiver<DocumentChange>,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<DocumentChange>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            receiver,
            cancelled,
        }
    }

    /// Wait up to `timeout` for the next change.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DocumentChange> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<DocumentChange> {
        self.receiver.try_recv().ok()
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(AtomicOrdering::SeqCst)
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }
}

/// Operations available inside [`DocumentStore::run_transaction`].
/// Reads observe one consistent snapshot; writes become visible on commit.
pub trait TransactionOps {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;
    fn set(
        &mut self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError>;
    /// Fails with [`StoreError::NotFound`] when the document is absent.
    fn update(&mut self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;
    fn delete(&mut self, collection: &str, id: &str) -> Result<(), StoreError>;
}

/// Contract every backing document database provides to the game services.
pub trait DocumentStore: Send + Sync {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    fn set(&self, collection: &str, id: &str, fields: Fields, merge: bool)
        -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] when the document is absent.
    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    fn commit_batch(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Run `f` atomically. `f` may be invoked several times when a concurrent
    /// writer conflicts, so it must not have side effects outside `tx`.
    fn run_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: Fn(&mut dyn TransactionOps) -> Result<T, E>,
        E: From<StoreError>;

    fn subscribe(&self, collection: &str, id: &str) -> Result<Subscription, StoreError>;
}

/// Run blocking store work off the async executor, bounded by `deadline`.
pub async fn run_blocking<T, E, F>(deadline: Duration, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(StoreError::Internal(format!("blocking task failed: {join}")).into()),
        Err(_) => Err(StoreError::Timeout(deadline).into()),
    }
}
