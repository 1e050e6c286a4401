//! Typed boundary between raw documents and game records.
//!
//! Every collection has exactly one record type. Decoding validates the
//! schema version and the record's own invariants so malformed documents
//! are rejected at the store edge instead of being defaulted silently.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Document, Fields, StoreError, TransactionOps};

pub trait Record: Serialize + DeserializeOwned {
    /// Collection holding documents of this type.
    const COLLECTION: &'static str;
    /// Entity name used in schema mismatch errors.
    const ENTITY: &'static str;
    const SCHEMA_VERSION: u8;

    fn schema_version(&self) -> u8;

    /// Record-level invariants checked after decoding and before encoding.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Decode and validate a document as record type `R`.
pub fn decode<R: Record>(doc: &Document) -> Result<R, StoreError> {
    let malformed = |reason: String| StoreError::Malformed {
        collection: doc.collection.clone(),
        id: doc.id.clone(),
        reason,
    };
    let record: R =
        serde_json::from_value(Value::Object(doc.fields.clone())).map_err(|e| malformed(e.to_string()))?;
    if record.schema_version() != R::SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            entity: R::ENTITY,
            expected: R::SCHEMA_VERSION,
            found: record.schema_version(),
        });
    }
    record.validate().map_err(malformed)?;
    Ok(record)
}

/// Encode a record into a field map, refusing records that break their invariants.
pub fn encode<R: Record>(record: &R) -> Result<Fields, StoreError> {
    record.validate().map_err(|reason| StoreError::Malformed {
        collection: R::COLLECTION.to_string(),
        id: "<new>".to_string(),
        reason,
    })?;
    match serde_json::to_value(record)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Internal(format!(
            "{} encoded to non-object JSON ({other})",
            R::ENTITY
        ))),
    }
}

/// Read and decode a record inside a transaction.
pub fn tx_get<R: Record>(tx: &mut dyn TransactionOps, id: &str) -> Result<Option<R>, StoreError> {
    tx.get(R::COLLECTION, id)?
        .map(|doc| decode::<R>(&doc))
        .transpose()
}

/// Overwrite a record inside a transaction.
pub fn tx_put<R: Record>(tx: &mut dyn TransactionOps, id: &str, record: &R) -> Result<(), StoreError> {
    tx.set(R::COLLECTION, id, encode(record)?, false)
}
