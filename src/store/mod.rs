//! Durable storage layer.
//!
//! A single redb database backs both the pattern tables and the graph
//! tables. [`DurableStore`] owns the database handle; the pattern and graph
//! stores open their own tables inside per-operation transactions, so every
//! write is atomic per record and rolls back if dropped early.

pub mod durable;

pub use durable::DurableStore;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Wrap a redb failure with the operation that triggered it.
pub(crate) fn redb_error(op: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Redb {
        message: format!("{op}: {err}"),
    }
}

/// Encode a record for storage.
pub(crate) fn encode<T: Serialize>(what: &str, value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: format!("failed to serialize {what}: {e}"),
    })
}

/// Decode a record from storage.
pub(crate) fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("failed to deserialize {what}: {e}"),
    })
}
