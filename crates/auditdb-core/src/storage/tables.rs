//! redb table layout.
//!
//! Identities are stored as strings. Edges are keyed `(lo, hi)` with
//! `lo <= hi`; `LINKS_REVERSE` holds the same pairs as `(hi, lo)` so both
//! ends can be found with a prefix scan. Plain stage rows use an empty
//! second component.

use crate::primitives::NEXT_ROWID_KEY;
use crate::types::{AuditError, DataKey, Identity, LogLevel};
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Audit header: `HEADER_KEY` -> postcard `AuditHeader`
pub(crate) const HEADER: TableDefinition<&str, &[u8]> = TableDefinition::new("golismero");

/// Counters: name -> value
pub(crate) const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Subtype names: subtype id -> name
pub(crate) const TYPES: TableDefinition<u32, &str> = TableDefinition::new("types");

/// Entities: identity -> postcard `EntityRow`
pub(crate) const DATA: TableDefinition<&str, &[u8]> = TableDefinition::new("data");

/// Type index: (family code, subtype id, identity) -> rowid
pub(crate) const DATA_INDEX: TableDefinition<(u8, u32, &str), u64> =
    TableDefinition::new("data_index");

/// Edges: (lo, hi) -> rowid
pub(crate) const LINKS: TableDefinition<(&str, &str), u64> = TableDefinition::new("links");

/// Edges seen from the other end: (hi, lo) -> rowid
pub(crate) const LINKS_REVERSE: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("links_reverse");

/// Plugins: name -> plugin id
pub(crate) const PLUGINS: TableDefinition<&str, u64> = TableDefinition::new("plugin");

/// Plugins: plugin id -> name
pub(crate) const PLUGIN_NAMES: TableDefinition<u64, &str> = TableDefinition::new("plugin_names");

/// Processing history: (identity, plugin id) -> rowid
pub(crate) const HISTORY: TableDefinition<(&str, u64), u64> = TableDefinition::new("history");

/// Plugin state variables: (plugin id, name) -> encoded value
pub(crate) const STATE: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("state");

/// Stage marks: (identity, "") or (lo, hi) -> stage
pub(crate) const STAGES: TableDefinition<(&str, &str), u32> = TableDefinition::new("stages");

/// Audit log: (timestamp micros, rowid) -> postcard `LogRow`
pub(crate) const LOG: TableDefinition<(i64, u64), &[u8]> = TableDefinition::new("log");

/// Shared maps: (shared id, key hash) -> postcard `MapRow`
pub(crate) const SHARED_MAP: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("shared_map");

/// Shared heaps: (shared id, value hash) -> encoded value
pub(crate) const SHARED_HEAP: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("shared_heap");

// =============================================================================
// ROW TYPES
// =============================================================================

/// Persisted audit header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AuditHeader {
    pub schema_version: u32,
    pub audit_name: String,
    pub start_time: Option<i64>,
    pub stop_time: Option<i64>,
    /// Encoded `StoreConfig`.
    pub audit_config: Vec<u8>,
    /// Encoded `AuditScope`.
    pub audit_scope: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntityRow {
    pub rowid: u64,
    pub family: u8,
    pub subtype: u32,
    /// Encoded payload.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LogRow {
    pub plugin: Option<u64>,
    pub identity: Option<String>,
    /// Encoded text.
    pub text: Vec<u8>,
    pub level: LogLevel,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MapRow {
    /// Encoded key, compared on lookup.
    pub key: Vec<u8>,
    /// Encoded value.
    pub value: Vec<u8>,
}

// =============================================================================
// HELPERS
// =============================================================================

pub(crate) fn storage(e: impl std::fmt::Display) -> AuditError {
    AuditError::Storage(e.to_string())
}

pub(crate) fn to_row<T: Serialize>(row: &T) -> Result<Vec<u8>, AuditError> {
    postcard::to_stdvec(row).map_err(|e| AuditError::Serialization(e.to_string()))
}

pub(crate) fn from_row<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AuditError> {
    postcard::from_bytes(bytes).map_err(|e| AuditError::Deserialization(e.to_string()))
}

/// Create every table that does not exist yet.
pub(crate) fn create_all(txn: &WriteTransaction) -> Result<(), AuditError> {
    txn.open_table(HEADER).map_err(storage)?;
    txn.open_table(METADATA).map_err(storage)?;
    txn.open_table(TYPES).map_err(storage)?;
    txn.open_table(DATA).map_err(storage)?;
    txn.open_table(DATA_INDEX).map_err(storage)?;
    txn.open_table(LINKS).map_err(storage)?;
    txn.open_table(LINKS_REVERSE).map_err(storage)?;
    txn.open_table(PLUGINS).map_err(storage)?;
    txn.open_table(PLUGIN_NAMES).map_err(storage)?;
    txn.open_table(HISTORY).map_err(storage)?;
    txn.open_table(STATE).map_err(storage)?;
    txn.open_table(STAGES).map_err(storage)?;
    txn.open_table(LOG).map_err(storage)?;
    txn.open_table(SHARED_MAP).map_err(storage)?;
    txn.open_table(SHARED_HEAP).map_err(storage)?;
    Ok(())
}

/// Allocate the next row id.
pub(crate) fn next_rowid(txn: &WriteTransaction) -> Result<u64, AuditError> {
    let mut table = txn.open_table(METADATA).map_err(storage)?;
    let next = table
        .get(NEXT_ROWID_KEY)
        .map_err(storage)?
        .map(|v| v.value())
        .unwrap_or(1);
    table.insert(NEXT_ROWID_KEY, next + 1).map_err(storage)?;
    Ok(next)
}

/// Stage table key of a canonical data key.
pub(crate) fn stage_key(key: &DataKey) -> (&str, &str) {
    match key {
        DataKey::Plain(id) => (id.as_str(), ""),
        DataKey::Edge(lo, hi) => (lo.as_str(), hi.as_str()),
    }
}

/// Data key of a stage table key.
pub(crate) fn key_of_stage(a: &str, b: &str) -> DataKey {
    if b.is_empty() {
        DataKey::Plain(Identity::from_stored(a))
    } else {
        DataKey::Edge(Identity::from_stored(a), Identity::from_stored(b))
    }
}

/// Both directions of an edge row.
pub(crate) fn edge_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stage_keys_roundtrip() {
        let plain = DataKey::Plain(Identity::new("abc").unwrap());
        let (a, b) = stage_key(&plain);
        assert_eq!(key_of_stage(a, b), plain);

        let edge = DataKey::edge(Identity::new("y").unwrap(), Identity::new("x").unwrap());
        let (a, b) = stage_key(&edge);
        assert_eq!((a, b), ("x", "y"));
        assert_eq!(key_of_stage(a, b), edge);
    }

    #[test]
    fn edge_pair_orders() {
        assert_eq!(edge_pair("b", "a"), ("a", "b"));
        assert_eq!(edge_pair("a", "b"), ("a", "b"));
    }
}
