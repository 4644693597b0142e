//! # Audit Dump
//!
//! A JSON snapshot of every table, for offline inspection and debugging.
//!
//! The snapshot is taken under the busy guard from a single read
//! transaction, so it is consistent. `dump` also writes the file before
//! releasing the guard. Encoded blobs (entity payloads, state
//! variables, shared map/heap values) are written as base64 because their
//! Rust type is not known here.

use crate::config::StoreConfig;
use crate::formats::codec;
use crate::storage::AuditStore;
use crate::storage::log::lines_in;
use crate::storage::store::{from_micros, header_in};
use crate::storage::tables::{
    DATA, EntityRow, HISTORY, LINKS, MapRow, PLUGIN_NAMES, SHARED_HEAP, SHARED_MAP, STAGES, STATE,
    from_row, key_of_stage, storage,
};
use crate::storage::TypeRegistry;
use crate::types::{AuditError, DataType, LogLine, LogQuery};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use redb::{ReadTransaction, ReadableTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Everything stored for one audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    pub schema_version: u32,
    pub audit_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub config: StoreConfig,
    pub types: BTreeMap<u32, String>,
    pub entities: Vec<EntitySnapshot>,
    pub links: Vec<(String, String)>,
    pub stages: BTreeMap<String, u32>,
    pub history: BTreeMap<String, Vec<String>>,
    pub state: Vec<StateSnapshot>,
    pub shared_map: Vec<SharedSnapshot>,
    pub shared_heap: Vec<SharedSnapshot>,
    pub log: Vec<LogLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub identity: String,
    pub data_type: DataType,
    pub subtype: String,
    /// Base64 of the encoded payload.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub plugin: String,
    pub name: String,
    /// Base64 of the encoded value.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedSnapshot {
    pub shared_id: String,
    pub hash: String,
    /// Base64 of the encoded key; absent for heap members.
    pub key: Option<String>,
    /// Base64 of the encoded value.
    pub value: String,
}

impl AuditStore {
    /// Read every table into a snapshot.
    pub fn snapshot(&self) -> Result<AuditSnapshot, AuditError> {
        self.read(snapshot_in)
    }

    /// Write a JSON snapshot to `path`.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<(), AuditError> {
        let path = path.as_ref();
        let entities = self.read(|txn, registry| {
            let snapshot = snapshot_in(txn, registry)?;
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;
            std::fs::write(path, json)
                .map_err(|e| AuditError::Storage(format!("{}: {}", path.display(), e)))?;
            Ok(snapshot.entities.len())
        })?;
        tracing::debug!(path = %path.display(), entities, "dumped audit");
        Ok(())
    }
}

fn snapshot_in(txn: &ReadTransaction, registry: &TypeRegistry) -> Result<AuditSnapshot, AuditError> {
    let header = header_in(txn)?;

    let plugins: BTreeMap<u64, String> = {
        let table = txn.open_table(PLUGIN_NAMES).map_err(storage)?;
        let mut plugins = BTreeMap::new();
        for entry in table.iter().map_err(storage)? {
            let (id, name) = entry.map_err(storage)?;
            plugins.insert(id.value(), name.value().to_string());
        }
        plugins
    };
    let plugin_name = |id: u64| {
        plugins
            .get(&id)
            .cloned()
            .ok_or_else(|| AuditError::Deserialization(format!("Unknown plugin id {}", id)))
    };

    let mut entities = Vec::new();
    for entry in txn.open_table(DATA).map_err(storage)?.iter().map_err(storage)? {
        let (id, bytes) = entry.map_err(storage)?;
        let row: EntityRow = from_row(bytes.value())?;
        let data_type = DataType::from_code(row.family).ok_or_else(|| {
            AuditError::Deserialization(format!("Unknown family code {}", row.family))
        })?;
        let subtype = registry.reverse(row.subtype).ok_or_else(|| {
            AuditError::Deserialization(format!("Unknown subtype id {}", row.subtype))
        })?;
        entities.push(EntitySnapshot {
            identity: id.value().to_string(),
            data_type,
            subtype: subtype.to_string(),
            data: STANDARD.encode(&row.data),
        });
    }

    let mut links = Vec::new();
    for entry in txn.open_table(LINKS).map_err(storage)?.iter().map_err(storage)? {
        let (k, _) = entry.map_err(storage)?;
        let (lo, hi) = k.value();
        links.push((lo.to_string(), hi.to_string()));
    }

    let mut stages = BTreeMap::new();
    for entry in txn.open_table(STAGES).map_err(storage)?.iter().map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let (a, b) = k.value();
        stages.insert(key_of_stage(a, b).to_string(), v.value());
    }

    let mut history: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in txn.open_table(HISTORY).map_err(storage)?.iter().map_err(storage)? {
        let (k, _) = entry.map_err(storage)?;
        let (identity, plugin) = k.value();
        history
            .entry(identity.to_string())
            .or_default()
            .push(plugin_name(plugin)?);
    }

    let mut state = Vec::new();
    for entry in txn.open_table(STATE).map_err(storage)?.iter().map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let (plugin, name) = k.value();
        state.push(StateSnapshot {
            plugin: plugin_name(plugin)?,
            name: name.to_string(),
            value: STANDARD.encode(v.value()),
        });
    }

    let mut shared_map = Vec::new();
    for entry in txn.open_table(SHARED_MAP).map_err(storage)?.iter().map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let (shared_id, hash) = k.value();
        let row: MapRow = from_row(v.value())?;
        shared_map.push(SharedSnapshot {
            shared_id: shared_id.to_string(),
            hash: hash.to_string(),
            key: Some(STANDARD.encode(&row.key)),
            value: STANDARD.encode(&row.value),
        });
    }

    let mut shared_heap = Vec::new();
    for entry in txn.open_table(SHARED_HEAP).map_err(storage)?.iter().map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let (shared_id, hash) = k.value();
        shared_heap.push(SharedSnapshot {
            shared_id: shared_id.to_string(),
            hash: hash.to_string(),
            key: None,
            value: STANDARD.encode(v.value()),
        });
    }

    Ok(AuditSnapshot {
        schema_version: header.schema_version,
        audit_name: header.audit_name,
        start_time: from_micros(header.start_time)?,
        stop_time: from_micros(header.stop_time)?,
        config: codec::decode(&header.audit_config)?,
        types: registry
            .iter()
            .map(|(id, name)| (id, name.to_string()))
            .collect(),
        entities,
        links,
        stages,
        history,
        state,
        shared_map,
        shared_heap,
        log: lines_in(txn, &LogQuery::new(), 0, None)?,
    })
}
