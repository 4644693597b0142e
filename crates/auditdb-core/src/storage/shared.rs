//! # Shared Map and Shared Heap
//!
//! Namespaced coordination primitives for plugins running in other
//! processes. Keys (map) and members (heap) are addressed by content hash.
//!
//! Each row keeps the encoded original next to its hash. Lookups compare
//! it against the encoding of the requested key, so two distinct values
//! that share a hash are never confused on read. Writes still replace
//! (map) or deduplicate (heap) per `(shared_id, hash)`.

use super::store::AuditStore;
use super::tables::{MapRow, SHARED_HEAP, SHARED_MAP, from_row, storage, to_row};
use crate::formats::{Fingerprint, codec};
use crate::types::AuditError;
use redb::{ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;

impl AuditStore {
    // =========================================================================
    // SHARED MAP
    // =========================================================================

    /// Values of `keys`, in order. Fails with `NotFound` if any key is missing.
    pub fn map_get<K, V>(&self, shared_id: &str, keys: &[K]) -> Result<Vec<V>, AuditError>
    where
        K: Serialize,
        V: DeserializeOwned,
    {
        let prints = fingerprints(shared_id, keys)?;
        self.read(|txn, _| {
            let map = txn.open_table(SHARED_MAP).map_err(storage)?;
            prints
                .iter()
                .map(|fp| {
                    let row = map_row(&map, shared_id, fp)?.ok_or_else(|| missing_key(shared_id, fp))?;
                    codec::decode(&row.value)
                })
                .collect()
        })
    }

    pub fn map_has_all<K: Serialize>(&self, shared_id: &str, keys: &[K]) -> Result<bool, AuditError> {
        Ok(self.map_has_each(shared_id, keys)?.into_iter().all(|found| found))
    }

    pub fn map_has_any<K: Serialize>(&self, shared_id: &str, keys: &[K]) -> Result<bool, AuditError> {
        Ok(self.map_has_each(shared_id, keys)?.into_iter().any(|found| found))
    }

    /// Whether each key is present, in order.
    pub fn map_has_each<K: Serialize>(&self, shared_id: &str, keys: &[K]) -> Result<Vec<bool>, AuditError> {
        let prints = fingerprints(shared_id, keys)?;
        self.read(|txn, _| {
            let map = txn.open_table(SHARED_MAP).map_err(storage)?;
            prints
                .iter()
                .map(|fp| Ok(map_row(&map, shared_id, fp)?.is_some()))
                .collect()
        })
    }

    /// Remove `keys` and return their values. Nothing is removed if any key
    /// is missing.
    pub fn map_pop<K, V>(&self, shared_id: &str, keys: &[K]) -> Result<Vec<V>, AuditError>
    where
        K: Serialize,
        V: DeserializeOwned,
    {
        let prints = fingerprints(shared_id, keys)?;
        self.write(|txn| {
            let mut map = txn.open_table(SHARED_MAP).map_err(storage)?;
            let mut values = Vec::with_capacity(prints.len());
            for fp in &prints {
                let row = map_row(&map, shared_id, fp)?.ok_or_else(|| missing_key(shared_id, fp))?;
                values.push(codec::decode(&row.value)?);
            }
            for fp in &prints {
                map.remove((shared_id, fp.hash.as_str())).map_err(storage)?;
            }
            Ok(values)
        })
    }

    /// Insert or replace entries.
    pub fn map_put<K, V>(&self, shared_id: &str, items: &[(K, V)]) -> Result<(), AuditError>
    where
        K: Serialize,
        V: Serialize,
    {
        let rows = encode_items(shared_id, items)?;
        self.write(|txn| {
            for (fp, value) in &rows {
                put_row(txn, shared_id, fp, value)?;
            }
            Ok(())
        })
    }

    /// Insert or replace entries, returning each key's previous value.
    pub fn map_swap<K, V>(&self, shared_id: &str, items: &[(K, V)]) -> Result<Vec<Option<V>>, AuditError>
    where
        K: Serialize,
        V: Serialize + DeserializeOwned,
    {
        let rows = encode_items(shared_id, items)?;
        self.write(|txn| {
            let mut previous = Vec::with_capacity(rows.len());
            for (fp, value) in &rows {
                let old = {
                    let map = txn.open_table(SHARED_MAP).map_err(storage)?;
                    map_row(&map, shared_id, fp)?
                };
                if old.as_ref().is_none_or(|row| row.value != *value) {
                    put_row(txn, shared_id, fp, value)?;
                }
                previous.push(old.map(|row| codec::decode(&row.value)).transpose()?);
            }
            Ok(previous)
        })
    }

    /// Remove the keys that exist; missing keys are ignored.
    pub fn map_delete<K: Serialize>(&self, shared_id: &str, keys: &[K]) -> Result<(), AuditError> {
        let prints = fingerprints(shared_id, keys)?;
        self.write(|txn| {
            let mut map = txn.open_table(SHARED_MAP).map_err(storage)?;
            for fp in &prints {
                if map_row(&map, shared_id, fp)?.is_some() {
                    map.remove((shared_id, fp.hash.as_str())).map_err(storage)?;
                }
            }
            Ok(())
        })
    }

    /// Every key currently in the namespace.
    pub fn map_keys<K>(&self, shared_id: &str) -> Result<BTreeSet<K>, AuditError>
    where
        K: DeserializeOwned + Ord,
    {
        check_namespace(shared_id)?;
        self.read(|txn, _| {
            let map = txn.open_table(SHARED_MAP).map_err(storage)?;
            let mut keys = BTreeSet::new();
            for entry in map.range((shared_id, "")..).map_err(storage)? {
                let (k, v) = entry.map_err(storage)?;
                if k.value().0 != shared_id {
                    break;
                }
                let row: MapRow = from_row(v.value())?;
                keys.insert(codec::decode(&row.key)?);
            }
            Ok(keys)
        })
    }

    // =========================================================================
    // SHARED HEAP
    // =========================================================================

    pub fn heap_has_all<V: Serialize>(&self, shared_id: &str, values: &[V]) -> Result<bool, AuditError> {
        Ok(self.heap_has_each(shared_id, values)?.into_iter().all(|found| found))
    }

    pub fn heap_has_any<V: Serialize>(&self, shared_id: &str, values: &[V]) -> Result<bool, AuditError> {
        Ok(self.heap_has_each(shared_id, values)?.into_iter().any(|found| found))
    }

    /// Whether each value is a member, in order.
    pub fn heap_has_each<V: Serialize>(&self, shared_id: &str, values: &[V]) -> Result<Vec<bool>, AuditError> {
        let prints = fingerprints(shared_id, values)?;
        self.read(|txn, _| {
            let heap = txn.open_table(SHARED_HEAP).map_err(storage)?;
            prints
                .iter()
                .map(|fp| heap_contains(&heap, shared_id, fp))
                .collect()
        })
    }

    /// Remove and return up to `maximum` members, all of them for `None`.
    ///
    /// Which members are returned is unspecified.
    pub fn heap_pop<V: DeserializeOwned>(
        &self,
        shared_id: &str,
        maximum: Option<usize>,
    ) -> Result<Vec<V>, AuditError> {
        check_namespace(shared_id)?;
        self.write(|txn| {
            let mut heap = txn.open_table(SHARED_HEAP).map_err(storage)?;
            let limit = maximum.unwrap_or(usize::MAX);
            let taken: Vec<(String, Vec<u8>)> = {
                let mut taken = Vec::new();
                if limit > 0 {
                    for entry in heap.range((shared_id, "")..).map_err(storage)? {
                        let (k, v) = entry.map_err(storage)?;
                        let (namespace, hash) = k.value();
                        if namespace != shared_id {
                            break;
                        }
                        taken.push((hash.to_string(), v.value().to_vec()));
                        if taken.len() >= limit {
                            break;
                        }
                    }
                }
                taken
            };
            let mut values = Vec::with_capacity(taken.len());
            for (hash, blob) in &taken {
                heap.remove((shared_id, hash.as_str())).map_err(storage)?;
                values.push(codec::decode(blob)?);
            }
            Ok(values)
        })
    }

    /// Add members; values already present are ignored.
    pub fn heap_add<V: Serialize>(&self, shared_id: &str, values: &[V]) -> Result<(), AuditError> {
        let prints = fingerprints(shared_id, values)?;
        self.write(|txn| {
            let mut heap = txn.open_table(SHARED_HEAP).map_err(storage)?;
            for fp in &prints {
                let key = (shared_id, fp.hash.as_str());
                if heap.get(key).map_err(storage)?.is_none() {
                    heap.insert(key, fp.blob.as_slice()).map_err(storage)?;
                }
            }
            Ok(())
        })
    }

    /// Remove the members that exist; missing values are ignored.
    pub fn heap_remove<V: Serialize>(&self, shared_id: &str, values: &[V]) -> Result<(), AuditError> {
        let prints = fingerprints(shared_id, values)?;
        self.write(|txn| {
            let mut heap = txn.open_table(SHARED_HEAP).map_err(storage)?;
            for fp in &prints {
                if heap_contains(&heap, shared_id, fp)? {
                    heap.remove((shared_id, fp.hash.as_str())).map_err(storage)?;
                }
            }
            Ok(())
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn check_namespace(shared_id: &str) -> Result<(), AuditError> {
    if shared_id.is_empty() {
        return Err(AuditError::Validation("Shared id is empty".to_string()));
    }
    Ok(())
}

fn fingerprints<T: Serialize>(shared_id: &str, values: &[T]) -> Result<Vec<Fingerprint>, AuditError> {
    check_namespace(shared_id)?;
    values.iter().map(codec::fingerprint).collect()
}

fn encode_items<K, V>(shared_id: &str, items: &[(K, V)]) -> Result<Vec<(Fingerprint, Vec<u8>)>, AuditError>
where
    K: Serialize,
    V: Serialize,
{
    check_namespace(shared_id)?;
    items
        .iter()
        .map(|(k, v)| Ok((codec::fingerprint(k)?, codec::encode(v)?)))
        .collect()
}

fn missing_key(shared_id: &str, fp: &Fingerprint) -> AuditError {
    AuditError::NotFound(format!("Missing key {} in shared map '{}'", fp.hash, shared_id))
}

/// The row stored for `fp`, if its original key matches.
fn map_row<T>(map: &T, shared_id: &str, fp: &Fingerprint) -> Result<Option<MapRow>, AuditError>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    let Some(bytes) = map.get((shared_id, fp.hash.as_str())).map_err(storage)? else {
        return Ok(None);
    };
    let row: MapRow = from_row(bytes.value())?;
    Ok((row.key == fp.blob).then_some(row))
}

fn heap_contains<T>(heap: &T, shared_id: &str, fp: &Fingerprint) -> Result<bool, AuditError>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    Ok(heap
        .get((shared_id, fp.hash.as_str()))
        .map_err(storage)?
        .is_some_and(|blob| blob.value() == fp.blob.as_slice()))
}

fn put_row(txn: &WriteTransaction, shared_id: &str, fp: &Fingerprint, value: &[u8]) -> Result<(), AuditError> {
    let row = MapRow {
        key: fp.blob.clone(),
        value: value.to_vec(),
    };
    txn.open_table(SHARED_MAP)
        .map_err(storage)?
        .insert((shared_id, fp.hash.as_str()), to_row(&row)?.as_slice())
        .map_err(storage)?;
    Ok(())
}
