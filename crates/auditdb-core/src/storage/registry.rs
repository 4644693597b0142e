//! Subtype name interning.
//!
//! Subtype names are stored once in the `types` table and referenced by
//! numeric id everywhere else. The registry caches the table in both
//! directions. Names interned by a transaction stay pending until that
//! transaction's outcome is known, so a rollback cannot leave the cache
//! pointing at ids that were never committed.

use super::tables::{TYPES, storage};
use crate::types::AuditError;
use redb::{ReadTransaction, ReadableTable, WriteTransaction};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_name: BTreeMap<String, u32>,
    by_id: BTreeMap<u32, String>,
    pending: Vec<(u32, String)>,
}

impl TypeRegistry {
    /// Load the committed table.
    pub(crate) fn load(txn: &ReadTransaction) -> Result<Self, AuditError> {
        let table = txn.open_table(TYPES).map_err(storage)?;
        let mut registry = Self::default();
        for entry in table.iter().map_err(storage)? {
            let (id, name) = entry.map_err(storage)?;
            registry.by_name.insert(name.value().to_string(), id.value());
            registry.by_id.insert(id.value(), name.value().to_string());
        }
        Ok(registry)
    }

    /// Id of `name`, registering it in `txn` if new.
    pub(crate) fn intern(&mut self, txn: &WriteTransaction, name: &str) -> Result<u32, AuditError> {
        if let Some(id) = self.id_of(name) {
            return Ok(id);
        }
        let id = self
            .by_id
            .keys()
            .chain(self.pending.iter().map(|(id, _)| id))
            .max()
            .map_or(1, |max| max + 1);
        let mut table = txn.open_table(TYPES).map_err(storage)?;
        table.insert(id, name).map_err(storage)?;
        self.pending.push((id, name.to_string()));
        tracing::debug!(subtype = name, id, "registered subtype");
        Ok(id)
    }

    /// Id of a known name, committed or pending.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied().or_else(|| {
            self.pending
                .iter()
                .find(|(_, n)| n == name)
                .map(|(id, _)| *id)
        })
    }

    /// Name of a subtype id.
    #[must_use]
    pub fn reverse(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str).or_else(|| {
            self.pending
                .iter()
                .find(|(i, _)| *i == id)
                .map(|(_, n)| n.as_str())
        })
    }

    /// Resolve pending names once their transaction has finished.
    pub(crate) fn settle(&mut self, committed: bool) {
        for (id, name) in self.pending.drain(..) {
            if committed {
                self.by_name.insert(name.clone(), id);
                self.by_id.insert(id, name);
            }
        }
    }

    /// Number of committed subtypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Committed subtypes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.by_id.iter().map(|(id, name)| (*id, name.as_str()))
    }
}
