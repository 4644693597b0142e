//! # Plugin History and State
//!
//! Which plugins already processed each entity, plus a small durable
//! key/value scratch space per plugin. Plugin names are interned into the
//! `plugin` table on first use.

use super::store::AuditStore;
use super::tables::{HISTORY, PLUGIN_NAMES, PLUGINS, STATE, next_rowid, storage};
use crate::formats::codec;
use crate::types::{AuditError, Identity};
use redb::{ReadTransaction, ReadableTable, TableError, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;

impl AuditStore {
    // =========================================================================
    // HISTORY
    // =========================================================================

    /// Record that `plugin` processed `identity`.
    pub fn mark_plugin_finished(&self, identity: &Identity, plugin: &str) -> Result<(), AuditError> {
        self.write(|txn| {
            let plugin_id = intern_plugin(txn, plugin)?;
            let mut history = txn.open_table(HISTORY).map_err(storage)?;
            let key = (identity.as_str(), plugin_id);
            if history.get(key).map_err(storage)?.is_none() {
                let rowid = next_rowid(txn)?;
                history.insert(key, rowid).map_err(storage)?;
            }
            Ok(())
        })
    }

    /// Names of the plugins that processed `identity`.
    pub fn past_plugins(&self, identity: &Identity) -> Result<BTreeSet<String>, AuditError> {
        self.read(|txn, _| {
            let history = txn.open_table(HISTORY).map_err(storage)?;
            let names = txn.open_table(PLUGIN_NAMES).map_err(storage)?;
            let id = identity.as_str();
            let mut plugins = BTreeSet::new();
            for entry in history.range((id, 0u64)..).map_err(storage)? {
                let (k, _) = entry.map_err(storage)?;
                let (ident, plugin_id) = k.value();
                if ident != id {
                    break;
                }
                let name = names.get(plugin_id).map_err(storage)?.ok_or_else(|| {
                    AuditError::Deserialization(format!("Unknown plugin id {}", plugin_id))
                })?;
                plugins.insert(name.value().to_string());
            }
            Ok(plugins)
        })
    }

    /// Forget which plugins processed `identity`.
    pub fn clear_history(&self, identity: &Identity) -> Result<(), AuditError> {
        self.write(|txn| {
            let mut history = txn.open_table(HISTORY).map_err(storage)?;
            let id = identity.as_str();
            let plugins: Vec<u64> = {
                let mut plugins = Vec::new();
                for entry in history.range((id, 0u64)..).map_err(storage)? {
                    let (k, _) = entry.map_err(storage)?;
                    let (ident, plugin_id) = k.value();
                    if ident != id {
                        break;
                    }
                    plugins.push(plugin_id);
                }
                plugins
            };
            for plugin_id in plugins {
                history.remove((id, plugin_id)).map_err(storage)?;
            }
            Ok(())
        })
    }

    pub fn clear_all_history(&self) -> Result<(), AuditError> {
        self.write(|txn| {
            txn.delete_table(HISTORY).map_err(storage)?;
            txn.open_table(HISTORY).map_err(storage)?;
            Ok(())
        })
    }

    // =========================================================================
    // STATE VARIABLES
    // =========================================================================

    /// Set a state variable of `plugin`, replacing any previous value.
    pub fn add_state_variable<V: Serialize + ?Sized>(
        &self,
        plugin: &str,
        name: &str,
        value: &V,
    ) -> Result<(), AuditError> {
        let blob = codec::encode(value)?;
        self.write(|txn| {
            let plugin_id = intern_plugin(txn, plugin)?;
            txn.open_table(STATE)
                .map_err(storage)?
                .insert((plugin_id, name), blob.as_slice())
                .map_err(storage)?;
            Ok(())
        })
    }

    pub fn remove_state_variable(&self, plugin: &str, name: &str) -> Result<(), AuditError> {
        self.write(|txn| {
            let Some(plugin_id) = plugin_in(txn, plugin)? else {
                return Ok(());
            };
            txn.open_table(STATE)
                .map_err(storage)?
                .remove((plugin_id, name))
                .map_err(storage)?;
            Ok(())
        })
    }

    pub fn has_state_variable(&self, plugin: &str, name: &str) -> Result<bool, AuditError> {
        self.read(|txn, _| {
            let Some(plugin_id) = plugin_of(txn, plugin)? else {
                return Ok(false);
            };
            let state = txn.open_table(STATE).map_err(storage)?;
            Ok(state.get((plugin_id, name)).map_err(storage)?.is_some())
        })
    }

    /// Value of a state variable; `NotFound` when it was never set.
    pub fn get_state_variable<V: DeserializeOwned>(&self, plugin: &str, name: &str) -> Result<V, AuditError> {
        let not_found = || AuditError::NotFound(format!("State variable '{}' of plugin '{}'", name, plugin));
        self.read(|txn, _| {
            let plugin_id = plugin_of(txn, plugin)?.ok_or_else(not_found)?;
            let state = txn.open_table(STATE).map_err(storage)?;
            let blob = state
                .get((plugin_id, name))
                .map_err(storage)?
                .ok_or_else(not_found)?;
            codec::decode(blob.value())
        })
    }

    pub fn state_variable_names(&self, plugin: &str) -> Result<BTreeSet<String>, AuditError> {
        self.read(|txn, _| {
            let mut names = BTreeSet::new();
            let Some(plugin_id) = plugin_of(txn, plugin)? else {
                return Ok(names);
            };
            let state = txn.open_table(STATE).map_err(storage)?;
            for entry in state.range((plugin_id, "")..).map_err(storage)? {
                let (k, _) = entry.map_err(storage)?;
                let (owner, name) = k.value();
                if owner != plugin_id {
                    break;
                }
                names.insert(name.to_string());
            }
            Ok(names)
        })
    }
}

// =============================================================================
// PLUGIN NAMES
// =============================================================================

/// Id of `plugin`, registering it if new.
pub(crate) fn intern_plugin(txn: &WriteTransaction, plugin: &str) -> Result<u64, AuditError> {
    if plugin.is_empty() {
        return Err(AuditError::Validation("Plugin name is empty".to_string()));
    }
    if let Some(id) = plugin_in(txn, plugin)? {
        return Ok(id);
    }
    let id = next_rowid(txn)?;
    txn.open_table(PLUGINS)
        .map_err(storage)?
        .insert(plugin, id)
        .map_err(storage)?;
    txn.open_table(PLUGIN_NAMES)
        .map_err(storage)?
        .insert(id, plugin)
        .map_err(storage)?;
    Ok(id)
}

fn plugin_in(txn: &WriteTransaction, plugin: &str) -> Result<Option<u64>, AuditError> {
    let plugins = txn.open_table(PLUGINS).map_err(storage)?;
    Ok(plugins.get(plugin).map_err(storage)?.map(|v| v.value()))
}

/// Id of an already registered plugin.
pub(crate) fn plugin_of(txn: &ReadTransaction, plugin: &str) -> Result<Option<u64>, AuditError> {
    let plugins = match txn.open_table(PLUGINS) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(storage(e)),
    };
    Ok(plugins.get(plugin).map_err(storage)?.map(|v| v.value()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::SharedValue;

    fn id(s: &str) -> Identity {
        Identity::new(s).expect("valid identity")
    }

    fn store() -> AuditStore {
        AuditStore::in_memory("history-tests").expect("store")
    }

    #[test]
    fn history_is_idempotent() {
        let s = store();
        s.mark_plugin_finished(&id("a"), "spider").unwrap();
        s.mark_plugin_finished(&id("a"), "spider").unwrap();
        s.mark_plugin_finished(&id("a"), "nikto").unwrap();
        s.mark_plugin_finished(&id("b"), "spider").unwrap();
        assert_eq!(
            s.past_plugins(&id("a")).unwrap(),
            BTreeSet::from(["nikto".to_string(), "spider".to_string()])
        );
    }

    #[test]
    fn clear_history_is_per_identity() {
        let s = store();
        s.mark_plugin_finished(&id("a"), "spider").unwrap();
        s.mark_plugin_finished(&id("b"), "spider").unwrap();
        s.clear_history(&id("a")).unwrap();
        assert!(s.past_plugins(&id("a")).unwrap().is_empty());
        assert_eq!(s.past_plugins(&id("b")).unwrap().len(), 1);

        s.clear_all_history().unwrap();
        assert!(s.past_plugins(&id("b")).unwrap().is_empty());
    }

    #[test]
    fn empty_plugin_name_rejected() {
        let s = store();
        assert!(matches!(
            s.mark_plugin_finished(&id("a"), ""),
            Err(AuditError::Validation(_))
        ));
    }

    #[test]
    fn state_variables_roundtrip() {
        let s = store();
        s.add_state_variable("spider", "depth", &3u32).unwrap();
        s.add_state_variable("spider", "seen", &vec!["a", "b"]).unwrap();
        s.add_state_variable("nikto", "depth", &SharedValue::Int(9)).unwrap();

        assert!(s.has_state_variable("spider", "depth").unwrap());
        assert_eq!(s.get_state_variable::<u32>("spider", "depth").unwrap(), 3);
        assert_eq!(
            s.state_variable_names("spider").unwrap(),
            BTreeSet::from(["depth".to_string(), "seen".to_string()])
        );

        s.add_state_variable("spider", "depth", &4u32).unwrap();
        assert_eq!(s.get_state_variable::<u32>("spider", "depth").unwrap(), 4);

        s.remove_state_variable("spider", "depth").unwrap();
        assert!(!s.has_state_variable("spider", "depth").unwrap());
        assert!(matches!(
            s.get_state_variable::<u32>("spider", "depth"),
            Err(AuditError::NotFound(_))
        ));
        assert_eq!(
            s.get_state_variable::<SharedValue>("nikto", "depth").unwrap(),
            SharedValue::Int(9)
        );
    }

    #[test]
    fn unknown_plugin_has_no_state() {
        let s = store();
        assert!(!s.has_state_variable("ghost", "x").unwrap());
        assert!(s.state_variable_names("ghost").unwrap().is_empty());
        s.remove_state_variable("ghost", "x").unwrap();
    }
}
