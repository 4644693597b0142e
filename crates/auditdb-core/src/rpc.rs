//! # Remote-Call Surface
//!
//! Workers in other processes reach an audit store only through named
//! calls. This module defines those calls as data and a `Dispatcher` that
//! executes them against the live stores.
//!
//! ```text
//! worker --Request{audit_name, call}--> transport --> Dispatcher::handle
//!                                                         |
//!                      Result<Reply, RpcFailure> <--------+
//! ```
//!
//! The transport is not part of this crate; `handle_bytes` is the postcard
//! boundary it plugs into. Failures are returned verbatim as an
//! `ErrorKind` plus message. Nothing is retried here.

use crate::storage::AuditStore;
use crate::types::{
    AddOutcome, AuditError, DataKey, DataType, Entity, ErrorKind, Identity, LogLine, LogQuery,
    Record, SharedValue,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A call addressed to one audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub audit_name: String,
    pub call: Call,
}

impl Request {
    pub fn new(audit_name: impl Into<String>, call: Call) -> Self {
        Self {
            audit_name: audit_name.into(),
            call,
        }
    }
}

/// One variant per public store operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Call {
    // Audit header
    AuditTimes,
    SetAuditStartTime(Option<DateTime<Utc>>),
    SetAuditStopTime(Option<DateTime<Utc>>),

    // Graph store
    DataAdd(Entity),
    DataAddMany(Vec<Entity>),
    DataRemove(DataKey),
    DataRemoveMany(Vec<DataKey>),
    DataCheck(DataKey),
    DataGet(DataKey),
    DataGetMany(Vec<DataKey>),
    DataKeys {
        data_type: Option<DataType>,
        subtype: Option<String>,
    },
    DataCount {
        data_type: Option<DataType>,
        subtype: Option<String>,
    },
    DataTypes(Vec<Identity>),

    // Stage tracker
    StageMark {
        keys: Vec<DataKey>,
        stage: u32,
    },
    StageGet(DataKey),
    StageClear(DataKey),
    StageClearAll,
    StagePending(u32),

    // Plugin history
    PluginMark {
        identity: Identity,
        plugin: String,
    },
    PluginHistory(Identity),
    PluginClear(Identity),
    PluginClearAll,

    // Plugin state
    StateAdd {
        plugin: String,
        name: String,
        value: SharedValue,
    },
    StateRemove {
        plugin: String,
        name: String,
    },
    StateCheck {
        plugin: String,
        name: String,
    },
    StateGet {
        plugin: String,
        name: String,
    },
    StateNames(String),

    // Shared map
    MapGet {
        shared_id: String,
        keys: Vec<SharedValue>,
    },
    MapCheckAll {
        shared_id: String,
        keys: Vec<SharedValue>,
    },
    MapCheckAny {
        shared_id: String,
        keys: Vec<SharedValue>,
    },
    MapCheckEach {
        shared_id: String,
        keys: Vec<SharedValue>,
    },
    MapPop {
        shared_id: String,
        keys: Vec<SharedValue>,
    },
    MapPut {
        shared_id: String,
        items: Vec<(SharedValue, SharedValue)>,
    },
    MapSwap {
        shared_id: String,
        items: Vec<(SharedValue, SharedValue)>,
    },
    MapDelete {
        shared_id: String,
        keys: Vec<SharedValue>,
    },
    MapKeys(String),

    // Shared heap
    HeapCheckAll {
        shared_id: String,
        values: Vec<SharedValue>,
    },
    HeapCheckAny {
        shared_id: String,
        values: Vec<SharedValue>,
    },
    HeapCheckEach {
        shared_id: String,
        values: Vec<SharedValue>,
    },
    HeapPop {
        shared_id: String,
        maximum: Option<u64>,
    },
    HeapAdd {
        shared_id: String,
        values: Vec<SharedValue>,
    },
    HeapRemove {
        shared_id: String,
        values: Vec<SharedValue>,
    },

    // Log
    LogAppend(LogLine),
    LogQuery(LogQuery),
}

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Done,
    Flag(bool),
    Flags(Vec<bool>),
    Count(u64),
    Stage(u32),
    Added(AddOutcome),
    AddedMany(Vec<AddOutcome>),
    Record(Option<Record>),
    Records(Vec<Record>),
    Identities(BTreeSet<Identity>),
    Keys(BTreeSet<DataKey>),
    Types(BTreeSet<(DataType, String)>),
    Names(BTreeSet<String>),
    Value(SharedValue),
    Values(Vec<SharedValue>),
    Previous(Vec<Option<SharedValue>>),
    MapKeys(BTreeSet<SharedValue>),
    Log(Vec<LogLine>),
    Times(Option<DateTime<Utc>>, Option<DateTime<Utc>>),
}

/// A failed call, as seen by the remote caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct RpcFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<AuditError> for RpcFailure {
    fn from(err: AuditError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// The live stores of this process, keyed by audit name.
#[derive(Debug, Default)]
pub struct Dispatcher {
    stores: BTreeMap<String, AuditStore>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start serving calls for `store`'s audit.
    pub fn register(&mut self, store: AuditStore) -> Result<(), AuditError> {
        let name = store.audit_name().to_string();
        if self.stores.contains_key(&name) {
            return Err(AuditError::Validation(format!(
                "Audit '{}' is already registered",
                name
            )));
        }
        tracing::debug!(audit = %name, "registered audit store");
        self.stores.insert(name, store);
        Ok(())
    }

    /// Stop serving an audit and hand its store back for closing.
    pub fn unregister(&mut self, audit_name: &str) -> Option<AuditStore> {
        self.stores.remove(audit_name)
    }

    #[must_use]
    pub fn store(&self, audit_name: &str) -> Option<&AuditStore> {
        self.stores.get(audit_name)
    }

    pub fn audits(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// Execute a call, returning the store's error unchanged.
    pub fn dispatch(&self, request: Request) -> Result<Reply, AuditError> {
        let store = self.stores.get(&request.audit_name).ok_or_else(|| {
            AuditError::NotFound(format!("No such audit: {}", request.audit_name))
        })?;
        tracing::trace!(audit = %request.audit_name, call = request.call.name(), "dispatching");
        execute(store, request.call)
    }

    /// Execute a call, reporting failures in wire form.
    pub fn handle(&self, request: Request) -> Result<Reply, RpcFailure> {
        self.dispatch(request).map_err(RpcFailure::from)
    }

    /// Decode a postcard request, execute it and encode the outcome.
    pub fn handle_bytes(&self, request: &[u8]) -> Result<Vec<u8>, AuditError> {
        let outcome = match postcard::from_bytes::<Request>(request) {
            Ok(request) => self.handle(request),
            Err(e) => Err(RpcFailure {
                kind: ErrorKind::Validation,
                message: format!("Malformed request: {}", e),
            }),
        };
        postcard::to_stdvec(&outcome).map_err(|e| AuditError::Serialization(e.to_string()))
    }
}

impl Call {
    /// Operation name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AuditTimes => "audit_times",
            Self::SetAuditStartTime(_) => "set_audit_start_time",
            Self::SetAuditStopTime(_) => "set_audit_stop_time",
            Self::DataAdd(_) => "data_add",
            Self::DataAddMany(_) => "data_add_many",
            Self::DataRemove(_) => "data_remove",
            Self::DataRemoveMany(_) => "data_remove_many",
            Self::DataCheck(_) => "data_check",
            Self::DataGet(_) => "data_get",
            Self::DataGetMany(_) => "data_get_many",
            Self::DataKeys { .. } => "data_keys",
            Self::DataCount { .. } => "data_count",
            Self::DataTypes(_) => "data_types",
            Self::StageMark { .. } => "stage_mark",
            Self::StageGet(_) => "stage_get",
            Self::StageClear(_) => "stage_clear",
            Self::StageClearAll => "stage_clear_all",
            Self::StagePending(_) => "stage_pending",
            Self::PluginMark { .. } => "plugin_mark",
            Self::PluginHistory(_) => "plugin_history",
            Self::PluginClear(_) => "plugin_clear",
            Self::PluginClearAll => "plugin_clear_all",
            Self::StateAdd { .. } => "state_add",
            Self::StateRemove { .. } => "state_remove",
            Self::StateCheck { .. } => "state_check",
            Self::StateGet { .. } => "state_get",
            Self::StateNames(_) => "state_names",
            Self::MapGet { .. } => "map_get",
            Self::MapCheckAll { .. } => "map_check_all",
            Self::MapCheckAny { .. } => "map_check_any",
            Self::MapCheckEach { .. } => "map_check_each",
            Self::MapPop { .. } => "map_pop",
            Self::MapPut { .. } => "map_put",
            Self::MapSwap { .. } => "map_swap",
            Self::MapDelete { .. } => "map_delete",
            Self::MapKeys(_) => "map_keys",
            Self::HeapCheckAll { .. } => "heap_check_all",
            Self::HeapCheckAny { .. } => "heap_check_any",
            Self::HeapCheckEach { .. } => "heap_check_each",
            Self::HeapPop { .. } => "heap_pop",
            Self::HeapAdd { .. } => "heap_add",
            Self::HeapRemove { .. } => "heap_remove",
            Self::LogAppend(_) => "log_append",
            Self::LogQuery(_) => "log_query",
        }
    }
}

fn execute(store: &AuditStore, call: Call) -> Result<Reply, AuditError> {
    let reply = match call {
        Call::AuditTimes => {
            let (start, stop) = store.audit_times()?;
            Reply::Times(start, stop)
        }
        Call::SetAuditStartTime(t) => {
            store.set_audit_start_time(t)?;
            Reply::Done
        }
        Call::SetAuditStopTime(t) => {
            store.set_audit_stop_time(t)?;
            Reply::Done
        }

        Call::DataAdd(entity) => Reply::Added(store.add(entity)?),
        Call::DataAddMany(entities) => Reply::AddedMany(store.add_many(entities)?),
        Call::DataRemove(key) => Reply::Flag(store.remove(&key)?),
        Call::DataRemoveMany(keys) => Reply::Count(store.remove_many(&keys)? as u64),
        Call::DataCheck(key) => Reply::Flag(store.has(&key)?),
        Call::DataGet(key) => Reply::Record(store.get(&key)?),
        Call::DataGetMany(keys) => Reply::Records(store.get_many(&keys)?),
        Call::DataKeys { data_type, subtype } => {
            Reply::Identities(store.keys(data_type, subtype.as_deref())?)
        }
        Call::DataCount { data_type, subtype } => {
            Reply::Count(store.count(data_type, subtype.as_deref())? as u64)
        }
        Call::DataTypes(ids) => Reply::Types(store.types_of(&ids)?),

        Call::StageMark { keys, stage } => {
            store.mark_stage_finished_many(&keys, stage)?;
            Reply::Done
        }
        Call::StageGet(key) => Reply::Stage(store.stage_of(&key)?),
        Call::StageClear(key) => {
            store.clear_stage_mark(&key)?;
            Reply::Done
        }
        Call::StageClearAll => {
            store.clear_all_stage_marks()?;
            Reply::Done
        }
        Call::StagePending(stage) => Reply::Keys(store.pending_below(stage)?),

        Call::PluginMark { identity, plugin } => {
            store.mark_plugin_finished(&identity, &plugin)?;
            Reply::Done
        }
        Call::PluginHistory(identity) => Reply::Names(store.past_plugins(&identity)?),
        Call::PluginClear(identity) => {
            store.clear_history(&identity)?;
            Reply::Done
        }
        Call::PluginClearAll => {
            store.clear_all_history()?;
            Reply::Done
        }

        Call::StateAdd {
            plugin,
            name,
            value,
        } => {
            store.add_state_variable(&plugin, &name, &value)?;
            Reply::Done
        }
        Call::StateRemove { plugin, name } => {
            store.remove_state_variable(&plugin, &name)?;
            Reply::Done
        }
        Call::StateCheck { plugin, name } => Reply::Flag(store.has_state_variable(&plugin, &name)?),
        Call::StateGet { plugin, name } => Reply::Value(store.get_state_variable(&plugin, &name)?),
        Call::StateNames(plugin) => Reply::Names(store.state_variable_names(&plugin)?),

        Call::MapGet { shared_id, keys } => Reply::Values(store.map_get(&shared_id, &keys)?),
        Call::MapCheckAll { shared_id, keys } => Reply::Flag(store.map_has_all(&shared_id, &keys)?),
        Call::MapCheckAny { shared_id, keys } => Reply::Flag(store.map_has_any(&shared_id, &keys)?),
        Call::MapCheckEach { shared_id, keys } => {
            Reply::Flags(store.map_has_each(&shared_id, &keys)?)
        }
        Call::MapPop { shared_id, keys } => Reply::Values(store.map_pop(&shared_id, &keys)?),
        Call::MapPut { shared_id, items } => {
            store.map_put(&shared_id, &items)?;
            Reply::Done
        }
        Call::MapSwap { shared_id, items } => Reply::Previous(store.map_swap(&shared_id, &items)?),
        Call::MapDelete { shared_id, keys } => {
            store.map_delete(&shared_id, &keys)?;
            Reply::Done
        }
        Call::MapKeys(shared_id) => Reply::MapKeys(store.map_keys(&shared_id)?),

        Call::HeapCheckAll { shared_id, values } => {
            Reply::Flag(store.heap_has_all(&shared_id, &values)?)
        }
        Call::HeapCheckAny { shared_id, values } => {
            Reply::Flag(store.heap_has_any(&shared_id, &values)?)
        }
        Call::HeapCheckEach { shared_id, values } => {
            Reply::Flags(store.heap_has_each(&shared_id, &values)?)
        }
        Call::HeapPop { shared_id, maximum } => {
            let maximum = maximum
                .map(|m| {
                    usize::try_from(m)
                        .map_err(|_| AuditError::Validation(format!("Pop limit {} too large", m)))
                })
                .transpose()?;
            Reply::Values(store.heap_pop(&shared_id, maximum)?)
        }
        Call::HeapAdd { shared_id, values } => {
            store.heap_add(&shared_id, &values)?;
            Reply::Done
        }
        Call::HeapRemove { shared_id, values } => {
            store.heap_remove(&shared_id, &values)?;
            Reply::Done
        }

        Call::LogAppend(line) => {
            store.append_log(&line)?;
            Reply::Done
        }
        Call::LogQuery(query) => Reply::Log(store.query_log(&query)?),
    };
    Ok(reply)
}
