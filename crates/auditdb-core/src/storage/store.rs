//! # Audit Store
//!
//! `AuditStore` owns the redb database of one audit. It is opened from a
//! `StoreConfig`, exposes every operation as a `&self` method guarded by the
//! transaction coordinator, and is closed (optionally compacting the file)
//! when the audit ends.
//!
//! ## Opening
//!
//! 1. Resolve the target: the configured URL, or a file named after the
//!    audit, or a fresh generated name when neither is given.
//! 2. An existing file supplies the audit name if the config has none; a
//!    different configured name is a schema mismatch.
//! 3. Create missing tables, then write the header (new database) or check
//!    its schema version and audit name (existing database).
//! 4. Load the subtype registry.

use super::registry::TypeRegistry;
use super::tables::{self, AuditHeader, HEADER, from_row, storage, to_row};
use crate::config::{AuditScope, StorageTarget, StoreConfig, filename_for_audit, generate_audit_name};
use crate::formats::codec;
use crate::primitives::{HEADER_KEY, SCHEMA_VERSION};
use crate::transaction::{Coordinator, commit_or_rollback};
use crate::types::AuditError;
use chrono::{DateTime, Utc};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableError, WriteTransaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Durable state of one audit.
pub struct AuditStore {
    db: Database,
    coordinator: Coordinator,
    registry: Mutex<TypeRegistry>,
    audit_name: String,
    target: StorageTarget,
    config: StoreConfig,
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStore")
            .field("audit_name", &self.audit_name)
            .field("target", &self.target)
            .field("busy", &self.coordinator.is_busy())
            .finish_non_exhaustive()
    }
}

impl AuditStore {
    /// Open or create the store described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self, AuditError> {
        let mut config = config;
        let target = match config.audit_db.as_deref() {
            Some(url) => StorageTarget::parse(url)?,
            None => {
                let name = config.audit_name.get_or_insert_with(generate_audit_name);
                StorageTarget::File(filename_for_audit(name))
            }
        };

        let db = match &target {
            StorageTarget::Memory => {
                config.audit_name.get_or_insert_with(generate_audit_name);
                Database::builder()
                    .create_with_backend(InMemoryBackend::new())
                    .map_err(storage)?
            }
            StorageTarget::File(path) => {
                let existed = path.exists();
                let db = Database::create(path).map_err(storage)?;
                if existed {
                    if let Some(header) = read_header(&db)? {
                        match &config.audit_name {
                            None => config.audit_name = Some(header.audit_name),
                            Some(name) if *name != header.audit_name => {
                                return Err(AuditError::SchemaMismatch(format!(
                                    "Database belongs to audit '{}', not '{}'",
                                    header.audit_name, name
                                )));
                            }
                            Some(_) => {}
                        }
                    }
                }
                if config.audit_name.is_none() {
                    config.audit_name = Some(file_stem(path)?);
                }
                db
            }
        };

        let audit_name = match config.audit_name.clone() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(AuditError::Validation("Audit name is empty".to_string())),
        };
        config.audit_db = Some(target.connection_url());

        ensure_schema(&db, &audit_name, &config)?;
        let registry = {
            let txn = db.begin_read().map_err(storage)?;
            TypeRegistry::load(&txn)?
        };

        tracing::debug!(
            audit = %audit_name,
            url = %target.connection_url(),
            subtypes = registry.len(),
            "opened audit store"
        );

        Ok(Self {
            db,
            coordinator: Coordinator::new(),
            registry: Mutex::new(registry),
            audit_name,
            target,
            config,
        })
    }

    /// Open a volatile store for the named audit.
    pub fn in_memory(audit_name: impl Into<String>) -> Result<Self, AuditError> {
        Self::open(StoreConfig::memory(audit_name))
    }

    /// Read the configuration stored in a closed database.
    pub fn read_config(url: &str, audit_name: Option<&str>) -> Result<StoreConfig, AuditError> {
        let path = match StorageTarget::parse(url)? {
            StorageTarget::File(path) => path,
            StorageTarget::Memory => {
                return Err(AuditError::Validation(
                    "Volatile databases cannot be read once closed".to_string(),
                ));
            }
        };
        if !path.exists() {
            return Err(AuditError::NotFound(format!(
                "Database file not found: {}",
                path.display()
            )));
        }
        let db = Database::open(&path).map_err(storage)?;
        let header = read_header(&db)?
            .ok_or_else(|| AuditError::Storage(format!("{}: missing audit header", path.display())))?;
        check_header(&header, audit_name.unwrap_or(&header.audit_name))?;
        let mut config: StoreConfig = codec::decode(&header.audit_config)?;
        config.audit_name = Some(header.audit_name);
        config.audit_db = Some(StorageTarget::File(path).connection_url());
        Ok(config)
    }

    // =========================================================================
    // IDENTIFICATION
    // =========================================================================

    #[must_use]
    pub fn audit_name(&self) -> &str {
        &self.audit_name
    }

    #[must_use]
    pub fn connection_url(&self) -> String {
        self.target.connection_url()
    }

    /// Database file, `None` for volatile stores.
    #[must_use]
    pub fn filename(&self) -> Option<&Path> {
        self.target.path()
    }

    /// The resolved configuration this store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.coordinator.is_busy()
    }

    // =========================================================================
    // AUDIT HEADER
    // =========================================================================

    /// Start and stop time of the audit.
    pub fn audit_times(&self) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), AuditError> {
        self.read(|txn, _| {
            let header = header_in(txn)?;
            Ok((from_micros(header.start_time)?, from_micros(header.stop_time)?))
        })
    }

    pub fn set_audit_start_time(&self, start: Option<DateTime<Utc>>) -> Result<(), AuditError> {
        self.update_header(|header| header.start_time = start.map(|t| t.timestamp_micros()))
    }

    pub fn set_audit_stop_time(&self, stop: Option<DateTime<Utc>>) -> Result<(), AuditError> {
        self.update_header(|header| header.stop_time = stop.map(|t| t.timestamp_micros()))
    }

    /// Scope recorded when the audit was created.
    pub fn audit_scope(&self) -> Result<AuditScope, AuditError> {
        self.read(|txn, _| codec::decode(&header_in(txn)?.audit_scope))
    }

    /// Configuration recorded when the audit was created.
    pub fn stored_config(&self) -> Result<StoreConfig, AuditError> {
        self.read(|txn, _| codec::decode(&header_in(txn)?.audit_config))
    }

    fn update_header(&self, f: impl FnOnce(&mut AuditHeader)) -> Result<(), AuditError> {
        self.coordinator.run_transactional(&self.db, |txn| {
            let mut table = txn.open_table(HEADER).map_err(storage)?;
            let bytes = table
                .get(HEADER_KEY)
                .map_err(storage)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| AuditError::Storage("missing audit header".to_string()))?;
            let mut header: AuditHeader = from_row(&bytes)?;
            f(&mut header);
            table
                .insert(HEADER_KEY, to_row(&header)?.as_slice())
                .map_err(storage)?;
            Ok(())
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), AuditError> {
        let Self { db, coordinator, .. } = self;
        coordinator.run_atomic(|| {
            let compacted = db.compact().map_err(storage)?;
            tracing::debug!(compacted, "compacted audit database");
            Ok(())
        })
    }

    /// Close the store, compacting the file if configured to.
    pub fn close(mut self) -> Result<(), AuditError> {
        if self.config.compact_on_close && matches!(self.target, StorageTarget::File(_)) {
            self.compact()?;
        }
        tracing::debug!(audit = %self.audit_name, "closed audit store");
        Ok(())
    }

    // =========================================================================
    // OPERATION WRAPPERS
    // =========================================================================

    /// Run `f` in one write transaction, settling the registry afterwards.
    pub(crate) fn transact<T, F>(&self, f: F) -> Result<T, AuditError>
    where
        F: FnOnce(&WriteTransaction, &mut TypeRegistry) -> Result<T, AuditError>,
    {
        self.coordinator.run_atomic(|| {
            let mut registry = self.lock_registry()?;
            let result = commit_or_rollback(&self.db, |txn| f(txn, &mut registry));
            registry.settle(result.is_ok());
            result
        })
    }

    /// Run `f` in one write transaction that never touches the registry.
    pub(crate) fn write<T, F>(&self, f: F) -> Result<T, AuditError>
    where
        F: FnOnce(&WriteTransaction) -> Result<T, AuditError>,
    {
        self.coordinator.run_transactional(&self.db, f)
    }

    /// Run `f` against a consistent snapshot.
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T, AuditError>
    where
        F: FnOnce(&ReadTransaction, &TypeRegistry) -> Result<T, AuditError>,
    {
        self.coordinator.run_atomic(|| {
            let registry = self.lock_registry()?;
            let txn = self.db.begin_read().map_err(storage)?;
            f(&txn, &registry)
        })
    }

    fn lock_registry(&self) -> Result<MutexGuard<'_, TypeRegistry>, AuditError> {
        self.registry
            .lock()
            .map_err(|_| AuditError::Storage("type registry lock poisoned".to_string()))
    }
}

// =============================================================================
// HEADER HELPERS
// =============================================================================

fn read_header(db: &Database) -> Result<Option<AuditHeader>, AuditError> {
    let txn = db.begin_read().map_err(storage)?;
    let table = match txn.open_table(HEADER) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(storage(e)),
    };
    match table.get(HEADER_KEY).map_err(storage)? {
        Some(bytes) => Ok(Some(from_row(bytes.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn header_in(txn: &ReadTransaction) -> Result<AuditHeader, AuditError> {
    let table = txn.open_table(HEADER).map_err(storage)?;
    let bytes = table
        .get(HEADER_KEY)
        .map_err(storage)?
        .ok_or_else(|| AuditError::Storage("missing audit header".to_string()))?;
    from_row(bytes.value())
}

fn check_header(header: &AuditHeader, audit_name: &str) -> Result<(), AuditError> {
    if header.schema_version != SCHEMA_VERSION {
        return Err(AuditError::SchemaMismatch(format!(
            "Schema version {} is not supported (expected {})",
            header.schema_version, SCHEMA_VERSION
        )));
    }
    if header.audit_name != audit_name {
        return Err(AuditError::SchemaMismatch(format!(
            "Database belongs to audit '{}', not '{}'",
            header.audit_name, audit_name
        )));
    }
    Ok(())
}

fn ensure_schema(db: &Database, audit_name: &str, config: &StoreConfig) -> Result<(), AuditError> {
    commit_or_rollback(db, |txn| {
        tables::create_all(txn)?;
        let mut table = txn.open_table(HEADER).map_err(storage)?;
        let existing = table
            .get(HEADER_KEY)
            .map_err(storage)?
            .map(|v| v.value().to_vec());
        match existing {
            Some(bytes) => check_header(&from_row(&bytes)?, audit_name),
            None => {
                let header = AuditHeader {
                    schema_version: SCHEMA_VERSION,
                    audit_name: audit_name.to_string(),
                    start_time: None,
                    stop_time: None,
                    audit_config: codec::encode(config)?,
                    audit_scope: codec::encode(&config.scope)?,
                };
                table
                    .insert(HEADER_KEY, to_row(&header)?.as_slice())
                    .map_err(storage)?;
                tracing::debug!(audit = audit_name, "created audit schema");
                Ok(())
            }
        }
    })
}

fn file_stem(path: &Path) -> Result<String, AuditError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AuditError::Validation(format!("Cannot derive an audit name from {}", path.display()))
        })
}

pub(crate) fn from_micros(micros: Option<i64>) -> Result<Option<DateTime<Utc>>, AuditError> {
    micros
        .map(|m| {
            DateTime::from_timestamp_micros(m)
                .ok_or_else(|| AuditError::Deserialization(format!("Invalid timestamp {}", m)))
        })
        .transpose()
}
