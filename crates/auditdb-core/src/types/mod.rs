//! # Core Type Definitions
//!
//! This module contains all core types for the audit data store:
//! - Entity identifiers and keys (`Identity`, `DataKey`, `DataType`)
//! - Entities and fetched records (`Entity`, `Relationship`, `Record`)
//! - Type-erased coordination values (`SharedValue`, `Properties`)
//! - Log lines and log queries (`LogLine`, `LogQuery`)
//! - Error types (`AuditError`, `ErrorKind`)
//!
//! ## Ordering Guarantees
//!
//! Every type that can appear in a result set implements `Ord`, so results
//! are returned in `BTreeSet`/`BTreeMap` order regardless of storage layout.

mod entity;
mod log;
mod value;

pub use entity::{AddOutcome, DataKey, DataType, Entity, Identity, Record, Relationship};
pub use log::{LogLevel, LogLine, LogQuery};
pub use value::{Merge, Payload, Properties, SharedValue};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the audit store.
///
/// - No silent failures (except best-effort log appends)
/// - Use `Result<T, AuditError>` for fallible operations
/// - A failed operation never leaves a partial write behind: its
///   transaction is rolled back before the error reaches the caller
#[derive(Debug, Error)]
pub enum AuditError {
    /// Another operation is already running against this store.
    #[error("The audit database is busy")]
    Busy,

    /// The database file belongs to another audit or schema version.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A requested key, value or record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An argument was malformed or inconsistent.
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// The storage engine or filesystem failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A value could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored blob could not be decoded.
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Failure categories reported to remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A concurrent or reentrant call was rejected.
    Busy,
    /// Open-time schema or audit name mismatch.
    SchemaMismatch,
    /// Missing key or record.
    NotFound,
    /// Programmer error: malformed or inconsistent arguments.
    Validation,
    /// Filesystem, database or stored-data failure.
    StorageIo,
}

impl AuditError {
    /// The failure category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::Busy,
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) | Self::Serialization(_) => ErrorKind::Validation,
            Self::Storage(_) | Self::Deserialization(_) => ErrorKind::StorageIo,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
