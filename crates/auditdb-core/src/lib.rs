//! # auditdb-core
//!
//! The audit data store: persistence and coordination for one security
//! audit.
//!
//! Plugins running in separate worker processes discover resources,
//! information and vulnerabilities. Every such finding, its links to other
//! findings, its pipeline progress, the plugins that already saw it and
//! any state the plugins share with each other lives in one store per
//! audit.
//!
//! ## Layout
//!
//! - `types` - entities, keys, shared values, log lines, errors
//! - `formats` - the blob codec and content hashing
//! - `storage` - the redb-backed `AuditStore`
//! - `transaction` - the busy guard that serializes operations
//! - `config` - store configuration and storage targets
//! - `export` - JSON snapshots of a whole audit
//! - `rpc` - remote-call requests and their dispatcher
//!
//! ## Architectural Constraints
//!
//! - Every operation runs alone: a concurrent or reentrant call fails
//!   with `Busy` instead of waiting
//! - Every operation is atomic: it commits fully or not at all
//! - No async, no network: the transport lives outside this crate

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod export;
pub mod formats;
pub mod primitives;
pub mod rpc;
pub mod storage;
pub mod transaction;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AddOutcome, AuditError, DataKey, DataType, Entity, ErrorKind, Identity, LogLevel, LogLine,
    LogQuery, Merge, Payload, Properties, Record, Relationship, SharedValue,
};

// =============================================================================
// RE-EXPORTS: Store
// =============================================================================

pub use config::{AuditScope, StorageTarget, StoreConfig};
pub use export::AuditSnapshot;
pub use rpc::{Call, Dispatcher, Reply, Request, RpcFailure};
pub use storage::{AuditStore, TypeRegistry};
pub use transaction::Coordinator;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{Fingerprint, content_hash, decode, encode, fingerprint};
