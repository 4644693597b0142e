//! # redb-backed Audit Storage
//!
//! All durable state of an audit lives in one redb database, providing:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - A single writer, which matches the store's one-operation-at-a-time
//!   contract
//!
//! `AuditStore` is split by concern:
//!
//! | module    | operations                                      |
//! |-----------|-------------------------------------------------|
//! | `store`   | open, header, compact, close                    |
//! | `graph`   | add, get, remove, keys, count, types            |
//! | `stages`  | stage marks and pending work                    |
//! | `history` | plugin history and plugin state variables       |
//! | `shared`  | shared maps and shared heaps                    |
//! | `log`     | audit log append and query                      |

mod graph;
mod history;
pub(crate) mod log;
mod registry;
mod shared;
mod stages;
pub(crate) mod store;
pub(crate) mod tables;

pub use registry::TypeRegistry;
pub use store::AuditStore;
