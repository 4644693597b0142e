//! # Transaction Coordination
//!
//! Every public store operation runs inside one of two wrappers:
//!
//! - **atomic**: at most one operation runs at a time. A second call made
//!   while the store is busy, from another thread or from inside the running
//!   operation, fails immediately with `AuditError::Busy`. It never waits.
//! - **transactional**: atomic, plus all writes happen in a single redb
//!   write transaction. The transaction commits when the operation returns
//!   `Ok` and is aborted otherwise, so no partial write survives an error.
//!
//! The busy flag is released on every exit path, including panics.

use crate::types::AuditError;
use redb::{Database, WriteTransaction};
use std::sync::atomic::{AtomicBool, Ordering};

/// Busy flag shared by all operations on one store.
#[derive(Debug, Default)]
pub struct Coordinator {
    busy: AtomicBool,
}

/// Clears the busy flag when dropped.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Coordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation is currently running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn enter(&self) -> Result<BusyGuard<'_>, AuditError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                tracing::warn!("rejected call: audit database is busy");
                AuditError::Busy
            })?;
        Ok(BusyGuard { flag: &self.busy })
    }

    /// Run `f` with exclusive access.
    pub fn run_atomic<T, F>(&self, f: F) -> Result<T, AuditError>
    where
        F: FnOnce() -> Result<T, AuditError>,
    {
        let _guard = self.enter()?;
        f()
    }

    /// Run `f` with exclusive access inside one write transaction.
    pub fn run_transactional<T, F>(&self, db: &Database, f: F) -> Result<T, AuditError>
    where
        F: FnOnce(&WriteTransaction) -> Result<T, AuditError>,
    {
        self.run_atomic(|| commit_or_rollback(db, f))
    }
}

/// Run `f` in a fresh write transaction, committing only on success.
pub(crate) fn commit_or_rollback<T, F>(db: &Database, f: F) -> Result<T, AuditError>
where
    F: FnOnce(&WriteTransaction) -> Result<T, AuditError>,
{
    let txn = db
        .begin_write()
        .map_err(|e| AuditError::Storage(e.to_string()))?;
    match f(&txn) {
        Ok(value) => {
            txn.commit()
                .map_err(|e| AuditError::Storage(e.to_string()))?;
            Ok(value)
        }
        Err(err) => {
            tracing::debug!(error = %err, "rolling back transaction");
            if let Err(abort) = txn.abort() {
                tracing::warn!(error = %abort, "transaction abort failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use redb::backends::InMemoryBackend;
    use redb::{ReadableDatabase, TableDefinition};

    const T: TableDefinition<&str, u64> = TableDefinition::new("t");

    fn memory_db() -> Database {
        Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .expect("in-memory db")
    }

    fn read(db: &Database, key: &str) -> Option<u64> {
        let txn = db.begin_read().expect("read txn");
        let Ok(table) = txn.open_table(T) else {
            return None;
        };
        table.get(key).expect("get").map(|v| v.value())
    }

    #[test]
    fn reentrant_call_is_busy() {
        let c = Coordinator::new();
        let inner = c.run_atomic(|| Ok(c.run_atomic(|| Ok(1))));
        assert!(matches!(inner, Ok(Err(AuditError::Busy))));
        assert!(!c.is_busy());
    }

    #[test]
    fn flag_released_after_error() {
        let c = Coordinator::new();
        let r: Result<(), _> = c.run_atomic(|| Err(AuditError::NotFound("x".into())));
        assert!(r.is_err());
        assert!(c.run_atomic(|| Ok(())).is_ok());
    }

    #[test]
    fn flag_released_after_panic() {
        let c = Coordinator::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = c.run_atomic::<(), _>(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!c.is_busy());
    }

    #[test]
    fn commit_on_success() {
        let db = memory_db();
        let c = Coordinator::new();
        c.run_transactional(&db, |txn| {
            let mut t = txn.open_table(T).map_err(|e| AuditError::Storage(e.to_string()))?;
            t.insert("a", 1).map_err(|e| AuditError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(read(&db, "a"), Some(1));
    }

    #[test]
    fn rollback_on_error() {
        let db = memory_db();
        let c = Coordinator::new();
        let r: Result<(), _> = c.run_transactional(&db, |txn| {
            let mut t = txn.open_table(T).map_err(|e| AuditError::Storage(e.to_string()))?;
            t.insert("a", 1).map_err(|e| AuditError::Storage(e.to_string()))?;
            Err(AuditError::Validation("late failure".into()))
        });
        assert!(r.is_err());
        assert_eq!(read(&db, "a"), None);
    }
}
