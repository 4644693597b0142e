//! # Log Store
//!
//! Append-only audit log, keyed by timestamp so queries read it in order.
//! Appends are best effort: a line whose text cannot be encoded is dropped
//! with a warning instead of failing the caller.

use super::history::{intern_plugin, plugin_of};
use super::store::{AuditStore, from_micros};
use super::tables::{LOG, LogRow, PLUGIN_NAMES, from_row, next_rowid, storage, to_row};
use crate::formats::codec;
use crate::types::{AuditError, Identity, LogLine, LogQuery};
use redb::ReadTransaction;

impl AuditStore {
    /// Append a line to the audit log.
    pub fn append_log(&self, line: &LogLine) -> Result<(), AuditError> {
        let text = match codec::encode(&line.text) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "dropping log line that could not be encoded");
                return Ok(());
            }
        };
        let timestamp = line.timestamp.timestamp_micros();
        self.write(|txn| {
            let plugin = line
                .plugin
                .as_deref()
                .map(|name| intern_plugin(txn, name))
                .transpose()?;
            let row = LogRow {
                plugin,
                identity: line.identity.as_ref().map(|id| id.as_str().to_string()),
                text,
                level: line.level,
                is_error: line.is_error,
            };
            let rowid = next_rowid(txn)?;
            txn.open_table(LOG)
                .map_err(storage)?
                .insert((timestamp, rowid), to_row(&row)?.as_slice())
                .map_err(storage)?;
            Ok(())
        })
    }

    /// Log lines matching `query`, oldest first.
    pub fn query_log(&self, query: &LogQuery) -> Result<Vec<LogLine>, AuditError> {
        let (skip, take) = query.window()?;
        self.read(|txn, _| lines_in(txn, query, skip, take))
    }
}

/// Matching lines in `txn`, after skipping `skip` and keeping at most `take`.
pub(crate) fn lines_in(
    txn: &ReadTransaction,
    query: &LogQuery,
    skip: usize,
    take: Option<usize>,
) -> Result<Vec<LogLine>, AuditError> {
    let from = query.from.map_or(i64::MIN, |t| t.timestamp_micros());
    let to = query.to.map_or(i64::MAX, |t| t.timestamp_micros());
    if from > to {
        return Ok(Vec::new());
    }
    let plugin_filter = match query.plugin.as_deref() {
        Some(name) => match plugin_of(txn, name)? {
            Some(id) => Some(id),
            None => return Ok(Vec::new()),
        },
        None => None,
    };
    let identity_filter = query.identity.as_ref().map(Identity::as_str);

    let log = txn.open_table(LOG).map_err(storage)?;
    let names = txn.open_table(PLUGIN_NAMES).map_err(storage)?;
    let mut lines = Vec::new();
    let mut skipped = 0;
    for entry in log.range((from, 0u64)..=(to, u64::MAX)).map_err(storage)? {
        if take.is_some_and(|take| lines.len() >= take) {
            break;
        }
        let (k, v) = entry.map_err(storage)?;
        let row: LogRow = from_row(v.value())?;
        if plugin_filter.is_some() && row.plugin != plugin_filter {
            continue;
        }
        if identity_filter.is_some() && row.identity.as_deref() != identity_filter {
            continue;
        }
        if skipped < skip {
            skipped += 1;
            continue;
        }

        let plugin = match row.plugin {
            Some(id) => Some(
                names
                    .get(id)
                    .map_err(storage)?
                    .ok_or_else(|| {
                        AuditError::Deserialization(format!("Unknown plugin id {}", id))
                    })?
                    .value()
                    .to_string(),
            ),
            None => None,
        };
        let (micros, _) = k.value();
        let timestamp = from_micros(Some(micros))?.ok_or_else(|| {
            AuditError::Deserialization(format!("Invalid timestamp {}", micros))
        })?;
        lines.push(LogLine {
            plugin,
            identity: row.identity.as_deref().map(Identity::from_stored),
            text: codec::decode(&row.text)?,
            level: row.level,
            is_error: row.is_error,
            timestamp,
        });
    }
    Ok(lines)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::LogLevel;
    use chrono::{DateTime, Duration, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
    }

    fn store_with_lines() -> AuditStore {
        let s = AuditStore::in_memory("log-tests").expect("store");
        let target = Identity::new("e1").unwrap();
        s.append_log(&LogLine::new("third").plugin("nikto").at(at(30))).unwrap();
        s.append_log(&LogLine::new("first").plugin("spider").at(at(10))).unwrap();
        s.append_log(
            &LogLine::new("second")
                .plugin("spider")
                .identity(target)
                .level(LogLevel::Verbose)
                .error()
                .at(at(20)),
        )
        .unwrap();
        s.append_log(&LogLine::new("core").at(at(40))).unwrap();
        s
    }

    fn texts(lines: &[LogLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn lines_come_back_in_time_order() {
        let s = store_with_lines();
        let lines = s.query_log(&LogQuery::new()).unwrap();
        assert_eq!(texts(&lines), vec!["first", "second", "third", "core"]);
        assert_eq!(lines[1].level, LogLevel::Verbose);
        assert!(lines[1].is_error);
        assert_eq!(lines[1].timestamp, at(20));
        assert_eq!(lines[3].plugin, None);
    }

    #[test]
    fn filters_combine() {
        let s = store_with_lines();
        let by_plugin = s.query_log(&LogQuery::new().plugin("spider")).unwrap();
        assert_eq!(texts(&by_plugin), vec!["first", "second"]);

        let by_entity = s
            .query_log(&LogQuery::new().identity(Identity::new("e1").unwrap()))
            .unwrap();
        assert_eq!(texts(&by_entity), vec!["second"]);

        let window = s.query_log(&LogQuery::new().between(at(15), at(30))).unwrap();
        assert_eq!(texts(&window), vec!["second", "third"]);

        assert!(s.query_log(&LogQuery::new().plugin("ghost")).unwrap().is_empty());
    }

    #[test]
    fn pagination() {
        let s = store_with_lines();
        let page1 = s.query_log(&LogQuery::new().page(1, 3)).unwrap();
        let page2 = s.query_log(&LogQuery::new().page(2, 3)).unwrap();
        assert_eq!(texts(&page1), vec!["first", "second", "third"]);
        assert_eq!(texts(&page2), vec!["core"]);
        assert!(matches!(
            s.query_log(&LogQuery::new().page(0, 3)),
            Err(AuditError::Validation(_))
        ));
    }

    #[test]
    fn default_timestamp_is_now() {
        let s = AuditStore::in_memory("log-now").expect("store");
        let before = Utc::now() - Duration::seconds(1);
        s.append_log(&LogLine::new("hello")).unwrap();
        let lines = s.query_log(&LogQuery::new()).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].timestamp >= before);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let s = AuditStore::in_memory("log-ties").expect("store");
        s.append_log(&LogLine::new("a").at(at(0))).unwrap();
        s.append_log(&LogLine::new("b").at(at(0))).unwrap();
        let lines = s.query_log(&LogQuery::new()).unwrap();
        assert_eq!(texts(&lines), vec!["a", "b"]);
    }
}
