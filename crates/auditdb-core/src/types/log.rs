//! Audit log lines and queries.

use super::AuditError;
use super::entity::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verbosity of a log line.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LogLevel {
    #[default]
    Standard,
    Verbose,
    MoreVerbose,
}

/// One line of the audit log.
///
/// `timestamp` defaults to the time the line was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub plugin: Option<String>,
    pub identity: Option<Identity>,
    pub text: String,
    pub level: LogLevel,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            plugin: None,
            identity: None,
            text: text.into(),
            level: LogLevel::Standard,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    #[must_use]
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub const fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub const fn error(mut self) -> Self {
        self.is_error = true;
        self
    }

    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Filter and page selection for log queries.
///
/// Time bounds are inclusive. `page` is 1-based and only meaningful
/// together with `per_page`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub plugin: Option<String>,
    pub identity: Option<Identity>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl LogQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    #[must_use]
    pub fn plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    #[must_use]
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub const fn page(mut self, page: usize, per_page: usize) -> Self {
        self.page = Some(page);
        self.per_page = Some(per_page);
        self
    }

    /// Number of matching lines to skip and to return.
    pub(crate) fn window(&self) -> Result<(usize, Option<usize>), AuditError> {
        match (self.page, self.per_page) {
            (_, Some(0)) => Err(AuditError::Validation("per_page must be positive".into())),
            (Some(0), _) => Err(AuditError::Validation("page numbers start at 1".into())),
            (page, Some(per_page)) => {
                let skip = page.unwrap_or(1).saturating_sub(1).saturating_mul(per_page);
                Ok((skip, Some(per_page)))
            }
            (_, None) => Ok((0, None)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn window_paginates_one_based() {
        assert_eq!(LogQuery::new().window().unwrap(), (0, None));
        assert_eq!(LogQuery::new().page(1, 10).window().unwrap(), (0, Some(10)));
        assert_eq!(LogQuery::new().page(3, 10).window().unwrap(), (20, Some(10)));
    }

    #[test]
    fn window_rejects_zero() {
        assert!(LogQuery::new().page(0, 10).window().is_err());
        assert!(LogQuery::new().page(1, 0).window().is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let line = LogLine::new("scan started").plugin("nmap").error();
        assert_eq!(line.plugin.as_deref(), Some("nmap"));
        assert!(line.is_error);
        assert_eq!(line.level, LogLevel::Standard);
    }
}
