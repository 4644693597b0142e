//! # Store Configuration
//!
//! `StoreConfig` says which audit a store belongs to and where it lives.
//! It can be built in code, loaded from TOML, and overridden from the
//! environment:
//!
//! ```toml
//! audit_name = "golismero-3f2a9c1d"
//! audit_db = "redb:///var/lib/golismero/audit.db"
//! compact_on_close = true
//!
//! [scope]
//! domains = ["example.com"]
//! addresses = ["10.0.0.1"]
//! roots = ["http://example.com/"]
//! ```
//!
//! ## Connection URLs
//!
//! | URL                 | Storage                          |
//! |---------------------|----------------------------------|
//! | `redb://<path>`     | database file at `<path>`        |
//! | `sqlite://<path>`   | alias of `redb://`               |
//! | `memory://`         | volatile, dropped on close       |
//! | `<path>`            | database file at `<path>`        |
//!
//! When no URL is given the file name is derived from the audit name.

use crate::primitives::{
    AUDIT_NAME_PREFIX, AUDIT_NAME_RANDOM_LEN, DB_FILE_EXTENSION, FILE_SCHEME, FILE_SCHEME_ALIAS,
    MEMORY_URL,
};
use crate::types::AuditError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Environment variable overriding `audit_name`.
pub const ENV_AUDIT_NAME: &str = "AUDITDB_NAME";

/// Environment variable overriding `audit_db`.
pub const ENV_AUDIT_DB: &str = "AUDITDB_URL";

/// Targets an audit is allowed to touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditScope {
    pub addresses: BTreeSet<String>,
    pub domains: BTreeSet<String>,
    pub roots: BTreeSet<String>,
}

impl AuditScope {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.domains.is_empty() && self.roots.is_empty()
    }
}

/// Configuration of one audit store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Audit name. Generated when absent.
    pub audit_name: Option<String>,
    /// Connection URL. Derived from the audit name when absent.
    pub audit_db: Option<String>,
    /// Compact the database file when the store is closed.
    pub compact_on_close: bool,
    /// Scope recorded in the audit header.
    pub scope: AuditScope,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            audit_name: None,
            audit_db: None,
            compact_on_close: true,
            scope: AuditScope::default(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A volatile store for the named audit.
    #[must_use]
    pub fn memory(audit_name: impl Into<String>) -> Self {
        Self::new()
            .with_audit_name(audit_name)
            .with_audit_db(MEMORY_URL)
    }

    #[must_use]
    pub fn with_audit_name(mut self, name: impl Into<String>) -> Self {
        self.audit_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_audit_db(mut self, url: impl Into<String>) -> Self {
        self.audit_db = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: AuditScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self, AuditError> {
        toml::from_str(s).map_err(|e| AuditError::Validation(format!("Invalid config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AuditError::Storage(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, AuditError> {
        toml::to_string(self).map_err(|e| AuditError::Serialization(e.to_string()))
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(name) = lookup(ENV_AUDIT_NAME).filter(|s| !s.is_empty()) {
            self.audit_name = Some(name);
        }
        if let Some(url) = lookup(ENV_AUDIT_DB).filter(|s| !s.is_empty()) {
            self.audit_db = Some(url);
        }
        self
    }
}

// =============================================================================
// STORAGE TARGET
// =============================================================================

/// Where a store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    File(PathBuf),
    Memory,
}

impl StorageTarget {
    /// Parse a connection URL or bare path.
    pub fn parse(url: &str) -> Result<Self, AuditError> {
        let target = match url.split_once("://") {
            Some(("memory", _)) => Self::Memory,
            Some((scheme, path)) if scheme == FILE_SCHEME || scheme == FILE_SCHEME_ALIAS => {
                Self::File(PathBuf::from(path))
            }
            Some((scheme, _)) => {
                return Err(AuditError::Validation(format!(
                    "Unsupported database type: {}",
                    scheme
                )));
            }
            None => Self::File(PathBuf::from(url)),
        };
        if matches!(&target, Self::File(p) if p.as_os_str().is_empty()) {
            return Err(AuditError::Validation(format!(
                "Missing database filename in '{}'",
                url
            )));
        }
        Ok(target)
    }

    #[must_use]
    pub fn connection_url(&self) -> String {
        match self {
            Self::File(path) => format!("{}://{}", FILE_SCHEME, path.display()),
            Self::Memory => MEMORY_URL.to_string(),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Memory => None,
        }
    }
}

/// Random audit name, e.g. `golismero-3f2a9c1d`.
#[must_use]
pub fn generate_audit_name() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", AUDIT_NAME_PREFIX, &random[..AUDIT_NAME_RANDOM_LEN])
}

/// Database file name for an audit.
///
/// Characters other than ASCII alphanumerics and `-_~` become `_`.
#[must_use]
pub fn filename_for_audit(audit_name: &str) -> PathBuf {
    let stem: String = audit_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "-_~".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect();
    PathBuf::from(format!("{}.{}", stem, DB_FILE_EXTENSION))
}
