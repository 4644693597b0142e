//! # Store Primitives
//!
//! Hardcoded constants for the audit store.
//!
//! These values are compiled into the binary and fixed at runtime. Changing
//! any of the format constants requires bumping `SCHEMA_VERSION`.

/// Current on-disk schema version.
///
/// - Written to the audit header when a database is created.
/// - Opening a database with a different version fails with a schema mismatch.
pub const SCHEMA_VERSION: u32 = 1;

/// Prefix of generated audit names.
pub const AUDIT_NAME_PREFIX: &str = "golismero-";

/// Number of random characters appended to `AUDIT_NAME_PREFIX`.
pub const AUDIT_NAME_RANDOM_LEN: usize = 8;

/// Extension of database files derived from an audit name.
pub const DB_FILE_EXTENSION: &str = "db";

/// Scheme of file-backed connection URLs.
pub const FILE_SCHEME: &str = "redb";

/// Accepted alias of `FILE_SCHEME`.
pub const FILE_SCHEME_ALIAS: &str = "sqlite";

/// Connection URL of a volatile store.
pub const MEMORY_URL: &str = "memory://";

/// zlib compression level applied to every stored value.
pub const COMPRESSION_LEVEL: u32 = 9;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of an entity identity.
///
/// Content hashes are 64 hex characters; the limit leaves room for
/// caller-chosen identities without allowing unbounded keys.
pub const MAX_IDENTITY_LENGTH: usize = 128;

/// Maximum length of a subtype name, including its family prefix.
pub const MAX_SUBTYPE_LENGTH: usize = 256;

/// Maximum size of a decompressed blob.
///
/// Decoding stops and fails once this limit is exceeded, so a corrupt or
/// hostile blob cannot exhaust memory.
pub const MAX_DECODED_SIZE: u64 = 256 * 1024 * 1024;

// =============================================================================
// METADATA KEYS
// =============================================================================

/// Key of the audit header row.
pub const HEADER_KEY: &str = "golismero";

/// Key of the monotonic row id counter.
pub const NEXT_ROWID_KEY: &str = "next_rowid";
