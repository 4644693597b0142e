//! # Formats
//!
//! Value encoding for everything the store persists.
//!
//! Database row layouts live with the tables in `storage`; this module only
//! turns caller values into compressed blobs and content hashes.

pub mod codec;

pub use codec::{Fingerprint, content_hash, decode, encode, fingerprint};
