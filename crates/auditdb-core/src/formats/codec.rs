//! # Value Codec
//!
//! Every stored value goes through the same pipeline:
//!
//! ```text
//! value --postcard--> raw bytes --zlib(9)--> blob
//!                         |
//!                         +--blake3--> content hash (hex)
//! ```
//!
//! Hashes are taken over the raw bytes, so they do not depend on the
//! compressor. Equal values always produce equal blobs and hashes.
//!
//! ## Limits
//!
//! Decompression stops at `MAX_DECODED_SIZE`; larger blobs are rejected
//! before postcard ever sees them.

use crate::primitives::{COMPRESSION_LEVEL, MAX_DECODED_SIZE};
use crate::types::AuditError;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

/// A value encoded once: its storage blob plus its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: String,
    pub blob: Vec<u8>,
}

/// Encode a value into a compressed blob.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, AuditError> {
    compress(&to_raw(value)?)
}

/// Decode a blob produced by [`encode`].
pub fn decode<T: DeserializeOwned>(blob: &[u8]) -> Result<T, AuditError> {
    let raw = decompress(blob)?;
    postcard::from_bytes(&raw).map_err(|e| AuditError::Deserialization(e.to_string()))
}

/// Hex content hash of a value.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, AuditError> {
    Ok(hash_raw(&to_raw(value)?))
}

/// Encode a value and hash it in one pass.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<Fingerprint, AuditError> {
    let raw = to_raw(value)?;
    Ok(Fingerprint {
        hash: hash_raw(&raw),
        blob: compress(&raw)?,
    })
}

fn to_raw<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, AuditError> {
    postcard::to_stdvec(value).map_err(|e| AuditError::Serialization(e.to_string()))
}

fn hash_raw(raw: &[u8]) -> String {
    blake3::hash(raw).to_hex().to_string()
}

fn compress(raw: &[u8]) -> Result<Vec<u8>, AuditError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder
        .write_all(raw)
        .map_err(|e| AuditError::Serialization(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| AuditError::Serialization(e.to_string()))
}

fn decompress(blob: &[u8]) -> Result<Vec<u8>, AuditError> {
    let mut raw = Vec::new();
    ZlibDecoder::new(blob)
        .take(MAX_DECODED_SIZE + 1)
        .read_to_end(&mut raw)
        .map_err(|e| AuditError::Deserialization(e.to_string()))?;
    if raw.len() as u64 > MAX_DECODED_SIZE {
        return Err(AuditError::Deserialization(format!(
            "Decoded value exceeds {} bytes",
            MAX_DECODED_SIZE
        )));
    }
    Ok(raw)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Properties, SharedValue};

    #[test]
    fn encode_decode_preserves_value() {
        let props = Properties::new()
            .with("url", "http://example.com/")
            .with("depth", 3i64)
            .with("raw", vec![0u8, 1, 2]);
        let blob = encode(&props).unwrap();
        let back: Properties = decode(&blob).unwrap();
        assert_eq!(back, props);
    }

    #[test]
    fn fingerprint_matches_separate_calls() {
        let value = SharedValue::List(vec![SharedValue::Int(1), SharedValue::Null]);
        let fp = fingerprint(&value).unwrap();
        assert_eq!(fp.hash, content_hash(&value).unwrap());
        assert_eq!(fp.blob, encode(&value).unwrap());
    }

    #[test]
    fn equal_values_hash_equal() {
        assert_eq!(
            content_hash(&SharedValue::from("a")).unwrap(),
            content_hash(&SharedValue::from("a")).unwrap()
        );
        assert_ne!(
            content_hash(&SharedValue::from("a")).unwrap(),
            content_hash(&SharedValue::from("b")).unwrap()
        );
    }

    #[test]
    fn garbage_is_a_deserialization_error() {
        let result: Result<Properties, _> = decode(b"not zlib at all");
        assert!(matches!(result, Err(AuditError::Deserialization(_))));
    }

    #[test]
    fn repetitive_values_compress() {
        let text = "a".repeat(10_000);
        let blob = encode(&text).unwrap();
        assert!(blob.len() < 1_000);
    }
}
