// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Encoding of one cache record per file.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic "STRC" | version u8 | metadata_len u32 | key_len u32 | payload_len u64 | checksum u64 | metadata | key | payload
//! ```
//!
//! The checksum is the xxh3-64 hash of `metadata ‖ key ‖ payload`. Metadata and
//! payload are bincode-encoded; the key is stored as UTF-8 so that a record can
//! be told apart from one written for another key with the same file name. Any
//! mismatch while decoding means the record is corrupt.

use serde::{Serialize, de::DeserializeOwned};
use stratum_tier::EntryMetadata;
use xxhash_rust::xxh3::xxh3_64;

pub(crate) const MAGIC: [u8; 4] = *b"STRC";
pub(crate) const VERSION: u8 = 2;
pub(crate) const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 8 + 8;

// Metadata is a handful of fixed-size fields; anything larger is garbage.
const MAX_METADATA_LEN: u32 = 4096;

/// A record that cannot be decoded.
#[ohno::error]
#[display("corrupt cache record: {reason}")]
pub(crate) struct CorruptRecord {
    reason: &'static str,
}

/// A value or metadata record that cannot be encoded.
#[ohno::error]
#[display("cannot encode cache record")]
pub(crate) struct EncodeError {}

/// The fixed-size prefix of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) metadata_len: u32,
    pub(crate) key_len: u32,
    pub(crate) payload_len: u64,
    pub(crate) checksum: u64,
}

impl Header {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, CorruptRecord> {
        let header = bytes.get(..HEADER_LEN).ok_or_else(|| CorruptRecord::new("record is shorter than its header"))?;

        if header[..4] != MAGIC {
            return Err(CorruptRecord::new("unknown magic bytes"));
        }
        if header[4] != VERSION {
            return Err(CorruptRecord::new("unsupported record version"));
        }

        let metadata_len = u32::from_le_bytes(le_bytes(&header[5..9])?);
        let key_len = u32::from_le_bytes(le_bytes(&header[9..13])?);
        let payload_len = u64::from_le_bytes(le_bytes(&header[13..21])?);
        let checksum = u64::from_le_bytes(le_bytes(&header[21..29])?);

        if metadata_len == 0 || metadata_len > MAX_METADATA_LEN {
            return Err(CorruptRecord::new("implausible metadata length"));
        }
        if key_len == 0 {
            return Err(CorruptRecord::new("record has no key"));
        }

        Ok(Self {
            metadata_len,
            key_len,
            payload_len,
            checksum,
        })
    }

    /// Length of the whole record this header describes.
    pub(crate) fn record_len(&self) -> u64 {
        (HEADER_LEN as u64 + u64::from(self.metadata_len) + u64::from(self.key_len)).saturating_add(self.payload_len)
    }

    fn metadata_end(&self) -> usize {
        HEADER_LEN + self.metadata_len as usize
    }
}

/// Serializes a value into the payload section.
pub(crate) fn encode_payload<V: Serialize>(value: &V) -> Result<Vec<u8>, EncodeError> {
    bincode::serialize(value).map_err(EncodeError::caused_by)
}

/// Assembles a full record for `key` from metadata and an already serialized payload.
pub(crate) fn encode(metadata: &EntryMetadata, key: &str, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let metadata = bincode::serialize(metadata).map_err(EncodeError::caused_by)?;
    let metadata_len = u32::try_from(metadata.len()).map_err(EncodeError::caused_by)?;
    let key_len = u32::try_from(key.len()).map_err(EncodeError::caused_by)?;

    let mut hasher = xxhash_rust::xxh3::Xxh3::new();
    hasher.update(&metadata);
    hasher.update(key.as_bytes());
    hasher.update(payload);

    let mut record = Vec::with_capacity(HEADER_LEN + metadata.len() + key.len() + payload.len());
    record.extend_from_slice(&MAGIC);
    record.push(VERSION);
    record.extend_from_slice(&metadata_len.to_le_bytes());
    record.extend_from_slice(&key_len.to_le_bytes());
    record.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    record.extend_from_slice(&hasher.digest().to_le_bytes());
    record.extend_from_slice(&metadata);
    record.extend_from_slice(key.as_bytes());
    record.extend_from_slice(payload);
    Ok(record)
}

/// The verified sections of a record.
#[derive(Debug)]
pub(crate) struct Record<'a> {
    pub(crate) metadata: EntryMetadata,
    pub(crate) key: &'a str,
    pub(crate) payload: &'a [u8],
}

/// Verifies a full record and splits it into its sections.
pub(crate) fn decode(bytes: &[u8]) -> Result<Record<'_>, CorruptRecord> {
    let header = Header::decode(bytes)?;

    if bytes.len() as u64 != header.record_len() {
        return Err(CorruptRecord::new("record length does not match its header"));
    }

    let body = &bytes[HEADER_LEN..];
    if xxh3_64(body) != header.checksum {
        return Err(CorruptRecord::new("checksum mismatch"));
    }

    let (metadata, rest) = body.split_at(header.metadata_len as usize);
    let (key, payload) = rest.split_at(header.key_len as usize);

    let metadata = bincode::deserialize(metadata).map_err(|e| CorruptRecord::caused_by("undecodable metadata", e))?;
    let key = std::str::from_utf8(key).map_err(|e| CorruptRecord::caused_by("key is not UTF-8", e))?;
    Ok(Record { metadata, key, payload })
}

/// Decodes the metadata from a record prefix without verifying the payload.
///
/// `prefix` must hold at least the header and the metadata section.
pub(crate) fn decode_metadata(header: &Header, prefix: &[u8]) -> Result<EntryMetadata, CorruptRecord> {
    let metadata = prefix
        .get(HEADER_LEN..header.metadata_end())
        .ok_or_else(|| CorruptRecord::new("record is shorter than its metadata"))?;
    bincode::deserialize(metadata).map_err(|e| CorruptRecord::caused_by("undecodable metadata", e))
}

/// Deserializes a payload produced by [`encode_payload`].
pub(crate) fn decode_payload<V: DeserializeOwned>(payload: &[u8]) -> Result<V, CorruptRecord> {
    bincode::deserialize(payload).map_err(|e| CorruptRecord::caused_by("undecodable payload", e))
}

fn le_bytes<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CorruptRecord> {
    bytes.try_into().map_err(|e| CorruptRecord::caused_by("truncated header field", e))
}
