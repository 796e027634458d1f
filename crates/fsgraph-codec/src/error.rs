// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Codec error taxonomy.

use fsgraph_store::StoreError;
use thiserror::Error;

use crate::header::FORMAT_MAGIC;

/// Errors raised by serialization and deserialization.
///
/// Every error aborts the whole call. On the decode side the target store
/// may already have been partially mutated.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The supplied mark is stale or was taken on another store.
    #[error("invalid or stale mark")]
    InvalidMark,
    /// A delta call was made without the sequence tables of its base call.
    #[error("delta (de)serialization requires the reuse info of the base call")]
    MissingReuseInfo,
    /// The input does not start with the format magic.
    #[error("bad magic: expected {FORMAT_MAGIC:?}, got {0:?}")]
    BadMagic([u8; 4]),
    /// The input was written by an unsupported format version.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),
    /// A type code, feature offset or embedded schema has no counterpart in
    /// the active schema.
    #[error("schema mismatch: {detail}")]
    SchemaMismatch {
        /// What did not match.
        detail: String,
    },
    /// Malformed varint, truncated or inconsistent stream, or a
    /// decompression failure.
    #[error("stream corruption in {stream}: {reason}")]
    StreamCorruption {
        /// Stream or section where the corruption was detected.
        stream: &'static str,
        /// What was wrong.
        reason: String,
    },
    /// A string too long to be distinguished from the null/empty sentinels.
    #[error("string of {len} bytes exceeds the encodable maximum")]
    OversizedValue {
        /// Byte length of the rejected string.
        len: usize,
    },
    /// A sequence number was never bound to a record by the end of decode.
    #[error("integrity violation: {detail}")]
    IntegrityViolation {
        /// What was unresolved.
        detail: String,
    },
    /// The delta modifies a preexisting record and the caller disallowed it.
    #[error("delta modifies preexisting record with sequence number {seq}")]
    PreexistingModificationRejected {
        /// Sequence number of the modified record.
        seq: u32,
    },
    /// The record store rejected an access.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// I/O failure on the output sink.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn corrupt(stream: &'static str, reason: impl Into<String>) -> Self {
        Self::StreamCorruption {
            stream,
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            detail: detail.into(),
        }
    }

    pub(crate) fn integrity(detail: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            detail: detail.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = CodecError> = std::result::Result<T, E>;
