// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixed stream header.
//!
//! Wire format (Little-Endian):
//! ```text
//! offset size  field
//! 0      4     magic = ASCII "FSG6"
//! 4      2     version = u16 LE (1)
//! 6      1     flags
//! 7      1     compression = 0 stored, 1 zstd
//!
//! if SCHEMA_INCLUDED:
//! 8      4     schema_len = u32 LE
//! 12     N     schema (CBOR)
//! ```
//!
//! Flags (u8):
//! - bit0: DELTA
//! - bit1: SCHEMA_INCLUDED
//! - others reserved, must be zero

use crate::error::{CodecError, Result};

/// Format family tag.
pub const FORMAT_MAGIC: [u8; 4] = *b"FSG6";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(pub u8);

impl HeaderFlags {
    /// Flag: the stream is a delta against a mark.
    pub const DELTA: u8 = 1 << 0;
    /// Flag: a schema blob follows the header.
    pub const SCHEMA_INCLUDED: u8 = 1 << 1;

    const KNOWN: u8 = Self::DELTA | Self::SCHEMA_INCLUDED;

    /// Check if DELTA is set.
    #[inline]
    pub const fn is_delta(self) -> bool {
        self.0 & Self::DELTA != 0
    }

    /// Check if SCHEMA_INCLUDED is set.
    #[inline]
    pub const fn schema_included(self) -> bool {
        self.0 & Self::SCHEMA_INCLUDED != 0
    }
}

/// How stream payloads are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Raw bytes.
    Stored,
    /// zstd frames.
    Zstd,
}

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version.
    pub version: u16,
    /// Flags (see [`HeaderFlags`]).
    pub flags: HeaderFlags,
    /// Payload compression.
    pub compression: Compression,
}

impl Header {
    /// Header for a new stream.
    pub fn new(delta: bool, schema_included: bool, compression: Compression) -> Self {
        let mut bits = 0;
        if delta {
            bits |= HeaderFlags::DELTA;
        }
        if schema_included {
            bits |= HeaderFlags::SCHEMA_INCLUDED;
        }
        Self {
            version: FORMAT_VERSION,
            flags: HeaderFlags(bits),
            compression,
        }
    }

    /// Encode header to its fixed-size form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&FORMAT_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = self.flags.0;
        buf[7] = match self.compression {
            Compression::Stored => 0,
            Compression::Zstd => 1,
        };
        buf
    }

    /// Parse header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(fixed) = bytes.get(..HEADER_SIZE) else {
            return Err(CodecError::corrupt(
                "header",
                format!("need {HEADER_SIZE} bytes, got {}", bytes.len()),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&fixed[0..4]);
        if magic != FORMAT_MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let version = u16::from_le_bytes([fixed[4], fixed[5]]);
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let flags = HeaderFlags(fixed[6]);
        if flags.0 & !HeaderFlags::KNOWN != 0 {
            return Err(CodecError::corrupt(
                "header",
                format!("reserved flag bits set: {:#04x}", flags.0),
            ));
        }
        let compression = match fixed[7] {
            0 => Compression::Stored,
            1 => Compression::Zstd,
            other => {
                return Err(CodecError::corrupt(
                    "header",
                    format!("unknown compression code {other}"),
                ))
            }
        };
        Ok(Self {
            version,
            flags,
            compression,
        })
    }
}
