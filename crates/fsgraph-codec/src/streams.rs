// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-kind byte streams and their compressed container.
//!
//! Layout of the stream section (Little-Endian):
//! ```text
//! 4      stream_count = u32
//! 9 * N  table entries: kind = u8, compressed_len = u32, uncompressed_len = u32
//! ...    payloads, concatenated in table order
//! ```
//!
//! Only streams that received at least one byte appear in the table.
#![allow(clippy::cast_possible_truncation)]

use std::io::Read;

use tracing::trace;

use crate::config::{CompressLevel, CompressStrategy};
use crate::error::{CodecError, Result};
use crate::varint;

/// Identifier of one physical stream. The discriminant is the wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StreamId {
    /// Array lengths.
    ArrayLength = 0,
    /// Sequence numbers of referenced records.
    HeapRef = 1,
    /// Int values.
    Int = 2,
    /// Byte and boolean values.
    Byte = 3,
    /// Short values.
    Short = 4,
    /// Record type codes.
    TypeCode = 5,
    /// String offsets into a common-string block.
    StrOffset = 6,
    /// Sign-folded string lengths and back-references.
    StrLength = 7,
    /// High halves of long values.
    LongHigh = 8,
    /// Low halves of long values.
    LongLow = 9,
    /// Float mantissa plus sign.
    FloatMantissaSign = 10,
    /// Float exponent.
    FloatExponent = 11,
    /// Double mantissa plus sign.
    DoubleMantissaSign = 12,
    /// Double exponent.
    DoubleExponent = 13,
    /// Index membership deltas and the modified-record log.
    FsIndexes = 14,
    /// Common-string blocks.
    StrChars = 15,
    /// Structural counts.
    Control = 16,
    /// Common-string block indices.
    StrSeg = 17,
}

impl StreamId {
    /// Number of streams.
    pub const COUNT: usize = 18;

    /// Every stream in wire order.
    pub const ALL: [StreamId; Self::COUNT] = [
        Self::ArrayLength,
        Self::HeapRef,
        Self::Int,
        Self::Byte,
        Self::Short,
        Self::TypeCode,
        Self::StrOffset,
        Self::StrLength,
        Self::LongHigh,
        Self::LongLow,
        Self::FloatMantissaSign,
        Self::FloatExponent,
        Self::DoubleMantissaSign,
        Self::DoubleExponent,
        Self::FsIndexes,
        Self::StrChars,
        Self::Control,
        Self::StrSeg,
    ];

    /// Stream for a wire byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.get(usize::from(byte)).copied()
    }

    /// Stable lowercase name, used in errors and measurements.
    pub fn name(self) -> &'static str {
        match self {
            Self::ArrayLength => "array_length",
            Self::HeapRef => "heap_ref",
            Self::Int => "int",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::TypeCode => "type_code",
            Self::StrOffset => "str_offset",
            Self::StrLength => "str_length",
            Self::LongHigh => "long_high",
            Self::LongLow => "long_low",
            Self::FloatMantissaSign => "float_mantissa_sign",
            Self::FloatExponent => "float_exponent",
            Self::DoubleMantissaSign => "double_mantissa_sign",
            Self::DoubleExponent => "double_exponent",
            Self::FsIndexes => "fs_indexes",
            Self::StrChars => "str_chars",
            Self::Control => "control",
            Self::StrSeg => "str_seg",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Size of one table entry.
const ENTRY_SIZE: usize = 9;

/// Byte counts of one written stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Stream.
    pub stream: StreamId,
    /// Bytes before compression.
    pub uncompressed: usize,
    /// Bytes on the wire.
    pub compressed: usize,
}

/// Encode-side stream buffers, created on first write.
#[derive(Debug, Default)]
pub(crate) struct StreamSet {
    buffers: [Option<Vec<u8>>; StreamId::COUNT],
}

impl StreamSet {
    fn buf(&mut self, id: StreamId) -> &mut Vec<u8> {
        self.buffers[id.slot()].get_or_insert_with(Vec::new)
    }

    pub(crate) fn write_u32(&mut self, id: StreamId, value: u32) {
        varint::write_u32(self.buf(id), value);
    }

    pub(crate) fn write_u64(&mut self, id: StreamId, value: u64) {
        varint::write_u64(self.buf(id), value);
    }

    pub(crate) fn write_u8(&mut self, id: StreamId, value: u8) {
        self.buf(id).push(value);
    }

    pub(crate) fn write_bytes(&mut self, id: StreamId, bytes: &[u8]) {
        self.buf(id).extend_from_slice(bytes);
    }

    /// Compresses every non-empty stream, appending the table and payloads
    /// to `out`.
    pub(crate) fn finish(
        self,
        level: CompressLevel,
        strategy: CompressStrategy,
        out: &mut Vec<u8>,
    ) -> Result<Vec<StreamStats>> {
        let mut payloads = Vec::new();
        for (id, buffer) in StreamId::ALL.into_iter().zip(self.buffers) {
            let Some(buffer) = buffer.filter(|b| !b.is_empty()) else {
                continue;
            };
            let compressed = compress(&buffer, level, strategy)?;
            trace!(
                stream = id.name(),
                uncompressed = buffer.len(),
                compressed = compressed.len(),
                "stream compressed"
            );
            payloads.push((id, buffer.len(), compressed));
        }
        out.reserve(4 + payloads.len() * ENTRY_SIZE);
        out.extend_from_slice(&(payloads.len() as u32).to_le_bytes());
        for (id, uncompressed, compressed) in &payloads {
            out.push(*id as u8);
            out.extend_from_slice(&wire_len(compressed.len())?.to_le_bytes());
            out.extend_from_slice(&wire_len(*uncompressed)?.to_le_bytes());
        }
        let mut stats = Vec::with_capacity(payloads.len());
        for (stream, uncompressed, compressed) in payloads {
            out.extend_from_slice(&compressed);
            stats.push(StreamStats {
                stream,
                uncompressed,
                compressed: compressed.len(),
            });
        }
        Ok(stats)
    }
}

fn wire_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| CodecError::OversizedValue { len })
}

fn compress(data: &[u8], level: CompressLevel, strategy: CompressStrategy) -> Result<Vec<u8>> {
    let Some(zstd_level) = level.zstd_level() else {
        return Ok(data.to_vec());
    };
    let mut compressor = zstd::bulk::Compressor::new(zstd_level)?;
    if let Some(strategy) = strategy.zstd_strategy() {
        compressor.set_parameter(zstd::stream::raw::CParameter::Strategy(strategy))?;
    }
    Ok(compressor.compress(data)?)
}

/// Decode-side view of one stream.
#[derive(Debug)]
pub(crate) struct ByteCursor {
    id: StreamId,
    data: Vec<u8>,
    pos: usize,
}

impl ByteCursor {
    fn corrupt(&self, reason: impl Into<String>) -> CodecError {
        CodecError::corrupt(self.id.name(), reason)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        varint::read_u32(&self.data, &mut self.pos).map_err(|e| self.corrupt(e.to_string()))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        varint::read_u64(&self.data, &mut self.pos).map_err(|e| self.corrupt(e.to_string()))
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.corrupt("unexpected end of stream"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.corrupt(format!("{len} bytes requested past end of stream")))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry<'a> {
    payload: &'a [u8],
    uncompressed: usize,
}

/// Decode-side stream table; each stream is inflated on first access.
#[derive(Debug)]
pub(crate) struct StreamReaders<'a> {
    entries: [Option<Entry<'a>>; StreamId::COUNT],
    cursors: [Option<ByteCursor>; StreamId::COUNT],
    compressed: bool,
    total_uncompressed: usize,
}

fn le_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| CodecError::corrupt("stream table", "truncated table"))
}

impl<'a> StreamReaders<'a> {
    /// Parses the table and slices the payloads out of `bytes`, which must
    /// end exactly where the last payload ends.
    pub(crate) fn parse(bytes: &'a [u8], compressed: bool) -> Result<Self> {
        let count = le_u32(bytes, 0)? as usize;
        if count > StreamId::COUNT {
            return Err(CodecError::corrupt(
                "stream table",
                format!("{count} streams declared, at most {} exist", StreamId::COUNT),
            ));
        }
        let mut entries: [Option<Entry<'a>>; StreamId::COUNT] = Default::default();
        let mut offset = 4 + count * ENTRY_SIZE;
        let mut total_uncompressed = 0usize;
        for i in 0..count {
            let at = 4 + i * ENTRY_SIZE;
            let kind = *bytes
                .get(at)
                .ok_or_else(|| CodecError::corrupt("stream table", "truncated table"))?;
            let id = StreamId::from_u8(kind).ok_or_else(|| {
                CodecError::corrupt("stream table", format!("unknown stream kind {kind}"))
            })?;
            let compressed_len = le_u32(bytes, at + 1)? as usize;
            let uncompressed = le_u32(bytes, at + 5)? as usize;
            if !compressed && compressed_len != uncompressed {
                return Err(CodecError::corrupt(
                    id.name(),
                    "stored stream with differing lengths",
                ));
            }
            let payload = offset
                .checked_add(compressed_len)
                .and_then(|end| bytes.get(offset..end))
                .ok_or_else(|| CodecError::corrupt(id.name(), "payload extends past input"))?;
            let slot = &mut entries[id.slot()];
            if slot.is_some() {
                return Err(CodecError::corrupt(id.name(), "stream listed twice"));
            }
            *slot = Some(Entry {
                payload,
                uncompressed,
            });
            offset += compressed_len;
            total_uncompressed = total_uncompressed.saturating_add(uncompressed);
        }
        if offset != bytes.len() {
            return Err(CodecError::corrupt(
                "stream table",
                format!("{} trailing bytes after payloads", bytes.len().saturating_sub(offset)),
            ));
        }
        Ok(Self {
            entries,
            cursors: Default::default(),
            compressed,
            total_uncompressed,
        })
    }

    /// Sum of all declared uncompressed lengths; an upper bound on the
    /// number of values any single count in the input can describe.
    pub(crate) fn total_uncompressed(&self) -> usize {
        self.total_uncompressed
    }

    fn inflate(&self, id: StreamId) -> Result<ByteCursor> {
        let data = match self.entries[id.slot()] {
            None => Vec::new(),
            Some(entry) if !self.compressed => entry.payload.to_vec(),
            Some(entry) => {
                let decoder = zstd::stream::read::Decoder::new(entry.payload)
                    .map_err(|e| CodecError::corrupt(id.name(), e.to_string()))?;
                let mut data = Vec::new();
                decoder
                    .take(entry.uncompressed as u64 + 1)
                    .read_to_end(&mut data)
                    .map_err(|e| CodecError::corrupt(id.name(), e.to_string()))?;
                if data.len() != entry.uncompressed {
                    return Err(CodecError::corrupt(
                        id.name(),
                        format!(
                            "inflated to {} bytes, table says {}",
                            data.len(),
                            entry.uncompressed
                        ),
                    ));
                }
                data
            }
        };
        trace!(stream = id.name(), len = data.len(), "stream inflated");
        Ok(ByteCursor { id, data, pos: 0 })
    }

    /// Cursor over stream `id`, inflating it on first use.
    pub(crate) fn cursor(&mut self, id: StreamId) -> Result<&mut ByteCursor> {
        if self.cursors[id.slot()].is_none() {
            let cursor = self.inflate(id)?;
            self.cursors[id.slot()] = Some(cursor);
        }
        self.cursors[id.slot()]
            .as_mut()
            .ok_or_else(|| CodecError::corrupt(id.name(), "stream unavailable"))
    }

    pub(crate) fn read_u32(&mut self, id: StreamId) -> Result<u32> {
        self.cursor(id)?.read_u32()
    }

    pub(crate) fn read_u64(&mut self, id: StreamId) -> Result<u64> {
        self.cursor(id)?.read_u64()
    }

    pub(crate) fn read_u8(&mut self, id: StreamId) -> Result<u8> {
        self.cursor(id)?.read_u8()
    }
}
