// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Common-string blocks and string occurrence encoding.
//!
//! Before anything is emitted, every string the call will write is handed
//! to the [`StringOptimizer`]. Distinct strings are sorted; walking them from
//! the largest down, a string that is a prefix of the last appended string
//! reuses its storage, anything else is appended to the current block. A
//! block is closed once appending would exceed the split size.
//!
//! Each occurrence is then written as a sign-folded length on the
//! `StrLength` stream:
//!
//! ```text
//! 0          null
//! +1         empty string
//! +(len + 1) string of len bytes; offset on StrOffset, block on StrSeg
//!            (only when there is more than one block)
//! -k         repeat of the k-th string emitted in this call (1-based)
//! ```
//!
//! Every first occurrence, including the empty string, is numbered so the
//! decoder can resolve repeats from its own list.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::collections::HashMap;

use crate::diff::{decode_int_sign, encode_int_sign};
use crate::error::{CodecError, Result};
use crate::streams::{StreamId, StreamReaders, StreamSet};

/// Default block split size in bytes.
pub const DEFAULT_SPLIT_SIZE: usize = i32::MAX as usize - 2;

/// Longest encodable string; `len + 1` must fit in a positive `i32`.
pub const MAX_STRING_LEN: usize = i32::MAX as usize - 1;

#[derive(Debug, Clone, Copy)]
enum Slot {
    /// Not yet emitted: location in the blocks.
    Fresh { block: u32, offset: u32 },
    /// Already emitted as the n-th string of the call.
    Emitted(u32),
}

/// Encode-side string table builder.
#[derive(Debug)]
pub struct StringOptimizer {
    split_size: usize,
    pending: Vec<String>,
    blocks: Vec<String>,
    slots: HashMap<String, Slot>,
    emitted: u32,
    stats: StringStats,
}

/// Sharing statistics gathered by [`StringOptimizer::optimize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringStats {
    /// Distinct strings.
    pub distinct: usize,
    /// Bytes in all common-string blocks.
    pub common_bytes: usize,
    /// Bytes not stored again because of exact repeats.
    pub saved_exact: usize,
    /// Bytes not stored because the string is a prefix of another.
    pub saved_prefix: usize,
}

impl Default for StringOptimizer {
    fn default() -> Self {
        Self::with_split_size(DEFAULT_SPLIT_SIZE)
    }
}

impl StringOptimizer {
    /// Optimizer that closes blocks at `split_size` bytes.
    pub fn with_split_size(split_size: usize) -> Self {
        Self {
            split_size: split_size.max(1),
            pending: Vec::new(),
            blocks: Vec::new(),
            slots: HashMap::new(),
            emitted: 0,
            stats: StringStats::default(),
        }
    }

    /// Registers a string that will be written later.
    pub fn add(&mut self, s: &str) -> Result<()> {
        if s.len() > MAX_STRING_LEN {
            return Err(CodecError::OversizedValue { len: s.len() });
        }
        self.pending.push(s.to_owned());
        Ok(())
    }

    /// Builds the common-string blocks from every registered string.
    pub fn optimize(&mut self) -> Result<()> {
        let mut strings = std::mem::take(&mut self.pending);
        let total: usize = strings.iter().map(String::len).sum();
        strings.sort_unstable();
        strings.dedup();
        self.stats.distinct = strings.len();
        self.stats.saved_exact = total - strings.iter().map(String::len).sum::<usize>();

        let mut current = String::new();
        // Last appended string and its offset; always in `current`.
        let mut previous: Option<(usize, u32)> = None;
        for (i, s) in strings.iter().enumerate().rev() {
            if let Some((prev_index, offset)) = previous {
                if strings[prev_index].starts_with(s.as_str()) {
                    self.stats.saved_prefix += s.len();
                    let block = self.block_index(self.blocks.len())?;
                    self.slots.insert(s.clone(), Slot::Fresh { block, offset });
                    continue;
                }
            }
            if !current.is_empty() && current.len() + s.len() > self.split_size {
                self.blocks.push(std::mem::take(&mut current));
            }
            let offset = u32::try_from(current.len())
                .map_err(|_| CodecError::OversizedValue { len: current.len() })?;
            let block = self.block_index(self.blocks.len())?;
            current.push_str(s);
            self.slots.insert(s.clone(), Slot::Fresh { block, offset });
            previous = Some((i, offset));
        }
        self.blocks.push(current);
        self.stats.common_bytes = self.blocks.iter().map(String::len).sum();
        Ok(())
    }

    fn block_index(&self, index: usize) -> Result<u32> {
        u32::try_from(index).map_err(|_| CodecError::OversizedValue { len: index })
    }

    /// Common-string blocks; valid after [`optimize`](Self::optimize).
    pub fn blocks(&self) -> &[String] {
        &self.blocks
    }

    /// Sharing statistics.
    pub fn stats(&self) -> StringStats {
        self.stats
    }

    /// Writes the block table to `StrChars`.
    pub(crate) fn write_table(&self, streams: &mut StreamSet) -> Result<()> {
        streams.write_u32(StreamId::StrChars, self.block_index(self.blocks.len())?);
        for block in &self.blocks {
            let len = u32::try_from(block.len() + 1)
                .map_err(|_| CodecError::OversizedValue { len: block.len() })?;
            streams.write_u32(StreamId::StrChars, len);
            streams.write_bytes(StreamId::StrChars, block.as_bytes());
        }
        Ok(())
    }

    /// Writes one occurrence.
    pub(crate) fn write(&mut self, streams: &mut StreamSet, s: Option<&str>) -> Result<()> {
        let Some(s) = s else {
            streams.write_u32(StreamId::StrLength, 0);
            return Ok(());
        };
        if s.len() > MAX_STRING_LEN {
            return Err(CodecError::OversizedValue { len: s.len() });
        }
        let slot = self.slots.get_mut(s).ok_or_else(|| {
            CodecError::integrity(format!("string {s:?} was not registered before emission"))
        })?;
        match *slot {
            Slot::Emitted(n) => {
                streams.write_u32(StreamId::StrLength, encode_int_sign(-(n as i32)));
            }
            Slot::Fresh { block, offset } => {
                self.emitted += 1;
                *slot = Slot::Emitted(self.emitted);
                if s.is_empty() {
                    streams.write_u32(StreamId::StrLength, encode_int_sign(1));
                    return Ok(());
                }
                // len + 1 <= i32::MAX by the check above.
                let len_code = (s.len() + 1) as i32;
                streams.write_u32(StreamId::StrOffset, offset);
                streams.write_u32(StreamId::StrLength, encode_int_sign(len_code));
                if self.blocks.len() > 1 {
                    streams.write_u32(StreamId::StrSeg, block);
                }
            }
        }
        Ok(())
    }
}

/// Decode-side string table.
#[derive(Debug, Default)]
pub struct StringTable {
    blocks: Vec<String>,
    decoded: Vec<String>,
}

impl StringTable {
    /// Reads the block table from `StrChars`.
    pub(crate) fn read(streams: &mut StreamReaders<'_>) -> Result<Self> {
        let bound = streams.total_uncompressed();
        let chars = streams.cursor(StreamId::StrChars)?;
        let count = chars.read_u32()? as usize;
        if count > bound {
            return Err(CodecError::corrupt(
                "str_chars",
                format!("{count} blocks declared"),
            ));
        }
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let len = chars.read_u32()? as usize;
            let Some(len) = len.checked_sub(1) else {
                return Err(CodecError::corrupt("str_chars", "null common-string block"));
            };
            let bytes = chars.read_bytes(len)?;
            let block = std::str::from_utf8(bytes)
                .map_err(|e| CodecError::corrupt("str_chars", e.to_string()))?;
            blocks.push(block.to_owned());
        }
        Ok(Self {
            blocks,
            decoded: Vec::new(),
        })
    }

    /// Number of common-string blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Reads one occurrence.
    pub(crate) fn read_string(&mut self, streams: &mut StreamReaders<'_>) -> Result<Option<String>> {
        let code = decode_int_sign(streams.read_u32(StreamId::StrLength)?);
        match code {
            0 => Ok(None),
            1 => {
                self.decoded.push(String::new());
                Ok(Some(String::new()))
            }
            n if n < 0 => {
                let k = n.unsigned_abs() as usize;
                self.decoded
                    .get(k - 1)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| {
                        CodecError::corrupt(
                            "str_length",
                            format!("back-reference {k} past {} strings", self.decoded.len()),
                        )
                    })
            }
            n => {
                let len = n.unsigned_abs() as usize - 1;
                let offset = streams.read_u32(StreamId::StrOffset)? as usize;
                let block = if self.blocks.len() > 1 {
                    streams.read_u32(StreamId::StrSeg)? as usize
                } else {
                    0
                };
                let s = self
                    .blocks
                    .get(block)
                    .and_then(|b| b.get(offset..offset.checked_add(len)?))
                    .ok_or_else(|| {
                        CodecError::corrupt(
                            "str_offset",
                            format!("string {offset}+{len} outside block {block}"),
                        )
                    })?
                    .to_owned();
                self.decoded.push(s.clone());
                Ok(Some(s))
            }
        }
    }
}
