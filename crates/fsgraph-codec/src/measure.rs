// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Encode-side statistics.

use std::time::Duration;

use crate::streams::{StreamId, StreamStats};
use crate::strings::StringStats;

/// Statistics of one serialize call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Measurements {
    /// Byte counts of every written stream, in wire order.
    pub streams: Vec<StreamStats>,
    /// Records written by the main walk.
    pub records: usize,
    /// String sharing.
    pub strings: StringStats,
    /// Diff-encoded values written as their magnitude.
    pub absolute_encodings: u64,
    /// Diff-encoded values written as a delta.
    pub delta_encodings: u64,
    /// Total output length, header included.
    pub total_bytes: usize,
    /// Wall time of the call.
    pub elapsed: Duration,
}

impl Measurements {
    /// Stats of one stream, if it was written.
    pub fn stream(&self, id: StreamId) -> Option<&StreamStats> {
        self.streams.iter().find(|s| s.stream == id)
    }

    /// Sum of uncompressed stream lengths.
    pub fn uncompressed_total(&self) -> usize {
        self.streams.iter().map(|s| s.uncompressed).sum()
    }

    /// Sum of compressed stream lengths.
    pub fn compressed_total(&self) -> usize {
        self.streams.iter().map(|s| s.compressed).sum()
    }
}
