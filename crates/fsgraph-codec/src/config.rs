// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Codec options and their JSON configuration file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compression level applied to every stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressLevel {
    /// Streams are stored uncompressed.
    None,
    /// Fastest compression.
    Fast,
    /// Balanced compression.
    #[default]
    Default,
    /// Smallest output.
    Best,
}

impl CompressLevel {
    /// zstd level, or `None` when streams are stored.
    pub fn zstd_level(self) -> Option<i32> {
        match self {
            Self::None => None,
            Self::Fast => Some(1),
            Self::Default => Some(3),
            Self::Best => Some(19),
        }
    }
}

/// Match-finding strategy of the compressor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressStrategy {
    /// Whatever the level implies.
    #[default]
    Default,
    /// Single-probe hashing.
    Fast,
    /// Lazy matching.
    Lazy,
    /// Optimal parsing.
    Optimal,
}

impl CompressStrategy {
    pub(crate) fn zstd_strategy(self) -> Option<zstd::zstd_safe::Strategy> {
        use zstd::zstd_safe::Strategy;
        match self {
            Self::Default => None,
            Self::Fast => Some(Strategy::ZSTD_fast),
            Self::Lazy => Some(Strategy::ZSTD_lazy2),
            Self::Optimal => Some(Strategy::ZSTD_btultra2),
        }
    }
}

/// Whether a delta may modify records that existed before the mark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowPreexisting {
    /// Modifications of preexisting records are applied.
    #[default]
    Allow,
    /// A delta that modifies a preexisting record is rejected.
    Disallow,
}

/// Options of one serialize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializeOptions {
    /// Compression level.
    pub level: CompressLevel,
    /// Compression strategy.
    pub strategy: CompressStrategy,
    /// Embed the schema after the header.
    pub include_schema: bool,
    /// Collect [`Measurements`](crate::Measurements).
    pub measure: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            level: CompressLevel::Default,
            strategy: CompressStrategy::Default,
            include_schema: false,
            measure: false,
        }
    }
}

/// Options of one deserialize call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeserializeOptions {
    /// Policy for deltas touching preexisting records.
    pub allow_preexisting: AllowPreexisting,
}

/// Error type for config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persistent codec configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Defaults for serialize calls.
    pub serialize: SerializeOptions,
    /// Defaults for deserialize calls.
    pub deserialize: DeserializeOptions,
}

impl CodecConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Pretty-printed JSON form.
    pub fn to_json_vec(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Loads the config at `path`. Returns defaults if the file is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_json_slice(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the config to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json_vec()?)?;
        Ok(())
    }
}
