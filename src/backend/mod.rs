//! Compressor backends.
//!
//! A backend is a [`CompressorFactory`] that hands out one [`Encoder`] per
//! compressed stream. The filter only talks to these two traits, so a new
//! codec plugs in by implementing them and adding a [`BackendConfig`]
//! variant.

use crate::codec::FlushMode;
use crate::error::ConfigError;
use bytes::BytesMut;
use serde::Deserialize;
use std::io;
use std::sync::Arc;

#[cfg(feature = "gzip")]
pub mod gzip;
#[cfg(feature = "zstd")]
pub mod zstd;

/// Size of the scratch buffer encoders write into before copying out.
pub(crate) const OUTPUT_CHUNK_SIZE: usize = 4096;

/// A stateful, incremental encoder owned by a single stream.
pub trait Encoder: Send {
    /// Consumes all of `input` and appends whatever the codec produced to
    /// `output`, draining internal state as far as `mode` requires.
    fn encode(&mut self, input: &[u8], mode: FlushMode, output: &mut BytesMut) -> io::Result<()>;
}

/// Builds encoders for one configured codec.
///
/// Factories are immutable after construction and shared by every stream of
/// a filter chain.
pub trait CompressorFactory: Send + Sync {
    /// Creates a fresh encoder for a new stream.
    fn create_encoder(&self) -> io::Result<Box<dyn Encoder>>;

    /// The `Content-Encoding` token this backend produces and negotiates.
    fn content_encoding(&self) -> &str;

    /// The stats path segment for this backend's counters.
    fn stats_token(&self) -> &str;
}

/// Backend selection as it appears in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// DEFLATE family (gzip or zlib framing).
    Gzip(GzipSettings),
    /// Zstandard frames.
    Zstd(ZstdSettings),
}

impl BackendConfig {
    /// Validates the settings and builds the matching factory.
    pub fn build(&self) -> Result<Arc<dyn CompressorFactory>, ConfigError> {
        match self {
            #[cfg(feature = "gzip")]
            BackendConfig::Gzip(settings) => Ok(Arc::new(self::gzip::GzipCompressorFactory::new(
                settings.clone(),
            )?)),
            #[cfg(not(feature = "gzip"))]
            BackendConfig::Gzip(_) => Err(ConfigError::BackendUnavailable("gzip")),
            #[cfg(feature = "zstd")]
            BackendConfig::Zstd(settings) => Ok(Arc::new(
                self::zstd::ZstdCompressorFactory::from_settings(settings)?,
            )),
            #[cfg(not(feature = "zstd"))]
            BackendConfig::Zstd(_) => Err(ConfigError::BackendUnavailable("zstd")),
        }
    }
}

/// DEFLATE compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GzipLevel {
    /// Level 1.
    Fastest,
    /// zlib's default, level 6.
    #[default]
    Default,
    /// Level 9.
    Best,
}

/// DEFLATE matching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum GzipStrategy {
    #[default]
    Default,
    Filtered,
    HuffmanOnly,
    Rle,
    Fixed,
}

/// Framing around the DEFLATE stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GzipFormat {
    /// RFC 1952 framing, advertised as `gzip`.
    #[default]
    Gzip,
    /// RFC 1950 framing, advertised as `deflate`.
    Zlib,
}

/// Settings for the DEFLATE family backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GzipSettings {
    /// Compression level.
    pub level: GzipLevel,
    /// Matching strategy.
    pub strategy: GzipStrategy,
    /// Base two logarithm of the history window, 9 to 15.
    pub window_bits: u8,
    /// zlib internal state size, 1 to 9.
    pub memory_level: u8,
    /// Stream framing.
    pub format: GzipFormat,
}

impl Default for GzipSettings {
    fn default() -> Self {
        Self {
            level: GzipLevel::Default,
            strategy: GzipStrategy::Default,
            window_bits: 12,
            memory_level: 5,
            format: GzipFormat::Gzip,
        }
    }
}

impl GzipSettings {
    /// Checks window bits and memory level ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(9..=15).contains(&self.window_bits) {
            return Err(ConfigError::WindowBits(self.window_bits));
        }
        if !(1..=9).contains(&self.memory_level) {
            return Err(ConfigError::MemoryLevel(self.memory_level));
        }
        Ok(())
    }
}

/// Settings for the Zstandard backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZstdSettings {
    /// Compression level, 1 to 22.
    pub level: i32,
    /// Strategy tuning value; 0 keeps the library default, 1 to 9 select
    /// `ZSTD_fast` through `ZSTD_btultra2`.
    pub strategy: u32,
    /// Append a content checksum to every frame.
    pub enable_checksum: bool,
    /// Optional path to a pre-trained dictionary.
    pub dictionary: Option<std::path::PathBuf>,
}

impl Default for ZstdSettings {
    fn default() -> Self {
        Self {
            level: 3,
            strategy: 0,
            enable_checksum: false,
            dictionary: None,
        }
    }
}

impl ZstdSettings {
    /// Checks level and strategy ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=22).contains(&self.level) {
            return Err(ConfigError::ZstdLevel(self.level));
        }
        if self.strategy > 9 {
            return Err(ConfigError::ZstdStrategy(self.strategy));
        }
        Ok(())
    }
}
