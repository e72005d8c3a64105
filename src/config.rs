//! Filter configuration.

use crate::backend::{BackendConfig, CompressorFactory, Encoder};
use crate::error::ConfigError;
use crate::runtime::Runtime;
use crate::stats::{CompressorStats, StatsStore};
use http::HeaderValue;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Default minimum `Content-Length` worth compressing.
pub const DEFAULT_MIN_CONTENT_LENGTH: u64 = 30;

/// Default stats prefix.
pub const DEFAULT_STATS_PREFIX: &str = "http.compressor";

/// Default runtime flag gating the filter.
pub const DEFAULT_RUNTIME_KEY: &str = "compressor.enabled";

/// Operator-facing compressor settings, as deserialized from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CompressorConfig {
    /// Prefix for the compressor's counters.
    #[serde(default = "default_stats_prefix")]
    pub stats_prefix: String,

    /// Responses with a known `Content-Length` below this are passed through.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: u64,

    /// Media types eligible for compression. `None` allows every type.
    #[serde(default)]
    pub content_types: Option<Vec<String>>,

    /// Runtime flag polled for every stream.
    #[serde(default = "default_runtime_key")]
    pub runtime_key: String,

    /// Value used when the runtime flag is unset.
    #[serde(default = "default_enabled")]
    pub enabled_by_default: bool,

    /// Flush the encoder after every body chunk so downstream sees output
    /// as soon as it is produced.
    #[serde(default = "default_flush_each_chunk")]
    pub flush_each_chunk: bool,

    /// Compression backend.
    pub backend: BackendConfig,
}

fn default_stats_prefix() -> String {
    DEFAULT_STATS_PREFIX.to_string()
}

fn default_min_content_length() -> u64 {
    DEFAULT_MIN_CONTENT_LENGTH
}

fn default_runtime_key() -> String {
    DEFAULT_RUNTIME_KEY.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_flush_each_chunk() -> bool {
    true
}

impl CompressorConfig {
    /// Creates a configuration with default settings for `backend`.
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            stats_prefix: default_stats_prefix(),
            min_content_length: default_min_content_length(),
            content_types: None,
            runtime_key: default_runtime_key(),
            enabled_by_default: default_enabled(),
            flush_each_chunk: default_flush_each_chunk(),
            backend,
        }
    }
}

/// Which response media types may be compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentTypePolicy {
    /// Every media type, and responses without one.
    Any,
    /// Only the listed types. Entries are lowercase `type/subtype` or `type/*`.
    AllowList(HashSet<String>),
}

impl ContentTypePolicy {
    /// Builds a policy from configured entries; `None` or a `*/*` entry allows
    /// everything.
    pub fn from_entries(entries: Option<&[String]>) -> Result<Self, ConfigError> {
        let Some(entries) = entries else {
            return Ok(Self::Any);
        };

        let mut allowed = HashSet::with_capacity(entries.len());
        for entry in entries {
            let media_type = entry.trim().to_ascii_lowercase();
            if media_type == "*/*" {
                return Ok(Self::Any);
            }
            if !is_valid_media_type(&media_type) {
                return Err(ConfigError::ContentType(entry.clone()));
            }
            allowed.insert(media_type);
        }
        Ok(Self::AllowList(allowed))
    }

    /// Returns whether a `Content-Type` header value is eligible.
    pub fn allows(&self, content_type: &str) -> bool {
        let Self::AllowList(allowed) = self else {
            return true;
        };

        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if allowed.contains(&media_type) {
            return true;
        }

        media_type
            .split_once('/')
            .is_some_and(|(top, _)| allowed.contains(&format!("{top}/*")))
    }
}

fn is_valid_media_type(media_type: &str) -> bool {
    let Some((top, sub)) = media_type.split_once('/') else {
        return false;
    };
    let is_token = |s: &str| {
        !s.is_empty()
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b))
    };
    is_token(top) && (sub == "*" || is_token(sub))
}

/// Immutable, validated configuration shared by every stream of a filter.
pub struct FilterConfig {
    stats_prefix: String,
    content_types: ContentTypePolicy,
    min_content_length: u64,
    runtime_key: String,
    enabled_by_default: bool,
    flush_each_chunk: bool,
    content_encoding: HeaderValue,
    factory: Arc<dyn CompressorFactory>,
    runtime: Arc<dyn Runtime>,
    stats: CompressorStats,
}

impl FilterConfig {
    /// Validates `config`, builds its backend and resolves its counters.
    pub fn new(
        config: &CompressorConfig,
        stats: &StatsStore,
        runtime: Arc<dyn Runtime>,
    ) -> Result<Self, ConfigError> {
        let factory = config.backend.build()?;
        Self::with_factory(config, factory, stats, runtime)
    }

    /// Like [`FilterConfig::new`], but uses `factory` instead of building
    /// `config.backend`.
    pub fn with_factory(
        config: &CompressorConfig,
        factory: Arc<dyn CompressorFactory>,
        stats: &StatsStore,
        runtime: Arc<dyn Runtime>,
    ) -> Result<Self, ConfigError> {
        if config.stats_prefix.trim_matches('.').is_empty() {
            return Err(ConfigError::EmptyStatsPrefix);
        }
        if config.runtime_key.is_empty() {
            return Err(ConfigError::EmptyRuntimeKey);
        }

        let content_types = ContentTypePolicy::from_entries(config.content_types.as_deref())?;
        let content_encoding = HeaderValue::from_str(factory.content_encoding())
            .map_err(|_| ConfigError::EncodingToken(factory.content_encoding().to_string()))?;
        let stats = CompressorStats::new(stats, &config.stats_prefix, factory.stats_token());

        tracing::debug!(
            encoding = factory.content_encoding(),
            stats_prefix = %config.stats_prefix,
            min_content_length = config.min_content_length,
            "compressor filter configured"
        );

        Ok(Self {
            stats_prefix: config.stats_prefix.clone(),
            content_types,
            min_content_length: config.min_content_length,
            runtime_key: config.runtime_key.clone(),
            enabled_by_default: config.enabled_by_default,
            flush_each_chunk: config.flush_each_chunk,
            content_encoding,
            factory,
            runtime,
            stats,
        })
    }

    /// Whether the runtime flag currently enables compression.
    pub fn enabled(&self) -> bool {
        self.runtime
            .feature_enabled(&self.runtime_key, self.enabled_by_default)
    }

    /// The `Content-Encoding` token of the bound backend.
    pub fn content_encoding(&self) -> &str {
        self.factory.content_encoding()
    }

    pub(crate) fn content_encoding_value(&self) -> &HeaderValue {
        &self.content_encoding
    }

    /// The content type policy.
    pub fn content_types(&self) -> &ContentTypePolicy {
        &self.content_types
    }

    /// The minimum known length worth compressing.
    pub fn min_content_length(&self) -> u64 {
        self.min_content_length
    }

    /// Whether every chunk is flushed through the encoder.
    pub fn flush_each_chunk(&self) -> bool {
        self.flush_each_chunk
    }

    /// The compressor's counters.
    pub fn stats(&self) -> &CompressorStats {
        &self.stats
    }

    pub(crate) fn create_encoder(&self) -> io::Result<Box<dyn Encoder>> {
        self.factory.create_encoder()
    }
}

impl fmt::Debug for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterConfig")
            .field("stats_prefix", &self.stats_prefix)
            .field("content_types", &self.content_types)
            .field("min_content_length", &self.min_content_length)
            .field("runtime_key", &self.runtime_key)
            .field("enabled_by_default", &self.enabled_by_default)
            .field("flush_each_chunk", &self.flush_each_chunk)
            .field("content_encoding", &self.content_encoding)
            .finish_non_exhaustive()
    }
}
