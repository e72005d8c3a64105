//! Streaming response compression for an HTTP proxy.
//!
//! A [`CompressorFilter`] sits on one response stream. It decides from the
//! request's `Accept-Encoding` and the response headers whether to compress,
//! rewrites the headers when it does, and then transforms every body chunk
//! through an encoder produced by a pluggable [`CompressorFactory`]. Counters
//! under `<stats_prefix>.<encoding>.` record every decision and the byte
//! totals of each compressed stream.
//!
//! The filter can be driven directly by a proxy's filter chain, or through
//! the Tower adapter:
//!
//! ```ignore
//! use proxy_compressor::{CompressionLayer, CompressorConfig, FilterConfig, RuntimeFlags, StatsStore};
//! use proxy_compressor::backend::{BackendConfig, GzipSettings};
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//!
//! let stats = StatsStore::new();
//! let config = CompressorConfig::new(BackendConfig::Gzip(GzipSettings::default()));
//! let config = FilterConfig::new(&config, &stats, Arc::new(RuntimeFlags::new()))?;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new(Arc::new(config)))
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! A response is **not** compressed when:
//! - The request does not accept the configured encoding
//! - The runtime flag is switched off
//! - The response has no body
//! - `Content-Encoding` is already set
//! - `Content-Range` is present (range responses)
//! - `Cache-Control` carries `no-transform`
//! - `Content-Type` is outside the configured allow list
//! - `Content-Length` is below the minimum size (default: 30 bytes)
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to the backend's token
//! - `Content-Length` is removed (compressed size is unknown)

#![deny(missing_docs)]

pub mod backend;
mod body;
mod codec;
mod config;
mod error;
mod filter;
mod future;
mod layer;
mod runtime;
mod service;
mod stats;

pub use backend::{BackendConfig, CompressorFactory, Encoder};
pub use body::CompressionBody;
pub use codec::{FlushMode, accepts_encoding};
pub use config::{
    CompressorConfig, ContentTypePolicy, DEFAULT_MIN_CONTENT_LENGTH, DEFAULT_RUNTIME_KEY,
    DEFAULT_STATS_PREFIX, FilterConfig,
};
pub use error::{ConfigError, FilterError};
pub use filter::{CompressorFilter, FilterStatus, SkipReason};
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use runtime::{Runtime, RuntimeFlags};
pub use service::CompressionService;
pub use stats::{CompressorStats, Counter, StatsStore};
