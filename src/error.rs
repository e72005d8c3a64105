use std::io;
use std::path::PathBuf;

/// Errors raised while validating compressor configuration.
///
/// These surface when the filter configuration is built, before any
/// traffic reaches a [`CompressorFilter`](crate::CompressorFilter).
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("gzip window bits must be within 9..=15, got {0}")]
    WindowBits(u8),

    #[error("gzip memory level must be within 1..=9, got {0}")]
    MemoryLevel(u8),

    #[error("zstd compression level must be within 1..=22, got {0}")]
    ZstdLevel(i32),

    #[error("zstd strategy must be within 0..=9, got {0}")]
    ZstdStrategy(u32),

    #[error("invalid content type `{0}` in allow list")]
    ContentType(String),

    #[error("content encoding token `{0}` is not a valid header value")]
    EncodingToken(String),

    #[error("stats prefix must not be empty")]
    EmptyStatsPrefix,

    #[error("runtime key must not be empty")]
    EmptyRuntimeKey,

    #[error("failed to read zstd dictionary from {path}: {source}")]
    DictionaryFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("zstd dictionary must not be empty")]
    EmptyDictionary,

    #[error("compression backend `{0}` is not compiled in")]
    BackendUnavailable(&'static str),
}

/// Errors that terminate a compressed stream.
///
/// Once `content-encoding` has been advertised there is no way to fall back
/// to the identity encoding, so the caller must reset the stream.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum FilterError {
    #[error("{encoding} encoder failed: {source}")]
    Encode {
        encoding: String,
        #[source]
        source: io::Error,
    },

    #[error("body data received after end of stream")]
    DataAfterEndStream,
}
