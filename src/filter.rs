//! The per-stream compression state machine.

use crate::backend::Encoder;
use crate::codec::{FlushMode, accepts_encoding};
use crate::config::FilterConfig;
use crate::error::FilterError;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, header};
use std::fmt;
use std::sync::Arc;

/// Whether the filter chain should keep iterating after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Hand the (possibly rewritten) event to the next filter.
    Continue,
    /// Hold the event; the filter will resume iteration later.
    StopIteration,
}

/// Why a response was passed through uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The request did not accept this filter's encoding.
    NotAccepted,
    /// The runtime flag is off.
    Disabled,
    /// The response has no body.
    HeadersOnly,
    /// The response already carries a `Content-Encoding`.
    AlreadyEncoded,
    /// The response is a range response.
    PartialContent,
    /// `Cache-Control: no-transform` forbids rewriting the body.
    NoTransform,
    /// The media type is not in the allow list.
    ContentTypeNotAllowed,
    /// The declared `Content-Length` is below the configured minimum.
    ContentLengthTooSmall,
}

impl SkipReason {
    /// A short label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotAccepted => "not_accepted",
            SkipReason::Disabled => "disabled",
            SkipReason::HeadersOnly => "headers_only",
            SkipReason::AlreadyEncoded => "already_encoded",
            SkipReason::PartialContent => "partial_content",
            SkipReason::NoTransform => "no_transform",
            SkipReason::ContentTypeNotAllowed => "content_type_not_allowed",
            SkipReason::ContentLengthTooSmall => "content_length_too_small",
        }
    }
}

enum StreamState {
    /// Response headers have not been seen yet.
    AwaitingHeaders,
    /// Not compressing; body passes through untouched.
    Passthrough,
    /// Compressing, encoder not created yet.
    Idle,
    Encoding(Box<dyn Encoder>),
    /// Encoder finished or released.
    Flushed,
    /// Encoder failed; the stream must be reset.
    Failed,
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::AwaitingHeaders => "AwaitingHeaders",
            StreamState::Passthrough => "Passthrough",
            StreamState::Idle => "Idle",
            StreamState::Encoding(_) => "Encoding",
            StreamState::Flushed => "Flushed",
            StreamState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Compresses one response stream.
///
/// Header and body events must be delivered in arrival order. The byte
/// totals are flushed to the shared counters once, when the stream ends, is
/// reset, or the filter is dropped, whichever comes first.
#[derive(Debug)]
pub struct CompressorFilter {
    config: Arc<FilterConfig>,
    accept_encoding: bool,
    always_flush: bool,
    compressing: bool,
    state: StreamState,
    total_uncompressed_bytes: u64,
    total_compressed_bytes: u64,
    stats_flushed: bool,
}

impl CompressorFilter {
    /// Creates the filter for a new stream.
    pub fn new(config: Arc<FilterConfig>) -> Self {
        Self {
            config,
            accept_encoding: false,
            always_flush: false,
            compressing: false,
            state: StreamState::AwaitingHeaders,
            total_uncompressed_bytes: 0,
            total_compressed_bytes: 0,
            stats_flushed: false,
        }
    }

    /// Records whether the request accepts this filter's encoding.
    pub fn on_request_headers(&mut self, headers: &HeaderMap) -> FilterStatus {
        let mut values = headers.get_all(header::ACCEPT_ENCODING).iter().peekable();
        if values.peek().is_none() {
            self.config.stats().no_accept_header.inc();
            self.accept_encoding = false;
            return FilterStatus::Continue;
        }

        let token = self.config.content_encoding();
        self.accept_encoding = values
            .filter_map(|value| value.to_str().ok())
            .any(|value| accepts_encoding(value, token));
        FilterStatus::Continue
    }

    /// Decides whether to compress and rewrites the headers if so.
    pub fn on_response_headers(&mut self, headers: &mut HeaderMap, end_stream: bool) -> FilterStatus {
        if !matches!(self.state, StreamState::AwaitingHeaders) {
            return FilterStatus::Continue;
        }

        let stats = self.config.stats();
        match self.eligibility(headers, end_stream) {
            Ok(()) => {
                self.always_flush = self.config.flush_each_chunk() || is_streaming_response(headers);
                headers.remove(header::CONTENT_LENGTH);
                headers.insert(
                    header::CONTENT_ENCODING,
                    self.config.content_encoding_value().clone(),
                );
                stats.compressed.inc();
                self.compressing = true;
                self.state = StreamState::Idle;
                tracing::debug!(
                    encoding = self.config.content_encoding(),
                    always_flush = self.always_flush,
                    "compressing response"
                );
            }
            Err(reason) => {
                if reason == SkipReason::ContentLengthTooSmall {
                    stats.content_length_too_small.inc();
                }
                stats.not_compressed.inc();
                self.state = StreamState::Passthrough;
                tracing::debug!(
                    encoding = self.config.content_encoding(),
                    reason = reason.as_str(),
                    "response not compressed"
                );
            }
        }
        FilterStatus::Continue
    }

    /// Evaluates the response side of the eligibility decision.
    ///
    /// This reads the headers and the runtime flag only, so repeating it with
    /// the same inputs gives the same answer.
    pub fn eligibility(&self, headers: &HeaderMap, end_stream: bool) -> Result<(), SkipReason> {
        if !self.accept_encoding {
            return Err(SkipReason::NotAccepted);
        }
        if !self.config.enabled() {
            return Err(SkipReason::Disabled);
        }
        if end_stream {
            return Err(SkipReason::HeadersOnly);
        }
        if headers.contains_key(header::CONTENT_ENCODING) {
            return Err(SkipReason::AlreadyEncoded);
        }
        if headers.contains_key(header::CONTENT_RANGE) {
            return Err(SkipReason::PartialContent);
        }
        if has_no_transform(headers) {
            return Err(SkipReason::NoTransform);
        }
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        if content_type.is_some_and(|ct| !self.config.content_types().allows(ct)) {
            return Err(SkipReason::ContentTypeNotAllowed);
        }
        if is_below_min_size(headers, self.config.min_content_length()) {
            return Err(SkipReason::ContentLengthTooSmall);
        }
        Ok(())
    }

    /// Transforms one body chunk in place.
    ///
    /// On an encoding stream `data` is replaced by the encoder output for this
    /// call, which may be empty while the encoder buffers. On error `data` is
    /// cleared and the encoder released; the caller must reset the stream.
    pub fn encode_data(&mut self, data: &mut Bytes, end_stream: bool) -> Result<FilterStatus, FilterError> {
        match self.state {
            StreamState::AwaitingHeaders | StreamState::Passthrough => {
                return Ok(FilterStatus::Continue);
            }
            StreamState::Flushed | StreamState::Failed => {
                return Err(FilterError::DataAfterEndStream);
            }
            StreamState::Idle | StreamState::Encoding(_) => {}
        }

        let mut encoder = match std::mem::replace(&mut self.state, StreamState::Failed) {
            StreamState::Encoding(encoder) => encoder,
            _ => self
                .config
                .create_encoder()
                .map_err(|source| self.fail(data, source))?,
        };

        self.total_uncompressed_bytes += data.len() as u64;
        let mode = if end_stream {
            FlushMode::Finish
        } else if self.always_flush {
            FlushMode::Sync
        } else {
            FlushMode::None
        };

        let mut output = BytesMut::with_capacity(data.len().min(16 * 1024));
        if let Err(source) = encoder.encode(data, mode, &mut output) {
            return Err(self.fail(data, source));
        }

        tracing::trace!(
            input = data.len(),
            output = output.len(),
            end_stream,
            "encoded body chunk"
        );
        *data = output.freeze();
        self.total_compressed_bytes += data.len() as u64;

        if end_stream {
            self.state = StreamState::Flushed;
            self.flush_stats();
        } else {
            self.state = StreamState::Encoding(encoder);
        }
        Ok(FilterStatus::Continue)
    }

    /// Finishes the encoder ahead of the response trailers.
    ///
    /// Returns the tail of the compressed stream, which must be forwarded
    /// before the trailers themselves. The trailers pass through unchanged.
    pub fn encode_trailers(&mut self) -> Result<Option<Bytes>, FilterError> {
        if !matches!(self.state, StreamState::Idle | StreamState::Encoding(_)) {
            return Ok(None);
        }

        let mut tail = Bytes::new();
        self.encode_data(&mut tail, true)?;
        Ok((!tail.is_empty()).then_some(tail))
    }

    /// Releases the encoder without flushing output.
    pub fn on_stream_reset(&mut self) {
        if matches!(self.state, StreamState::Idle | StreamState::Encoding(_)) {
            tracing::debug!(
                encoding = self.config.content_encoding(),
                uncompressed = self.total_uncompressed_bytes,
                "compressed stream reset"
            );
            self.state = StreamState::Flushed;
        }
        self.flush_stats();
    }

    /// Whether the header decision chose to compress this stream.
    pub fn is_compressing(&self) -> bool {
        self.compressing
    }

    /// Whether an encoder is currently allocated.
    pub fn has_encoder(&self) -> bool {
        matches!(self.state, StreamState::Encoding(_))
    }

    /// Body bytes fed to the encoder so far.
    pub fn total_uncompressed_bytes(&self) -> u64 {
        self.total_uncompressed_bytes
    }

    /// Bytes produced by the encoder so far.
    pub fn total_compressed_bytes(&self) -> u64 {
        self.total_compressed_bytes
    }

    fn fail(&mut self, data: &mut Bytes, source: std::io::Error) -> FilterError {
        tracing::warn!(
            encoding = self.config.content_encoding(),
            error = %source,
            "response compression failed"
        );
        data.clear();
        self.state = StreamState::Failed;
        self.flush_stats();
        FilterError::Encode {
            encoding: self.config.content_encoding().to_string(),
            source,
        }
    }

    fn flush_stats(&mut self) {
        if self.stats_flushed {
            return;
        }
        self.stats_flushed = true;

        let stats = self.config.stats();
        stats
            .total_uncompressed_bytes
            .add(self.total_uncompressed_bytes);
        stats.total_compressed_bytes.add(self.total_compressed_bytes);
    }
}

impl Drop for CompressorFilter {
    fn drop(&mut self) {
        self.flush_stats();
    }
}

/// Checks for `Cache-Control: no-transform`.
fn has_no_transform(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-transform"))
}

/// Checks if Content-Length is below the minimum size.
fn is_below_min_size(headers: &HeaderMap, min_size: u64) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len < min_size)
}

/// Checks whether the response is a stream that must be flushed per chunk.
fn is_streaming_response(headers: &HeaderMap) -> bool {
    let no_buffering = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));

    no_buffering
        || headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
            })
}
