use crate::config::FilterConfig;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that compresses HTTP response bodies.
///
/// Every request gets its own [`CompressorFilter`](crate::CompressorFilter)
/// bound to the shared configuration.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    config: Arc<FilterConfig>,
}

impl CompressionLayer {
    /// Creates a new compression layer for `config`.
    pub fn new(config: Arc<FilterConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, self.config.clone())
    }
}
