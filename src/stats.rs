use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic counter shared by every handle cloned from it.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    /// Increments the counter by one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Adds `amount` to the counter.
    pub fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-wide registry of named counters.
///
/// Looking up the same name twice returns handles to the same counter, so
/// filters can resolve their counters once at configuration time and tests
/// can read them back by name.
#[derive(Debug, Default)]
pub struct StatsStore {
    counters: DashMap<String, Counter>,
}

impl StatsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter registered under `name`, creating it if needed.
    pub fn counter(&self, name: &str) -> Counter {
        if let Some(counter) = self.counters.get(name) {
            return counter.clone();
        }
        self.counters.entry(name.to_owned()).or_default().clone()
    }

    /// Returns all counters sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut values: Vec<_> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value()))
            .collect();
        values.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        values
    }
}

/// Counters owned by one configured compressor.
///
/// Names follow `<prefix>.<stats token>.<counter>`.
#[derive(Debug, Clone)]
pub struct CompressorStats {
    pub(crate) compressed: Counter,
    pub(crate) not_compressed: Counter,
    pub(crate) total_uncompressed_bytes: Counter,
    pub(crate) total_compressed_bytes: Counter,
    pub(crate) no_accept_header: Counter,
    pub(crate) content_length_too_small: Counter,
}

impl CompressorStats {
    /// Resolves the compressor counters in `store` under `prefix` and `token`.
    pub fn new(store: &StatsStore, prefix: &str, token: &str) -> Self {
        let scope = stats_scope(prefix, token);
        let counter = |name: &str| store.counter(&format!("{scope}{name}"));

        Self {
            compressed: counter("compressed"),
            not_compressed: counter("not_compressed"),
            total_uncompressed_bytes: counter("total_uncompressed_bytes"),
            total_compressed_bytes: counter("total_compressed_bytes"),
            no_accept_header: counter("no_accept_header"),
            content_length_too_small: counter("content_length_too_small"),
        }
    }

    /// Number of streams that were compressed.
    pub fn compressed(&self) -> u64 {
        self.compressed.value()
    }

    /// Number of streams that were passed through.
    pub fn not_compressed(&self) -> u64 {
        self.not_compressed.value()
    }

    /// Sum of body bytes fed to encoders.
    pub fn total_uncompressed_bytes(&self) -> u64 {
        self.total_uncompressed_bytes.value()
    }

    /// Sum of bytes emitted by encoders.
    pub fn total_compressed_bytes(&self) -> u64 {
        self.total_compressed_bytes.value()
    }

    /// Number of requests that carried no `Accept-Encoding` header.
    pub fn no_accept_header(&self) -> u64 {
        self.no_accept_header.value()
    }

    /// Number of responses skipped for a small `Content-Length`.
    pub fn content_length_too_small(&self) -> u64 {
        self.content_length_too_small.value()
    }
}

/// Joins the prefix and token into a dotted scope ending in `.`.
fn stats_scope(prefix: &str, token: &str) -> String {
    let prefix = prefix.trim_end_matches('.');
    let token = token.trim_matches('.');
    format!("{prefix}.{token}.")
}
