use dashmap::DashMap;

/// Source of hot-reloadable feature flags.
///
/// Flags are polled once per stream, when the response headers arrive, so a
/// change takes effect for the next stream without rebuilding the filter
/// configuration.
pub trait Runtime: Send + Sync {
    /// Returns the current value of `key`, or `default` if it is unset.
    fn feature_enabled(&self, key: &str, default: bool) -> bool;
}

/// In-process flag table.
#[derive(Debug, Default)]
pub struct RuntimeFlags {
    flags: DashMap<String, bool>,
}

impl RuntimeFlags {
    /// Creates an empty flag table. Every lookup falls back to its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `enabled`.
    pub fn set(&self, key: impl Into<String>, enabled: bool) {
        self.flags.insert(key.into(), enabled);
    }

    /// Removes `key`, restoring the caller's default.
    pub fn clear(&self, key: &str) {
        self.flags.remove(key);
    }
}

impl Runtime for RuntimeFlags {
    fn feature_enabled(&self, key: &str, default: bool) -> bool {
        self.flags.get(key).map_or(default, |flag| *flag)
    }
}
