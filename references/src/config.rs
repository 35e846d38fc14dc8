//! Configuration for the reference resolver.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the reference resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum fragment length in characters.
    pub chunk_size: usize,

    /// Inline/retrieval boundary in UTF-8 bytes. Content at or below this
    /// size is spliced verbatim; larger content goes through retrieval.
    pub inline_threshold_bytes: u64,

    /// Number of fragments selected by the retrieval path.
    pub top_k: usize,

    /// Length of the trace/log preview for inlined content, in characters.
    pub preview_chars: usize,

    /// Maximum length of one formatted excerpt, in characters.
    pub excerpt_chars: usize,

    /// Lines shown by the structural summary of a large document.
    pub summary_head_lines: usize,

    /// Keyword-window characters taken before a query occurrence.
    pub keyword_window_before: usize,

    /// Keyword-window characters taken after a query occurrence.
    pub keyword_window_after: usize,

    /// Deadline for content-store calls, in seconds.
    pub fetch_timeout_secs: u64,

    /// Deadline for one embedding call, in seconds.
    pub embed_timeout_secs: u64,

    /// Deadline for vector-store calls, in seconds.
    pub search_timeout_secs: u64,

    /// Resolution cache settings.
    pub cache: CacheConfig,
}

impl ResolverConfig {
    /// Set the fragment chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the inline/retrieval size boundary.
    pub fn with_inline_threshold(mut self, bytes: u64) -> Self {
        self.inline_threshold_bytes = bytes;
        self
    }

    /// Set the number of fragments selected by retrieval.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Deadline for content-store calls.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Deadline for one embedding call.
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    /// Deadline for vector-store calls.
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            inline_threshold_bytes: 10_240,
            top_k: 3,
            preview_chars: 200,
            excerpt_chars: 500,
            summary_head_lines: 10,
            keyword_window_before: 120,
            keyword_window_after: 200,
            fetch_timeout_secs: 10,
            embed_timeout_secs: 15,
            search_timeout_secs: 5,
            cache: CacheConfig::default(),
        }
    }
}

/// Configuration for the in-process resolution cache.
///
/// Entries are keyed by input text, scope and query only; they are never
/// invalidated when the underlying note or file changes, so the cache is
/// off unless explicitly enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether resolutions are memoized at all.
    pub enabled: bool,

    /// Maximum number of cached resolutions.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.inline_threshold_bytes, 10_240);
        assert_eq!(config.top_k, 3);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_builders() {
        let config = ResolverConfig::default()
            .with_chunk_size(400)
            .with_top_k(5)
            .with_cache(CacheConfig {
                enabled: true,
                max_entries: 8,
            });

        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.top_k, 5);
        assert!(config.cache.enabled);
    }
}
