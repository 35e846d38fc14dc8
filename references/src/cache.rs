//! Memoization of whole resolution passes.
//!
//! Entries are keyed by a hash of scope, input text and query only. Nothing
//! invalidates an entry when the underlying note or file changes within the
//! process lifetime, so the cache ships disabled and is opt-in per
//! [`crate::config::CacheConfig`].

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use crate::config::CacheConfig;
use crate::locator::Scope;
use crate::trace::ResolutionTrace;

/// A memoized resolution.
#[derive(Debug, Clone)]
pub struct CachedResolution {
    /// The resolved text.
    pub text: String,

    /// The trace that produced it.
    pub trace: ResolutionTrace,
}

struct CacheSlot {
    value: CachedResolution,
    seq: u64,
}

/// In-process cache of resolution passes, local to one resolver instance.
pub struct ResolutionCache {
    entries: Arc<RwLock<HashMap<u64, CacheSlot>>>,
    next_seq: AtomicU64,
    config: CacheConfig,
}

impl ResolutionCache {
    /// Create a cache; a disabled config makes every operation a no-op.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
            config,
        }
    }

    fn key(scope: &Scope, text: &str, query: Option<&str>) -> u64 {
        let mut hasher = DefaultHasher::new();
        scope.hash(&mut hasher);
        text.hash(&mut hasher);
        query.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up a memoized resolution.
    pub async fn get(
        &self,
        scope: &Scope,
        text: &str,
        query: Option<&str>,
    ) -> Option<CachedResolution> {
        if !self.config.enabled {
            return None;
        }
        let key = Self::key(scope, text, query);
        let entries = self.entries.read().await;
        let hit = entries.get(&key).map(|slot| slot.value.clone());
        if hit.is_some() {
            debug!("Resolution cache hit");
        }
        hit
    }

    /// Memoize a resolution, evicting the oldest entry at capacity.
    pub async fn put(
        &self,
        scope: &Scope,
        text: &str,
        query: Option<&str>,
        value: CachedResolution,
    ) {
        if !self.config.enabled {
            return;
        }
        let key = Self::key(scope, text, query);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.entries.write().await;
        if entries.len() >= self.config.max_entries.max(1) && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, slot)| slot.seq)
                .map(|(k, _)| *k)
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, CacheSlot { value, seq });
    }

    /// Number of memoized resolutions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Drop all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn enabled(max_entries: usize) -> ResolutionCache {
        ResolutionCache::new(CacheConfig {
            enabled: true,
            max_entries,
        })
    }

    fn resolution(text: &str) -> CachedResolution {
        CachedResolution {
            text: text.to_string(),
            trace: ResolutionTrace::new(),
        }
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let cache = enabled(16);
        let scope = Scope::new("u1", "s1");

        cache
            .put(&scope, "input", Some("q"), resolution("output"))
            .await;

        let hit = cache.get(&scope, "input", Some("q")).await.unwrap();
        assert_eq!(hit.text, "output");
    }

    #[tokio::test]
    async fn test_cache_key_includes_query_and_scope() {
        let cache = enabled(16);
        let scope = Scope::new("u1", "s1");

        cache.put(&scope, "input", Some("q"), resolution("out")).await;

        assert!(cache.get(&scope, "input", None).await.is_none());
        assert!(
            cache
                .get(&Scope::new("u2", "s1"), "input", Some("q"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_disabled_cache_stores_nothing() {
        let cache = ResolutionCache::new(CacheConfig::default());
        let scope = Scope::new("u1", "s1");

        cache.put(&scope, "input", None, resolution("out")).await;

        assert!(cache.get(&scope, "input", None).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_cache_evicts_oldest_at_capacity() {
        let cache = enabled(2);
        let scope = Scope::new("u1", "s1");

        cache.put(&scope, "a", None, resolution("a")).await;
        cache.put(&scope, "b", None, resolution("b")).await;
        cache.put(&scope, "c", None, resolution("c")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&scope, "a", None).await.is_none());
        assert!(cache.get(&scope, "c", None).await.is_some());
    }
}
