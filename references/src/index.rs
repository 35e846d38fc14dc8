//! Lazy fragment index over an external vector store.
//!
//! The index persists fragment vectors so repeated queries against the same
//! source skip re-embedding. Persistence is strictly best-effort: a missing
//! or failing backend degrades every operation to "no pre-index available",
//! never to an error the resolver has to handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::splitter::Fragment;

/// One vector to upsert into the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Point id: `"{scope}:{source_id}:{ordinal}"`.
    pub id: String,

    /// Source document the fragment belongs to.
    pub source_id: String,

    /// Fragment ordinal within the source.
    pub ordinal: usize,

    /// Fragment text, stored alongside the vector.
    pub text: String,

    /// The embedding.
    pub vector: Vec<f32>,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredHit {
    /// Point id.
    pub id: String,

    /// Source document.
    pub source_id: String,

    /// Fragment ordinal within the source.
    pub ordinal: usize,

    /// Fragment text.
    pub text: String,

    /// Similarity score.
    pub score: f32,
}

/// Restricts a search to one source's fragments within one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilter {
    /// Scope token (see [`crate::Scope::key`]).
    pub scope_key: String,

    /// Source document id.
    pub source_id: String,
}

/// Contract over the external vector-store engine.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist.
    async fn ensure_collection(&self) -> Result<()>;

    /// Upsert points by id; an existing id is overwritten.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// Nearest-neighbor search restricted by `filter`.
    async fn search(
        &self,
        vector: &[f32],
        filter: &SourceFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredHit>>;
}

/// Best-effort wrapper around an optional [`VectorStore`].
pub struct FragmentIndex {
    store: Option<Arc<dyn VectorStore>>,
    ready: AtomicBool,
    timeout: Duration,
}

impl FragmentIndex {
    /// Create an index; `None` disables persistence entirely.
    pub fn new(store: Option<Arc<dyn VectorStore>>, timeout: Duration) -> Self {
        Self {
            store,
            ready: AtomicBool::new(false),
            timeout,
        }
    }

    /// The upsert key for one fragment.
    pub fn fragment_key(scope_key: &str, source_id: &str, ordinal: usize) -> String {
        format!("{scope_key}:{source_id}:{ordinal}")
    }

    /// Lazily ensure the collection exists. Returns the usable store, or
    /// `None` when the backend is absent or not coming up.
    async fn ready_store(&self) -> Option<&Arc<dyn VectorStore>> {
        let store = self.store.as_ref()?;
        if self.ready.load(Ordering::Acquire) {
            return Some(store);
        }
        match tokio::time::timeout(self.timeout, store.ensure_collection()).await {
            Ok(Ok(())) => {
                self.ready.store(true, Ordering::Release);
                Some(store)
            }
            Ok(Err(e)) => {
                warn!("Vector collection unavailable: {e}");
                None
            }
            Err(_) => {
                warn!("Vector collection setup timed out");
                None
            }
        }
    }

    /// Persist the embedded fragments of one source. Best-effort: failures
    /// are logged and swallowed. Upserts are idempotent, so retrying after
    /// a partial failure cannot duplicate fragments.
    pub async fn index_fragments(&self, scope_key: &str, fragments: &[Fragment]) {
        let Some(store) = self.ready_store().await else {
            return;
        };

        let points: Vec<VectorPoint> = fragments
            .iter()
            .filter_map(|f| {
                f.embedding.as_ref().map(|vector| VectorPoint {
                    id: Self::fragment_key(scope_key, &f.source_id, f.ordinal),
                    source_id: f.source_id.clone(),
                    ordinal: f.ordinal,
                    text: f.text.clone(),
                    vector: vector.clone(),
                })
            })
            .collect();
        if points.is_empty() {
            return;
        }

        let count = points.len();
        match tokio::time::timeout(self.timeout, store.upsert(points)).await {
            Ok(Ok(())) => debug!("Indexed {count} fragments for {scope_key}"),
            Ok(Err(e)) => warn!("Fragment indexing failed (ignored): {e}"),
            Err(_) => warn!("Fragment indexing timed out (ignored)"),
        }
    }

    /// Search one source's pre-indexed fragments. An absent or failing
    /// backend yields an empty hit list, meaning "compute fresh".
    pub async fn search(
        &self,
        vector: &[f32],
        scope_key: &str,
        source_id: &str,
        top_k: usize,
    ) -> Vec<ScoredHit> {
        let Some(store) = self.ready_store().await else {
            return Vec::new();
        };

        let filter = SourceFilter {
            scope_key: scope_key.to_string(),
            source_id: source_id.to_string(),
        };
        match tokio::time::timeout(self.timeout, store.search(vector, &filter, top_k)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!("Vector search failed, computing fresh: {e}");
                Vec::new()
            }
            Err(_) => {
                warn!("Vector search timed out, computing fresh");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReferenceError;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// In-memory store keyed by point id.
    struct MemoryStore {
        points: Mutex<HashMap<String, VectorPoint>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                points: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl VectorStore for MemoryStore {
        async fn ensure_collection(&self) -> Result<()> {
            Ok(())
        }

        async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
            let mut stored = self.points.lock().await;
            for point in points {
                stored.insert(point.id.clone(), point);
            }
            Ok(())
        }

        async fn search(
            &self,
            _vector: &[f32],
            filter: &SourceFilter,
            top_k: usize,
        ) -> Result<Vec<ScoredHit>> {
            let stored = self.points.lock().await;
            let mut hits: Vec<ScoredHit> = stored
                .values()
                .filter(|p| {
                    p.source_id == filter.source_id
                        && p.id
                            .starts_with(&format!("{}:", filter.scope_key))
                })
                .map(|p| ScoredHit {
                    id: p.id.clone(),
                    source_id: p.source_id.clone(),
                    ordinal: p.ordinal,
                    text: p.text.clone(),
                    score: 1.0,
                })
                .collect();
            hits.sort_by_key(|h| h.ordinal);
            hits.truncate(top_k);
            Ok(hits)
        }
    }

    /// Store whose every call fails.
    struct BrokenStore;

    #[async_trait]
    impl VectorStore for BrokenStore {
        async fn ensure_collection(&self) -> Result<()> {
            Err(ReferenceError::VectorBackend("down".to_string()))
        }
        async fn upsert(&self, _points: Vec<VectorPoint>) -> Result<()> {
            Err(ReferenceError::VectorBackend("down".to_string()))
        }
        async fn search(
            &self,
            _vector: &[f32],
            _filter: &SourceFilter,
            _top_k: usize,
        ) -> Result<Vec<ScoredHit>> {
            Err(ReferenceError::VectorBackend("down".to_string()))
        }
    }

    fn embedded(source: &str, ordinal: usize, text: &str) -> Fragment {
        Fragment::new(source, ordinal, text).with_embedding(vec![1.0, 0.0])
    }

    #[test]
    fn test_fragment_key_format() {
        assert_eq!(
            FragmentIndex::fragment_key("u1/p1", "doc1", 2),
            "u1/p1:doc1:2"
        );
    }

    #[tokio::test]
    async fn test_reindexing_overwrites_instead_of_duplicating() {
        let store = Arc::new(MemoryStore::new());
        let index = FragmentIndex::new(Some(store.clone()), Duration::from_secs(1));

        let fragments = vec![embedded("doc1", 0, "old"), embedded("doc1", 1, "x")];
        index.index_fragments("u1/p1", &fragments).await;

        let fragments = vec![embedded("doc1", 0, "new"), embedded("doc1", 1, "x")];
        index.index_fragments("u1/p1", &fragments).await;

        let stored = store.points.lock().await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["u1/p1:doc1:0"].text, "new");
    }

    #[tokio::test]
    async fn test_search_filters_by_source() {
        let store = Arc::new(MemoryStore::new());
        let index = FragmentIndex::new(Some(store), Duration::from_secs(1));

        index
            .index_fragments("u1/p1", &[embedded("doc1", 0, "a"), embedded("doc2", 0, "b")])
            .await;

        let hits = index.search(&[1.0, 0.0], "u1/p1", "doc1", 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "a");
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_empty() {
        let index = FragmentIndex::new(Some(Arc::new(BrokenStore)), Duration::from_secs(1));

        index
            .index_fragments("u1/p1", &[embedded("doc1", 0, "a")])
            .await;
        let hits = index.search(&[1.0, 0.0], "u1/p1", "doc1", 3).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_missing_backend_degrades_to_empty() {
        let index = FragmentIndex::new(None, Duration::from_secs(1));
        let hits = index.search(&[1.0, 0.0], "u1/p1", "doc1", 3).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_unembedded_fragments_are_not_indexed() {
        let store = Arc::new(MemoryStore::new());
        let index = FragmentIndex::new(Some(store.clone()), Duration::from_secs(1));

        index
            .index_fragments("u1/p1", &[Fragment::new("doc1", 0, "no vector")])
            .await;

        assert!(store.points.lock().await.is_empty());
    }
}
