//! In-memory embedding cache.

use std::sync::Arc;

use moka::sync::Cache;

use super::error::Result;
use super::Embedder;

/// Wraps an embedder with a bounded cache keyed by `(model, text)`.
/// Failures are not cached.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<(String, String), Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::new(capacity),
        }
    }

    pub fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl Embedder for CachedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = (self.inner.model_name().to_string(), text.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.as_ref().clone());
        }
        let embedding = self.inner.embed(text)?;
        self.cache.insert(key, Arc::new(embedding.clone()));
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
