//! Result cache collaborator.
//!
//! The runtime checks the cache before admission and writes final results
//! after completion. A miss or an absent cache changes cost, never
//! correctness; fallback and degraded results are not written back, so a
//! transient outage cannot pin a poor artifact to a prompt.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::types::GenerationResult;

/// External cache seam. Implementations must be cheap and non-blocking;
/// the runtime calls them on the submission path.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &str) -> Option<GenerationResult>;
    fn put(&self, key: String, result: GenerationResult);
}

/// Cache key for a request: content-addressed so that equal prompts share an
/// entry regardless of arrival order or id.
pub fn cache_key(prompt: &str, style: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    if let Some(style) = style {
        hasher.update(b"\x1f");
        hasher.update(style.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// In-process LRU cache.
pub struct LruResultCache {
    inner: Mutex<LruCache<String, GenerationResult>>,
}

impl LruResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl ResultCache for LruResultCache {
    fn get(&self, key: &str) -> Option<GenerationResult> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: String, result: GenerationResult) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(key, result);
        }
    }
}
