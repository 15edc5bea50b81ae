//! Bounded LRU cache for embeddings.
//!
//! Keyed by `(modality, model_id, sha256(input))` so the same text cached
//! under the text encoder never collides with its cross-modal encoding,
//! and switching checkpoints naturally invalidates. Process-local, never
//! persisted.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Default cache capacity, in entries.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Which encoder family produced a cached vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheModality {
	/// Text encoder, text space
	Text,
	/// Vision tower, visual space
	Image,
	/// Text tower of the visual model (cross-modal)
	TextVisual,
}

/// Cache key: modality + model + content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
	modality: CacheModality,
	model_id: String,
	digest: [u8; 32],
}

impl CacheKey {
	/// Build a key from raw input bytes.
	#[must_use]
	pub fn new(modality: CacheModality, model_id: &str, input: &[u8]) -> Self {
		let mut hasher = Sha256::new();
		hasher.update(input);
		Self {
			modality,
			model_id: model_id.to_string(),
			digest: hasher.finalize().into(),
		}
	}
}

/// Hit/miss counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
	/// Lookups answered from the cache
	pub hits: u64,
	/// Lookups that fell through to a provider
	pub misses: u64,
	/// Entries currently resident
	pub len: usize,
	/// Configured capacity
	pub capacity: usize,
}

/// Bounded LRU of embedding vectors.
pub struct EmbeddingCache {
	inner: Mutex<LruCache<CacheKey, Vec<f32>>>,
	hits: AtomicU64,
	misses: AtomicU64,
}

impl EmbeddingCache {
	/// Create a cache with the given capacity (clamped to at least 1).
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
		Self {
			inner: Mutex::new(LruCache::new(capacity)),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	/// Look up a vector, updating LRU order and counters.
	#[must_use]
	pub fn get(&self, key: &CacheKey) -> Option<Vec<f32>> {
		let result = self.inner.lock().get(key).cloned();
		match result {
			Some(v) => {
				let _ = self.hits.fetch_add(1, Ordering::Relaxed);
				Some(v)
			}
			None => {
				let _ = self.misses.fetch_add(1, Ordering::Relaxed);
				None
			}
		}
	}

	/// Insert a vector, evicting the least recently used on overflow.
	pub fn put(&self, key: CacheKey, vector: Vec<f32>) {
		let _ = self.inner.lock().put(key, vector);
	}

	/// Current counters.
	#[must_use]
	pub fn stats(&self) -> CacheStats {
		let inner = self.inner.lock();
		CacheStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			len: inner.len(),
			capacity: inner.cap().get(),
		}
	}
}

impl std::fmt::Debug for EmbeddingCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let stats = self.stats();
		f.debug_struct("EmbeddingCache")
			.field("len", &stats.len)
			.field("hits", &stats.hits)
			.field("misses", &stats.misses)
			.finish()
	}
}
