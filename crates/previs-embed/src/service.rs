//! The embedding service: provider chains, fallback, caching, dim
//! enforcement.
//!
//! Providers are ordered per modality (primary first). A provider that
//! fails inference is marked degraded and the call falls through to the
//! next; [`EmbedError::Unavailable`] surfaces only when a chain is
//! exhausted. Dimension enforcement happens here, not in providers: a
//! provider answering with the wrong dimension is a configuration error
//! and is rejected without fallback.
//!
//! Empty strings embed to the zero vector without touching any provider —
//! they carry no signal and must never fail.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::cache::{CacheKey, CacheModality, CacheStats, EmbeddingCache, DEFAULT_CAPACITY};
use crate::error::{EmbedError, Result};
use crate::provider::{ImageInput, TextEmbedder, VisualEmbedder};

/// Default provider batch size.
pub const DEFAULT_BATCH_SIZE: usize = 32;

// ============================================================================
// Configuration
// ============================================================================

/// Service-level configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
	/// Required output dimension of the text space
	pub text_dim: usize,
	/// Required output dimension of the visual space
	pub visual_dim: usize,
	/// Inputs per provider call
	pub batch_size: usize,
	/// Embedding cache capacity, in entries
	pub cache_capacity: usize,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			text_dim: 384,
			visual_dim: 512,
			batch_size: DEFAULT_BATCH_SIZE,
			cache_capacity: DEFAULT_CAPACITY,
		}
	}
}

/// Outcome of the startup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
	/// At least one text provider responded
	pub text_ok: bool,
	/// At least one visual provider responded
	pub visual_ok: bool,
}

// ============================================================================
// Service
// ============================================================================

/// Routes embedding requests across provider chains with caching.
pub struct EmbeddingService {
	config: ServiceConfig,
	text_chain: Vec<Arc<dyn TextEmbedder>>,
	visual_chain: Vec<Arc<dyn VisualEmbedder>>,
	degraded_text: Mutex<HashSet<usize>>,
	degraded_visual: Mutex<HashSet<usize>>,
	cache: EmbeddingCache,
}

impl EmbeddingService {
	/// Build a service over ordered provider chains.
	///
	/// # Errors
	///
	/// Returns [`EmbedError::DimMismatch`] when any provider's declared
	/// dimension disagrees with the configured one; switching providers
	/// mid-run must never change the dimension.
	pub fn new(
		config: ServiceConfig,
		text_chain: Vec<Arc<dyn TextEmbedder>>,
		visual_chain: Vec<Arc<dyn VisualEmbedder>>,
	) -> Result<Self> {
		for provider in &text_chain {
			if provider.dim() != config.text_dim {
				return Err(EmbedError::DimMismatch {
					model: provider.model_id().to_string(),
					expected: config.text_dim,
					got: provider.dim(),
				});
			}
		}
		for provider in &visual_chain {
			if provider.dim() != config.visual_dim {
				return Err(EmbedError::DimMismatch {
					model: provider.model_id().to_string(),
					expected: config.visual_dim,
					got: provider.dim(),
				});
			}
		}
		let cache = EmbeddingCache::new(config.cache_capacity);
		Ok(Self {
			config,
			text_chain,
			visual_chain,
			degraded_text: Mutex::new(HashSet::new()),
			degraded_visual: Mutex::new(HashSet::new()),
			cache,
		})
	}

	/// Probe every provider once and mark unresponsive ones degraded.
	pub fn startup_probe(&self) -> ProbeReport {
		for (i, provider) in self.text_chain.iter().enumerate() {
			match provider.probe() {
				Ok(()) => info!(model = provider.model_id(), "text provider healthy"),
				Err(err) => {
					warn!(model = provider.model_id(), %err, "text provider degraded at startup");
					let _ = self.degraded_text.lock().insert(i);
				}
			}
		}
		for (i, provider) in self.visual_chain.iter().enumerate() {
			match provider.probe() {
				Ok(()) => info!(model = provider.model_id(), "visual provider healthy"),
				Err(err) => {
					warn!(model = provider.model_id(), %err, "visual provider degraded at startup");
					let _ = self.degraded_visual.lock().insert(i);
				}
			}
		}
		ProbeReport {
			text_ok: self.text_available(),
			visual_ok: self.visual_available(),
		}
	}

	/// Whether any text provider is currently usable.
	#[must_use]
	pub fn text_available(&self) -> bool {
		let degraded = self.degraded_text.lock();
		(0..self.text_chain.len()).any(|i| !degraded.contains(&i))
	}

	/// Whether any visual provider is currently usable.
	#[must_use]
	pub fn visual_available(&self) -> bool {
		let degraded = self.degraded_visual.lock();
		(0..self.visual_chain.len()).any(|i| !degraded.contains(&i))
	}

	/// Clear degraded marks so previously failing providers are retried.
	pub fn reset_degraded(&self) {
		self.degraded_text.lock().clear();
		self.degraded_visual.lock().clear();
	}

	/// Cache counters.
	#[must_use]
	pub fn cache_stats(&self) -> CacheStats {
		self.cache.stats()
	}

	/// Configured text dimension.
	#[must_use]
	pub const fn text_dim(&self) -> usize {
		self.config.text_dim
	}

	/// Configured visual dimension.
	#[must_use]
	pub const fn visual_dim(&self) -> usize {
		self.config.visual_dim
	}

	// ------------------------------------------------------------------
	// Embedding
	// ------------------------------------------------------------------

	/// Embed texts in the text space; output order matches input order.
	/// Empty strings produce the zero vector without a provider call.
	///
	/// # Errors
	///
	/// [`EmbedError::Unavailable`] when every text provider failed, or
	/// [`EmbedError::DimMismatch`] for a misconfigured provider.
	pub fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		self.embed_strings(texts, CacheModality::Text, self.config.text_dim, |batch| {
			self.call_text_chain(batch)
		})
	}

	/// Encode texts into the visual space via the cross-modal text tower.
	///
	/// # Errors
	///
	/// As [`EmbeddingService::embed_text`], over the visual chain.
	pub fn embed_text_for_visual(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		self.embed_strings(
			texts,
			CacheModality::TextVisual,
			self.config.visual_dim,
			|batch| self.call_visual_texts(batch),
		)
	}

	/// Embed images in the visual space; output order matches input order.
	///
	/// # Errors
	///
	/// [`EmbedError::Unavailable`] when every visual provider failed,
	/// [`EmbedError::DimMismatch`] for a misconfigured provider, or
	/// [`EmbedError::Io`] when a path input cannot be read.
	pub fn embed_images(&self, images: &[ImageInput]) -> Result<Vec<Vec<f32>>> {
		if images.is_empty() {
			return Ok(vec![]);
		}
		let model_id = self.active_visual_model_id();

		let mut results: Vec<Option<Vec<f32>>> = vec![None; images.len()];
		let mut missing: Vec<usize> = Vec::new();
		for (i, input) in images.iter().enumerate() {
			let key = CacheKey::new(CacheModality::Image, &model_id, &input.bytes()?);
			if let Some(hit) = self.cache.get(&key) {
				results[i] = Some(hit);
			} else {
				missing.push(i);
			}
		}

		for chunk in missing.chunks(self.config.batch_size.max(1)) {
			let batch: Vec<ImageInput> =
				chunk.iter().map(|&i| images[i].clone()).collect();
			let (vectors, served_by) = self.call_visual_chain_images(&batch)?;
			for (&i, vector) in chunk.iter().zip(vectors) {
				let key =
					CacheKey::new(CacheModality::Image, &served_by, &images[i].bytes()?);
				self.cache.put(key, vector.clone());
				results[i] = Some(vector);
			}
		}

		Ok(results.into_iter().flatten().collect())
	}

	// ------------------------------------------------------------------
	// Internals
	// ------------------------------------------------------------------

	/// Model id of the provider the next text call will hit. Cache keys
	/// use it so entries follow the serving provider across fallbacks.
	fn active_text_model_id(&self) -> String {
		let degraded = self.degraded_text.lock();
		self.text_chain
			.iter()
			.enumerate()
			.find(|(i, _)| !degraded.contains(i))
			.map_or_else(|| "none".to_string(), |(_, p)| p.model_id().to_string())
	}

	/// Model id of the provider the next visual call will hit.
	fn active_visual_model_id(&self) -> String {
		let degraded = self.degraded_visual.lock();
		self.visual_chain
			.iter()
			.enumerate()
			.find(|(i, _)| !degraded.contains(i))
			.map_or_else(|| "none".to_string(), |(_, p)| p.model_id().to_string())
	}

	fn embed_strings(
		&self,
		texts: &[String],
		modality: CacheModality,
		dim: usize,
		call: impl Fn(&[&str]) -> Result<(Vec<Vec<f32>>, String)>,
	) -> Result<Vec<Vec<f32>>> {
		if texts.is_empty() {
			return Ok(vec![]);
		}
		let model_id = match modality {
			CacheModality::Text => self.active_text_model_id(),
			_ => self.active_visual_model_id(),
		};

		let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
		let mut missing: Vec<usize> = Vec::new();
		for (i, text) in texts.iter().enumerate() {
			if text.is_empty() {
				results[i] = Some(vec![0.0; dim]);
				continue;
			}
			let key = CacheKey::new(modality, &model_id, text.as_bytes());
			match self.cache.get(&key) {
				Some(hit) => results[i] = Some(hit),
				None => missing.push(i),
			}
		}

		for chunk in missing.chunks(self.config.batch_size.max(1)) {
			let batch: Vec<&str> = chunk.iter().map(|&i| texts[i].as_str()).collect();
			let (vectors, served_by) = call(&batch)?;
			for (&i, vector) in chunk.iter().zip(vectors) {
				let key = CacheKey::new(modality, &served_by, texts[i].as_bytes());
				self.cache.put(key, vector.clone());
				results[i] = Some(vector);
			}
		}

		Ok(results.into_iter().flatten().collect())
	}

	fn call_text_chain(&self, batch: &[&str]) -> Result<(Vec<Vec<f32>>, String)> {
		let mut last_error = String::from("no text providers configured");
		for (i, provider) in self.text_chain.iter().enumerate() {
			if self.degraded_text.lock().contains(&i) {
				continue;
			}
			match provider.embed_batch(batch) {
				Ok(vectors) => {
					self.check_dims(&vectors, self.config.text_dim, provider.model_id())?;
					return Ok((vectors, provider.model_id().to_string()));
				}
				Err(err) if err.triggers_fallback() => {
					warn!(model = provider.model_id(), %err, "text provider degraded");
					let _ = self.degraded_text.lock().insert(i);
					last_error = err.to_string();
				}
				Err(err) => return Err(err),
			}
		}
		Err(EmbedError::Unavailable(last_error))
	}

	fn call_visual_texts(&self, batch: &[&str]) -> Result<(Vec<Vec<f32>>, String)> {
		let mut last_error = String::from("no visual providers configured");
		for (i, provider) in self.visual_chain.iter().enumerate() {
			if self.degraded_visual.lock().contains(&i) {
				continue;
			}
			match provider.embed_texts(batch) {
				Ok(vectors) => {
					self.check_dims(&vectors, self.config.visual_dim, provider.model_id())?;
					return Ok((vectors, provider.model_id().to_string()));
				}
				Err(err) if err.triggers_fallback() => {
					warn!(model = provider.model_id(), %err, "visual provider degraded");
					let _ = self.degraded_visual.lock().insert(i);
					last_error = err.to_string();
				}
				Err(err) => return Err(err),
			}
		}
		Err(EmbedError::Unavailable(last_error))
	}

	fn call_visual_chain_images(&self, batch: &[ImageInput]) -> Result<(Vec<Vec<f32>>, String)> {
		let mut last_error = String::from("no visual providers configured");
		for (i, provider) in self.visual_chain.iter().enumerate() {
			if self.degraded_visual.lock().contains(&i) {
				continue;
			}
			match provider.embed_images(batch) {
				Ok(vectors) => {
					self.check_dims(&vectors, self.config.visual_dim, provider.model_id())?;
					return Ok((vectors, provider.model_id().to_string()));
				}
				Err(err) if err.triggers_fallback() => {
					warn!(model = provider.model_id(), %err, "visual provider degraded");
					let _ = self.degraded_visual.lock().insert(i);
					last_error = err.to_string();
				}
				Err(err) => return Err(err),
			}
		}
		Err(EmbedError::Unavailable(last_error))
	}

	fn check_dims(&self, vectors: &[Vec<f32>], expected: usize, model: &str) -> Result<()> {
		for v in vectors {
			if v.len() != expected {
				return Err(EmbedError::DimMismatch {
					model: model.to_string(),
					expected,
					got: v.len(),
				});
			}
		}
		Ok(())
	}
}

impl std::fmt::Debug for EmbeddingService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmbeddingService")
			.field("text_providers", &self.text_chain.len())
			.field("visual_providers", &self.visual_chain.len())
			.field("text_dim", &self.config.text_dim)
			.field("visual_dim", &self.config.visual_dim)
			.finish()
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU64, Ordering};

	/// Deterministic stub: vector derived from input length, counts calls,
	/// optionally fails forever.
	struct StubText {
		id: &'static str,
		dim: usize,
		calls: AtomicU64,
		fail: bool,
	}

	impl StubText {
		fn healthy(id: &'static str, dim: usize) -> Arc<Self> {
			Arc::new(Self {
				id,
				dim,
				calls: AtomicU64::new(0),
				fail: false,
			})
		}

		fn broken(id: &'static str, dim: usize) -> Arc<Self> {
			Arc::new(Self {
				id,
				dim,
				calls: AtomicU64::new(0),
				fail: true,
			})
		}
	}

	impl TextEmbedder for StubText {
		fn model_id(&self) -> &str {
			self.id
		}
		fn dim(&self) -> usize {
			self.dim
		}
		fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
			let _ = self.calls.fetch_add(1, Ordering::SeqCst);
			if self.fail {
				return Err(EmbedError::Inference("stub down".into()));
			}
			Ok(texts
				.iter()
				.map(|t| {
					let mut v = vec![0.0; self.dim];
					v[t.len() % self.dim] = 1.0;
					v
				})
				.collect())
		}
	}

	struct StubVisual {
		id: &'static str,
		dim: usize,
	}

	impl VisualEmbedder for StubVisual {
		fn model_id(&self) -> &str {
			self.id
		}
		fn dim(&self) -> usize {
			self.dim
		}
		fn embed_images(&self, images: &[ImageInput]) -> Result<Vec<Vec<f32>>> {
			Ok(images.iter().map(|_| vec![1.0; self.dim]).collect())
		}
		fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
			Ok(texts.iter().map(|_| vec![0.5; self.dim]).collect())
		}
	}

	fn config(dim: usize) -> ServiceConfig {
		ServiceConfig {
			text_dim: dim,
			visual_dim: 4,
			batch_size: 2,
			cache_capacity: 16,
		}
	}

	#[test]
	fn test_wrong_provider_dim_rejected_at_build() {
		let err = EmbeddingService::new(
			config(8),
			vec![StubText::healthy("wrong", 16) as Arc<dyn TextEmbedder>],
			vec![],
		)
		.unwrap_err();
		assert!(matches!(err, EmbedError::DimMismatch { .. }));
	}

	#[test]
	fn test_empty_string_zero_vector_no_call() {
		let primary = StubText::healthy("primary", 8);
		let service = EmbeddingService::new(
			config(8),
			vec![Arc::clone(&primary) as Arc<dyn TextEmbedder>],
			vec![],
		)
		.unwrap();

		let out = service.embed_text(&[String::new()]).unwrap();
		assert_eq!(out, vec![vec![0.0; 8]]);
		assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn test_order_preserved_with_mixed_cache() {
		let primary = StubText::healthy("primary", 8);
		let service = EmbeddingService::new(
			config(8),
			vec![Arc::clone(&primary) as Arc<dyn TextEmbedder>],
			vec![],
		)
		.unwrap();

		let texts: Vec<String> = vec!["a".into(), "".into(), "abc".into(), "a".into()];
		let out = service.embed_text(&texts).unwrap();
		assert_eq!(out.len(), 4);
		assert_eq!(out[0], out[3]); // same input, same vector
		assert_eq!(out[1], vec![0.0; 8]);
	}

	#[test]
	fn test_cache_avoids_second_call() {
		let primary = StubText::healthy("primary", 8);
		let service = EmbeddingService::new(
			config(8),
			vec![Arc::clone(&primary) as Arc<dyn TextEmbedder>],
			vec![],
		)
		.unwrap();

		let _ = service.embed_text(&["sunset".to_string()]).unwrap();
		let _ = service.embed_text(&["sunset".to_string()]).unwrap();
		assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
		assert_eq!(service.cache_stats().hits, 1);
	}

	#[test]
	fn test_fallback_marks_degraded() {
		let broken = StubText::broken("primary", 8);
		let backup = StubText::healthy("backup", 8);
		let service = EmbeddingService::new(
			config(8),
			vec![
				Arc::clone(&broken) as Arc<dyn TextEmbedder>,
				Arc::clone(&backup) as Arc<dyn TextEmbedder>,
			],
			vec![],
		)
		.unwrap();

		let out = service.embed_text(&["x".to_string()]).unwrap();
		assert_eq!(out[0].len(), 8);
		assert_eq!(broken.calls.load(Ordering::SeqCst), 1);

		// Second call skips the degraded primary entirely.
		let _ = service.embed_text(&["y".to_string()]).unwrap();
		assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
		assert!(service.text_available());
	}

	#[test]
	fn test_unavailable_when_chain_exhausted() {
		let service = EmbeddingService::new(
			config(8),
			vec![StubText::broken("only", 8) as Arc<dyn TextEmbedder>],
			vec![],
		)
		.unwrap();

		let err = service.embed_text(&["x".to_string()]).unwrap_err();
		assert!(matches!(err, EmbedError::Unavailable(_)));
		assert!(!service.text_available());

		service.reset_degraded();
		assert!(service.text_available());
	}

	#[test]
	fn test_cross_modal_uses_visual_chain() {
		let service = EmbeddingService::new(
			config(8),
			vec![StubText::healthy("text", 8) as Arc<dyn TextEmbedder>],
			vec![Arc::new(StubVisual { id: "clip", dim: 4 }) as Arc<dyn VisualEmbedder>],
		)
		.unwrap();

		let out = service
			.embed_text_for_visual(&["night chase".to_string()])
			.unwrap();
		assert_eq!(out[0], vec![0.5; 4]);
	}

	#[test]
	fn test_embed_images_batched() {
		let service = EmbeddingService::new(
			config(8),
			vec![],
			vec![Arc::new(StubVisual { id: "clip", dim: 4 }) as Arc<dyn VisualEmbedder>],
		)
		.unwrap();

		let inputs = vec![
			ImageInput::Bytes(vec![1, 2, 3]),
			ImageInput::Bytes(vec![4, 5, 6]),
			ImageInput::Bytes(vec![7, 8, 9]),
		];
		let out = service.embed_images(&inputs).unwrap();
		assert_eq!(out.len(), 3);
		assert!(out.iter().all(|v| v.len() == 4));
	}

	#[test]
	fn test_probe_reports_health() {
		let service = EmbeddingService::new(
			config(8),
			vec![StubText::broken("down", 8) as Arc<dyn TextEmbedder>],
			vec![Arc::new(StubVisual { id: "clip", dim: 4 }) as Arc<dyn VisualEmbedder>],
		)
		.unwrap();

		let report = service.startup_probe();
		assert!(!report.text_ok);
		assert!(report.visual_ok);
	}
}
