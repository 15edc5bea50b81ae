//! # Previs Engine
//!
//! The in-process host API of the previsualization retrieval core. The
//! engine wires the pure scoring crate (`previs-core`), media perception
//! (`previs-perception`), and embedding inference (`previs-embed`) into
//! the operations a host calls:
//!
//! - [`Engine::ingest`] / [`Engine::reingest`] / [`Engine::delete`] — the
//!   ingestion pipeline: accept, probe, proxy, keyframes, tags, embed,
//!   commit. Idempotent on content hash; `force` replaces atomically.
//! - [`Engine::search`] / [`Engine::multimodal_search`] /
//!   [`Engine::search_by_image`] — ranked retrieval with deadlines,
//!   per-call embedding timeouts and retries, and partial-result flags.
//! - [`Engine::recall_for_beat`] / [`Engine::rough_cut`] — scene recall
//!   with suggested in/out windows, assembled into a rough-cut timeline.
//!
//! Request handling is cooperative (everything suspends at I/O and
//! provider calls); ingestion fans out on a bounded worker pool with a
//! global semaphore protecting the embedding providers. Every long
//! operation takes a `CancellationToken` and checks it between stages.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod ingest;
pub mod ops;
pub mod timeline;
pub mod zero_shot;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use previs_core::tags::enrich::{FrameTagger, TagEnricher};
use previs_core::tags::lexicon::Lexicon;
use previs_core::tags::TagHierarchy;
use previs_core::{CoreError, Modality, Result, VectorStore};
use previs_embed::{EmbeddingService, ImageInput};

pub use config::EngineConfig;
pub use ingest::IngestOptions;
pub use ops::RecallOptions;
pub use timeline::{CutEntry, RoughCut};
pub use zero_shot::ZeroShotFrameTagger;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Builder
// ============================================================================

/// Builds an [`Engine`] from configuration and an embedding service.
pub struct EngineBuilder {
	config: EngineConfig,
	embed: Arc<EmbeddingService>,
	hierarchy: TagHierarchy,
	lexicon: Lexicon,
	enricher: Option<Arc<dyn TagEnricher>>,
	frame_tagger: Option<Arc<dyn FrameTagger>>,
}

impl EngineBuilder {
	/// Start a builder with the default hierarchy and lexicon.
	#[must_use]
	pub fn new(config: EngineConfig, embed: Arc<EmbeddingService>) -> Self {
		Self {
			config,
			embed,
			hierarchy: TagHierarchy::default(),
			lexicon: Lexicon::builtin(),
			enricher: None,
			frame_tagger: None,
		}
	}

	/// Replace the tag hierarchy.
	#[must_use]
	pub fn hierarchy(mut self, hierarchy: TagHierarchy) -> Self {
		self.hierarchy = hierarchy;
		self
	}

	/// Replace the filename lexicon.
	#[must_use]
	pub fn lexicon(mut self, lexicon: Lexicon) -> Self {
		self.lexicon = lexicon;
		self
	}

	/// Attach an LLM tag enricher (best-effort).
	#[must_use]
	pub fn enricher(mut self, enricher: Arc<dyn TagEnricher>) -> Self {
		self.enricher = Some(enricher);
		self
	}

	/// Attach a keyframe classifier (best-effort).
	#[must_use]
	pub fn frame_tagger(mut self, tagger: Arc<dyn FrameTagger>) -> Self {
		self.frame_tagger = Some(tagger);
		self
	}

	/// Validate everything and open the store.
	///
	/// # Errors
	///
	/// Returns [`CoreError::InvalidInput`] for configuration problems
	/// (including provider dimensions disagreeing with the configured
	/// ones) and store-open errors.
	pub fn build(self) -> Result<Engine> {
		self.config.validate()?;

		if self.embed.text_dim() != self.config.text_dim {
			return Err(CoreError::InvalidInput(format!(
				"embedding service text_dim {} != configured {}",
				self.embed.text_dim(),
				self.config.text_dim
			)));
		}
		if self.embed.visual_dim() != self.config.visual_dim {
			return Err(CoreError::InvalidInput(format!(
				"embedding service visual_dim {} != configured {}",
				self.embed.visual_dim(),
				self.config.visual_dim
			)));
		}

		let store = VectorStore::open(
			&self.config.store_dir,
			self.config.store_config(),
			self.config.allow_rebuild,
		)?;

		let workers = self.config.ingest.effective_workers();
		let embed_permits = self.config.ingest.embed_concurrency;
		info!(
			workers,
			embed_permits,
			assets = store.asset_count(),
			"engine ready"
		);

		Ok(Engine {
			inner: Arc::new(EngineInner {
				worker_semaphore: Semaphore::new(workers),
				embed_semaphore: Semaphore::new(embed_permits),
				config: self.config,
				store,
				embed: self.embed,
				hierarchy: self.hierarchy,
				lexicon: self.lexicon,
				enricher: self.enricher,
				frame_tagger: self.frame_tagger,
			}),
		})
	}
}

// ============================================================================
// Engine
// ============================================================================

pub(crate) struct EngineInner {
	pub(crate) config: EngineConfig,
	pub(crate) store: VectorStore,
	pub(crate) embed: Arc<EmbeddingService>,
	pub(crate) hierarchy: TagHierarchy,
	pub(crate) lexicon: Lexicon,
	pub(crate) enricher: Option<Arc<dyn TagEnricher>>,
	pub(crate) frame_tagger: Option<Arc<dyn FrameTagger>>,
	pub(crate) embed_semaphore: Semaphore,
	pub(crate) worker_semaphore: Semaphore,
}

/// The previsualization retrieval engine. Cheap to clone; all clones
/// share the same store, providers, and semaphores.
#[derive(Clone)]
pub struct Engine {
	pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
	/// The engine configuration.
	#[must_use]
	pub fn config(&self) -> &EngineConfig {
		&self.inner.config
	}

	/// The underlying store, for hosts that need direct reads.
	#[must_use]
	pub fn store(&self) -> &VectorStore {
		&self.inner.store
	}

	/// The embedding service.
	#[must_use]
	pub fn embed_service(&self) -> &Arc<EmbeddingService> {
		&self.inner.embed
	}

	/// Probe embedding providers and log which are usable.
	#[must_use]
	pub fn startup_probe(&self) -> previs_embed::ProbeReport {
		self.inner.embed.startup_probe()
	}

	// ------------------------------------------------------------------
	// Embedding with timeout, retries, and the global semaphore
	// ------------------------------------------------------------------

	pub(crate) async fn embed_text_guarded(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
		self.embed_guarded(texts, Modality::Text, |service, texts| {
			service.embed_text(texts)
		})
		.await
	}

	pub(crate) async fn embed_text_for_visual_guarded(
		&self,
		texts: Vec<String>,
	) -> Result<Vec<Vec<f32>>> {
		self.embed_guarded(texts, Modality::Visual, |service, texts| {
			service.embed_text_for_visual(texts)
		})
		.await
	}

	pub(crate) async fn embed_images_guarded(
		&self,
		images: Vec<ImageInput>,
	) -> Result<Vec<Vec<f32>>> {
		self.embed_guarded(images, Modality::Visual, |service, images| {
			service.embed_images(images)
		})
		.await
	}

	/// Run one embedding call under the global semaphore with the per-call
	/// timeout and transient-error retries.
	async fn embed_guarded<T>(
		&self,
		input: Vec<T>,
		modality: Modality,
		call: impl Fn(&EmbeddingService, &[T]) -> previs_embed::Result<Vec<Vec<f32>>>
			+ Send
			+ Sync
			+ 'static,
	) -> Result<Vec<Vec<f32>>>
	where
		T: Send + Sync + 'static,
	{
		let permit = self
			.inner
			.embed_semaphore
			.acquire()
			.await
			.map_err(|_| CoreError::EmbeddingUnavailable("engine shutting down".into()))?;

		let timeout = Duration::from_secs(self.inner.config.search.embed_timeout_s);
		let attempts = 1 + self.inner.config.search.embed_retries;
		let input = Arc::new(input);
		let call = Arc::new(call);
		let mut last_error = String::new();

		for attempt in 0..attempts {
			if attempt > 0 {
				tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
			}
			let service = Arc::clone(&self.inner.embed);
			let input = Arc::clone(&input);
			let call = Arc::clone(&call);
			let work =
				tokio::task::spawn_blocking(move || call(&service, input.as_slice()));

			match tokio::time::timeout(timeout, work).await {
				Ok(Ok(Ok(vectors))) => {
					drop(permit);
					return Ok(vectors);
				}
				Ok(Ok(Err(err))) => {
					if !err.is_retryable() {
						drop(permit);
						return Err(map_embed_error(err, modality));
					}
					warn!(%err, attempt, "embedding call failed; retrying");
					last_error = err.to_string();
				}
				Ok(Err(join_err)) => {
					drop(permit);
					return Err(CoreError::EmbeddingUnavailable(join_err.to_string()));
				}
				Err(_elapsed) => {
					warn!(attempt, timeout_s = timeout.as_secs(), "embedding call timed out");
					last_error = format!("timed out after {}s", timeout.as_secs());
				}
			}
		}

		drop(permit);
		Err(CoreError::EmbeddingUnavailable(last_error))
	}
}

// ============================================================================
// Error mapping
// ============================================================================

/// Map an embedding-layer error into the engine taxonomy.
pub(crate) fn map_embed_error(err: previs_embed::EmbedError, modality: Modality) -> CoreError {
	match err {
		previs_embed::EmbedError::DimMismatch { expected, got, .. } => {
			CoreError::DimensionMismatch {
				modality,
				expected,
				got,
			}
		}
		other => CoreError::EmbeddingUnavailable(other.to_string()),
	}
}

/// Map a perception-layer error into the engine taxonomy, attributing it
/// to the probe or extraction stage.
pub(crate) fn map_perception_error(
	err: previs_perception::PerceptionError,
	path: &std::path::Path,
	extraction: bool,
) -> CoreError {
	use previs_perception::PerceptionError as PE;
	match err {
		PE::Cancelled => CoreError::Cancelled,
		other if extraction => CoreError::ExtractionFailed {
			path: path.to_path_buf(),
			reason: other.to_string(),
		},
		other => CoreError::ProbeFailed {
			path: path.to_path_buf(),
			reason: other.to_string(),
		},
	}
}
