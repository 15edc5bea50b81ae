//! Search and recall operations.
//!
//! The engine side of retrieval: embed the query (with the per-call
//! timeout, retries, and the provider semaphore), then hand pre-embedded
//! vectors to the pure scorer in `previs-core` under the total search
//! deadline. Failure semantics follow one rule: a missing modality
//! degrades the result and sets `partial`; only a query whose *every*
//! requested modality is unusable fails with `SearchUnavailable`.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use previs_core::query::{
	Beat, HybridWeights, MultimodalWeights, Query, SceneCandidate, ScoredResult, SearchMode,
	SearchOutcome,
};
use previs_core::search as scoring;
use previs_core::{CoreError, Result};
use previs_embed::ImageInput;

use crate::Engine;

/// Options for beat recall.
#[derive(Debug, Clone)]
pub struct RecallOptions {
	/// Maximum candidates returned
	pub desired_count: usize,
	/// Hybrid weights for the underlying search; engine defaults apply
	/// when absent
	pub weights: Option<HybridWeights>,
}

impl Default for RecallOptions {
	fn default() -> Self {
		Self {
			desired_count: 5,
			weights: None,
		}
	}
}

impl Engine {
	/// A query preloaded with the engine's configured defaults.
	#[must_use]
	pub fn default_query(&self, text: impl Into<String>) -> Query {
		let search = &self.inner.config.search;
		Query {
			text: text.into(),
			tags: Vec::new(),
			filter: previs_core::TagFilter::default(),
			mode: search.default_mode,
			weights: search.hybrid_weights(),
			limit: search.default_limit,
			min_score: search.min_score,
		}
	}

	/// Run a search under the configured deadline.
	///
	/// # Errors
	///
	/// `InvalidQuery` for a malformed query, `SearchUnavailable` when a
	/// vector-only mode has no usable text provider, `Cancelled` on
	/// cooperative cancellation.
	#[instrument(skip_all, fields(mode = ?query.mode, limit = query.limit))]
	pub async fn search(
		&self,
		query: Query,
		cancel: &CancellationToken,
	) -> Result<SearchOutcome<ScoredResult>> {
		query.validate()?;
		let deadline = Instant::now() + Duration::from_millis(self.inner.config.search.deadline_ms);

		// Embed the query text where the mode needs it.
		let (text_vector, missing_text) = match query.mode {
			SearchMode::TagOnly => (None, false),
			_ => match self.embed_text_guarded(vec![query.text.clone()]).await {
				Ok(mut vectors) => (vectors.pop(), false),
				Err(err) => {
					if matches!(
						query.mode,
						SearchMode::VectorOnly | SearchMode::FilterThenRank
					) {
						return Err(CoreError::SearchUnavailable(format!(
							"text modality required by {:?}: {err}",
							query.mode
						)));
					}
					warn!(%err, "text modality down; hybrid degrades to tags only");
					(None, true)
				}
			},
		};

		let snapshot = self.inner.store.snapshot();
		let scored = self
			.run_scored(deadline, cancel, move |child| {
				scoring::search(&snapshot, &query, text_vector.as_deref(), &child)
			})
			.await?;

		Ok(match scored {
			Some(results) if missing_text => {
				SearchOutcome::partial(results, "text_modality_unavailable")
			}
			Some(results) => SearchOutcome::complete(results),
			None => SearchOutcome::partial(Vec::new(), "deadline_expired"),
		})
	}

	/// Multimodal fusion search (text + cross-modal visual + tags).
	///
	/// # Errors
	///
	/// `InvalidQuery` for malformed weights, `SearchUnavailable` when no
	/// requested modality is usable, `Cancelled` on cancellation.
	#[instrument(skip_all)]
	pub async fn multimodal_search(
		&self,
		query: Query,
		weights: Option<MultimodalWeights>,
		cancel: &CancellationToken,
	) -> Result<SearchOutcome<ScoredResult>> {
		let weights = weights.unwrap_or(self.inner.config.search.multimodal_weights);
		weights.validate()?;
		if query.text.trim().is_empty() {
			return Err(CoreError::InvalidQuery(
				"multimodal search requires query text".into(),
			));
		}
		let deadline = Instant::now() + Duration::from_millis(self.inner.config.search.deadline_ms);

		let text_vector = match self.embed_text_guarded(vec![query.text.clone()]).await {
			Ok(mut vectors) => vectors.pop(),
			Err(err) => {
				warn!(%err, "text modality down for multimodal search");
				None
			}
		};
		let visual_vector = match self
			.embed_text_for_visual_guarded(vec![query.text.clone()])
			.await
		{
			Ok(mut vectors) => vectors.pop(),
			Err(err) => {
				warn!(%err, "visual modality down for multimodal search");
				None
			}
		};

		if text_vector.is_none() && visual_vector.is_none() && query.tags.is_empty() {
			return Err(CoreError::SearchUnavailable(
				"no usable modality: embedding providers down and no query tags".into(),
			));
		}
		let partial = text_vector.is_none() || visual_vector.is_none();

		let snapshot = self.inner.store.snapshot();
		let scored = self
			.run_scored(deadline, cancel, move |child| {
				scoring::multimodal_search(
					&snapshot,
					&query,
					weights,
					text_vector.as_deref(),
					visual_vector.as_deref(),
					&child,
				)
			})
			.await?;

		Ok(match scored {
			Some(results) if partial => SearchOutcome::partial(results, "modality_unavailable"),
			Some(results) => SearchOutcome::complete(results),
			None => SearchOutcome::partial(Vec::new(), "deadline_expired"),
		})
	}

	/// Rank assets by keyframe similarity to an example image.
	///
	/// # Errors
	///
	/// `SearchUnavailable` when the visual modality is down, `Cancelled`
	/// on cancellation.
	#[instrument(skip_all)]
	pub async fn search_by_image(
		&self,
		image: ImageInput,
		limit: Option<usize>,
		cancel: &CancellationToken,
	) -> Result<SearchOutcome<ScoredResult>> {
		let limit = limit.unwrap_or(self.inner.config.search.default_limit);
		let min_score = self.inner.config.search.min_score;
		let deadline = Instant::now() + Duration::from_millis(self.inner.config.search.deadline_ms);

		let image_vector = self
			.embed_images_guarded(vec![image])
			.await
			.map_err(|err| CoreError::SearchUnavailable(format!("visual modality down: {err}")))?
			.into_iter()
			.next()
			.ok_or_else(|| CoreError::SearchUnavailable("empty embedding batch".into()))?;

		let snapshot = self.inner.store.snapshot();
		let scored = self
			.run_scored(deadline, cancel, move |child| {
				scoring::search_by_image(&snapshot, &image_vector, limit, min_score, &child)
			})
			.await?;

		Ok(match scored {
			Some(results) => SearchOutcome::complete(results),
			None => SearchOutcome::partial(Vec::new(), "deadline_expired"),
		})
	}

	/// Recall candidate clips for a screenplay beat, with suggested
	/// in/out windows centered on the best-matching keyframe.
	///
	/// # Errors
	///
	/// `SearchUnavailable` when no modality is usable, `Cancelled` on
	/// cancellation.
	#[instrument(skip_all, fields(count = options.desired_count))]
	pub async fn recall_for_beat(
		&self,
		beat: &Beat,
		options: RecallOptions,
		cancel: &CancellationToken,
	) -> Result<SearchOutcome<SceneCandidate>> {
		let search_config = &self.inner.config.search;
		let composite = beat.composite_text();
		let mut query = Query {
			text: composite.clone(),
			tags: beat.hint_tags(),
			filter: previs_core::TagFilter::default(),
			mode: SearchMode::Hybrid,
			weights: options.weights.unwrap_or(search_config.hybrid_weights()),
			limit: options.desired_count.saturating_mul(2).max(1),
			min_score: search_config.min_score,
		};
		query.validate()?;
		let deadline = Instant::now() + Duration::from_millis(search_config.deadline_ms);

		let text_vector = match self.embed_text_guarded(vec![composite.clone()]).await {
			Ok(mut vectors) => vectors.pop(),
			Err(err) => {
				warn!(%err, "text modality down for recall");
				None
			}
		};
		let visual_vector = match self.embed_text_for_visual_guarded(vec![composite]).await {
			Ok(mut vectors) => vectors.pop(),
			Err(err) => {
				warn!(%err, "visual modality down for recall; anchoring on first keyframes");
				None
			}
		};
		if text_vector.is_none() && visual_vector.is_none() && query.tags.is_empty() {
			return Err(CoreError::SearchUnavailable(
				"no usable modality for recall".into(),
			));
		}
		let partial = text_vector.is_none() || visual_vector.is_none();

		let snapshot = self.inner.store.snapshot();
		let beat = beat.clone();
		let desired = options.desired_count;
		let scored = self
			.run_scored(deadline, cancel, move |child| {
				scoring::recall_for_beat(
					&snapshot,
					&beat,
					&query,
					text_vector.as_deref(),
					visual_vector.as_deref(),
					desired,
					&child,
				)
			})
			.await?;

		Ok(match scored {
			Some(results) if partial => SearchOutcome::partial(results, "modality_unavailable"),
			Some(results) => SearchOutcome::complete(results),
			None => SearchOutcome::partial(Vec::new(), "deadline_expired"),
		})
	}

	// ------------------------------------------------------------------
	// Deadline plumbing
	// ------------------------------------------------------------------

	/// Run a scoring closure off the async runtime under the deadline.
	/// `Ok(None)` means the deadline expired; results computed so far are
	/// abandoned by cancelling the scorer's token.
	async fn run_scored<T: Send + 'static>(
		&self,
		deadline: Instant,
		cancel: &CancellationToken,
		score: impl FnOnce(CancellationToken) -> Result<Vec<T>> + Send + 'static,
	) -> Result<Option<Vec<T>>> {
		if cancel.is_cancelled() {
			return Err(CoreError::Cancelled);
		}
		let Some(budget) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
		else {
			return Ok(None);
		};

		let child = cancel.child_token();
		let scorer_token = child.clone();
		let task = tokio::task::spawn_blocking(move || score(scorer_token));

		match tokio::time::timeout(budget, task).await {
			Ok(Ok(Ok(results))) => Ok(Some(results)),
			Ok(Ok(Err(CoreError::Cancelled))) => Err(CoreError::Cancelled),
			Ok(Ok(Err(err))) => Err(err),
			Ok(Err(join_err)) => Err(CoreError::SearchUnavailable(join_err.to_string())),
			Err(_elapsed) => {
				child.cancel();
				Ok(None)
			}
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;
	use crate::test_support::{test_engine, StubText, TEXT_DIM, VISUAL_DIM};
	use crate::{EngineBuilder, EngineConfig};
	use previs_core::store::AssetWrite;
	use previs_core::tags::{SourcedAssignment, TagAssignment, TagSource};
	use previs_core::{
		AssetId, AssetRecord, ExtractionMethod, KeyframeRecord, MediaType, ProcessingStatus,
	};
	use previs_embed::{EmbeddingService, ServiceConfig, TextEmbedder, VisualEmbedder};
	use std::sync::Arc;

	fn cancel() -> CancellationToken {
		CancellationToken::new()
	}

	/// Seed an asset directly in the store with chosen vectors.
	fn seed_asset(
		engine: &Engine,
		id: &str,
		l3: &str,
		text_hot: usize,
		visual_hot: usize,
		keyframe_ts: f64,
		duration: f64,
	) {
		let asset_id = AssetId::from(id);
		let mut text = vec![0.0; TEXT_DIM];
		text[text_hot] = 1.0;
		let mut visual = vec![0.0; VISUAL_DIM];
		visual[visual_hot] = 1.0;
		let keyframe = KeyframeRecord {
			id: asset_id.keyframe(0),
			asset_id: asset_id.clone(),
			timestamp_s: keyframe_ts,
			thumbnail_path: format!("/thumbs/{id}/0.jpg").into(),
			method: ExtractionMethod::SceneChange,
			scene_score: Some(0.8),
		};
		engine
			.store()
			.commit(AssetWrite {
				asset: AssetRecord {
					id: asset_id.clone(),
					path: format!("/media/{id}.mp4").into(),
					media_type: MediaType::Video,
					duration_s: Some(duration),
					width: 1920,
					height: 1080,
					created_at: 1_700_000_000,
					status: ProcessingStatus::Completed,
					tags: vec![SourcedAssignment {
						assignment: TagAssignment::chain(
							"scene",
							Some("exterior"),
							Some(l3),
							None,
						),
						source: TagSource::Filename,
						confidence: 1.0,
					}],
					free_tags: vec![],
					summary: format!("{id} {l3}"),
					caption: None,
					keyframes: vec![asset_id.keyframe(0)],
					segments: vec![],
					needs_review: false,
					no_proxy: false,
					keyframes_partial: false,
				},
				text_embedding: text,
				keyframes: vec![(keyframe, visual)],
				segments: vec![],
			})
			.unwrap();
	}

	#[tokio::test]
	async fn test_tag_only_search() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		seed_asset(&engine, "aaaa000000000001", "sunset", 0, 0, 2.0, 30.0);
		seed_asset(&engine, "aaaa000000000002", "night", 1, 1, 2.0, 30.0);

		let mut query = engine.default_query("");
		query.mode = SearchMode::TagOnly;
		query.tags = vec![TagAssignment::chain("scene", Some("exterior"), Some("sunset"), None)];
		let outcome = engine.search(query, &cancel()).await.unwrap();

		assert!(!outcome.partial);
		assert_eq!(outcome.results.len(), 1);
		assert_eq!(outcome.results[0].asset_id, AssetId::from("aaaa000000000001"));
	}

	#[tokio::test]
	async fn test_hybrid_search_complete() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		seed_asset(&engine, "aaaa000000000001", "sunset", 0, 0, 2.0, 30.0);
		seed_asset(&engine, "aaaa000000000002", "ocean", 1, 1, 2.0, 30.0);

		let mut query = engine.default_query("sunset over ocean");
		query.tags = vec![TagAssignment::chain("scene", Some("exterior"), None, None)];
		let outcome = engine.search(query, &cancel()).await.unwrap();

		assert!(!outcome.partial);
		assert_eq!(outcome.results.len(), 2);
		assert!(outcome.results[0].score >= outcome.results[1].score);
		for hit in &outcome.results {
			assert!(hit.sub_scores.tag.is_some());
			assert!(hit.sub_scores.text.is_some());
		}
	}

	#[tokio::test]
	async fn test_empty_store_no_match() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let outcome = engine
			.search(engine.default_query("anything"), &cancel())
			.await
			.unwrap();
		assert!(outcome.results.is_empty());
		assert_eq!(outcome.diagnostic.as_deref(), Some("no_match"));
	}

	#[tokio::test]
	async fn test_vector_only_without_text_provider_unavailable() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = EngineConfig::default();
		config.store_dir = dir.path().join("store");
		config.text_dim = TEXT_DIM;
		config.visual_dim = VISUAL_DIM;
		let embed = Arc::new(
			EmbeddingService::new(
				ServiceConfig {
					text_dim: TEXT_DIM,
					visual_dim: VISUAL_DIM,
					..ServiceConfig::default()
				},
				vec![], // no text providers at all
				vec![],
			)
			.unwrap(),
		);
		let engine = EngineBuilder::new(config, embed).build().unwrap();

		let mut query = engine.default_query("sunset");
		query.mode = SearchMode::VectorOnly;
		let err = engine.search(query, &cancel()).await.unwrap_err();
		assert_eq!(err.kind(), "search_unavailable");
	}

	#[tokio::test]
	async fn test_hybrid_degrades_to_partial_without_text_provider() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = EngineConfig::default();
		config.store_dir = dir.path().join("store");
		config.text_dim = TEXT_DIM;
		config.visual_dim = VISUAL_DIM;
		let embed = Arc::new(
			EmbeddingService::new(
				ServiceConfig {
					text_dim: TEXT_DIM,
					visual_dim: VISUAL_DIM,
					..ServiceConfig::default()
				},
				vec![],
				vec![],
			)
			.unwrap(),
		);
		let engine = EngineBuilder::new(config, embed).build().unwrap();
		seed_asset(&engine, "aaaa000000000001", "sunset", 0, 0, 2.0, 30.0);

		let mut query = engine.default_query("sunset");
		query.tags = vec![TagAssignment::l1("scene")];
		let outcome = engine.search(query, &cancel()).await.unwrap();

		assert!(outcome.partial);
		assert_eq!(outcome.diagnostic.as_deref(), Some("text_modality_unavailable"));
		assert_eq!(outcome.results.len(), 1);
		assert_eq!(outcome.results[0].sub_scores.text, Some(0.0));
	}

	#[tokio::test]
	async fn test_multimodal_search_fuses() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		seed_asset(&engine, "aaaa000000000001", "sunset", 0, 0, 2.0, 30.0);

		let query = engine.default_query("sunset over the sea");
		let outcome = engine
			.multimodal_search(query, None, &cancel())
			.await
			.unwrap();
		assert!(!outcome.partial);
		assert_eq!(outcome.results.len(), 1);
		let hit = &outcome.results[0];
		assert!(hit.sub_scores.tag.is_some());
		assert!(hit.sub_scores.text.is_some());
		assert!(hit.sub_scores.visual.is_some());
	}

	#[tokio::test]
	async fn test_search_by_image_matches_keyframe() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		// StubVisual embeds images by byte-sum % dim; bytes [1] → hot 1.
		seed_asset(&engine, "aaaa000000000001", "sunset", 0, 1, 2.0, 30.0);
		seed_asset(&engine, "aaaa000000000002", "ocean", 1, 2, 2.0, 30.0);

		let outcome = engine
			.search_by_image(ImageInput::Bytes(vec![1]), None, &cancel())
			.await
			.unwrap();
		assert_eq!(outcome.results[0].asset_id, AssetId::from("aaaa000000000001"));
		assert_eq!(outcome.results[0].sub_scores.visual, Some(1.0));
		assert_eq!(outcome.results[0].matched_keyframes.len(), 1);
	}

	#[tokio::test]
	async fn test_recall_window_centered_on_keyframe() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		// 30 s asset with its keyframe at t=12.
		seed_asset(&engine, "aaaa000000000001", "night", 0, 0, 12.0, 30.0);

		let beat = Beat {
			text: "night city chase".into(),
			emotion_tags: vec![],
			scene_tags: vec![TagAssignment::chain("scene", Some("exterior"), Some("night"), None)],
			action_tags: vec![],
			target_duration_s: 6.0,
		};
		let outcome = engine
			.recall_for_beat(&beat, RecallOptions::default(), &cancel())
			.await
			.unwrap();

		assert!(!outcome.results.is_empty());
		let top = &outcome.results[0];
		assert!((top.in_s - 9.0).abs() < 1e-9);
		assert!((top.out_s - 15.0).abs() < 1e-9);
		assert!(!top.reason.is_empty());
	}

	#[tokio::test]
	async fn test_recall_respects_desired_count() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		for i in 0..6 {
			seed_asset(
				&engine,
				&format!("aaaa00000000000{i}"),
				"night",
				i % TEXT_DIM,
				i % VISUAL_DIM,
				2.0,
				30.0,
			);
		}

		let beat = Beat {
			text: "night".into(),
			emotion_tags: vec![],
			scene_tags: vec![TagAssignment::l1("scene")],
			action_tags: vec![],
			target_duration_s: 4.0,
		};
		let outcome = engine
			.recall_for_beat(
				&beat,
				RecallOptions {
					desired_count: 3,
					weights: None,
				},
				&cancel(),
			)
			.await
			.unwrap();
		assert!(outcome.results.len() <= 3);
		assert!(!outcome.results.is_empty());
	}

	#[tokio::test]
	async fn test_cancelled_search() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		seed_asset(&engine, "aaaa000000000001", "sunset", 0, 0, 2.0, 30.0);

		let token = CancellationToken::new();
		token.cancel();
		let err = engine
			.search(engine.default_query("sunset"), &token)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), "cancelled");
	}

	#[tokio::test]
	async fn test_snapshot_isolation_across_ops() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		seed_asset(&engine, "aaaa000000000001", "sunset", 0, 0, 2.0, 30.0);

		let before = engine.store().snapshot();
		seed_asset(&engine, "aaaa000000000002", "ocean", 1, 1, 2.0, 30.0);

		// A search on the old snapshot sees one asset, a fresh search two.
		let child = cancel();
		let old_hits = scoring::search(
			&before,
			&{
				let mut q = engine.default_query("x");
				q.mode = SearchMode::TagOnly;
				q.tags = vec![TagAssignment::l1("scene")];
				q
			},
			None,
			&child,
		)
		.unwrap();
		assert_eq!(old_hits.len(), 1);

		let mut query = engine.default_query("");
		query.mode = SearchMode::TagOnly;
		query.tags = vec![TagAssignment::l1("scene")];
		let fresh = engine.search(query, &cancel()).await.unwrap();
		assert_eq!(fresh.results.len(), 2);
	}

	#[tokio::test]
	async fn test_stub_text_reuse() {
		// The StubText provider is deterministic across the test module.
		let stub = StubText;
		let a = stub.embed_batch(&["abc"]).unwrap();
		let b = stub.embed_batch(&["abc"]).unwrap();
		assert_eq!(a, b);
	}

	#[tokio::test]
	async fn test_visual_stub_is_visual_dim() {
		let stub = crate::test_support::StubVisual;
		let v = stub.embed_texts(&["x"]).unwrap();
		assert_eq!(v[0].len(), VISUAL_DIM);
	}
}
