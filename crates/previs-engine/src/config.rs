//! Engine configuration.
//!
//! The full recognized option surface, serde-deserializable from the
//! host's config file. Strategy and mode strings are closed enums, so an
//! unknown value fails deserialization with the offending field in the
//! message instead of silently defaulting; everything else is validated
//! by [`EngineConfig::validate`] before the engine starts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use previs_core::query::{HybridWeights, MultimodalWeights, SearchMode};
use previs_core::store::StoreConfig;
use previs_core::{CoreError, Result};
use previs_perception::scene::{KeyframeParams, Strategy};

// ============================================================================
// Sections
// ============================================================================

/// Keyframe extraction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyframeSection {
	/// Selection strategy
	pub strategy: Strategy,
	/// Interval grid spacing in seconds
	pub interval_s: f64,
	/// Scene-change threshold in [0, 1]
	pub threshold: f32,
	/// Hard cap per asset
	pub max_keyframes: usize,
	/// Burst suppression spacing in seconds
	pub min_interval_s: f64,
	/// Hybrid gap-fill bound in seconds
	pub max_gap_s: f64,
}

impl Default for KeyframeSection {
	fn default() -> Self {
		let params = KeyframeParams::default();
		Self {
			strategy: params.strategy,
			interval_s: params.interval_s,
			threshold: params.threshold,
			max_keyframes: params.max_keyframes,
			min_interval_s: params.min_interval_s,
			max_gap_s: params.max_gap_s,
		}
	}
}

impl KeyframeSection {
	/// Convert into the perception-side parameter struct.
	#[must_use]
	pub fn to_params(&self, strategy_override: Option<Strategy>) -> KeyframeParams {
		KeyframeParams {
			strategy: strategy_override.unwrap_or(self.strategy),
			threshold: self.threshold,
			interval_s: self.interval_s,
			min_interval_s: self.min_interval_s,
			max_gap_s: self.max_gap_s,
			max_keyframes: self.max_keyframes,
		}
	}
}

/// Ingestion pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
	/// Concurrent asset workers; 0 means the CPU core count
	pub workers: usize,
	/// Global cap on concurrent embedding calls
	pub embed_concurrency: usize,
	/// Proxy transcode wall-clock limit, seconds
	pub transcode_timeout_s: u64,
	/// Keyframe extraction wall-clock limit, seconds
	pub extract_timeout_s: u64,
	/// Reject files larger than this many bytes, when set
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_file_bytes: Option<u64>,
}

impl Default for IngestSection {
	fn default() -> Self {
		Self {
			workers: 0,
			embed_concurrency: 4,
			transcode_timeout_s: 300,
			extract_timeout_s: 120,
			max_file_bytes: None,
		}
	}
}

impl IngestSection {
	/// Effective worker count.
	#[must_use]
	pub fn effective_workers(&self) -> usize {
		if self.workers > 0 {
			self.workers
		} else {
			std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
		}
	}
}

/// Search and recall options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
	/// Mode used when a query does not name one
	pub default_mode: SearchMode,
	/// Hybrid tag weight
	pub tag_weight: f32,
	/// Hybrid vector weight
	pub vector_weight: f32,
	/// Multimodal fusion weights
	pub multimodal_weights: MultimodalWeights,
	/// Default minimum combined score
	pub min_score: f32,
	/// Default result limit
	pub default_limit: usize,
	/// Total search deadline in milliseconds
	pub deadline_ms: u64,
	/// Per-call embedding timeout in seconds
	pub embed_timeout_s: u64,
	/// Retries after a transient embedding failure
	pub embed_retries: u32,
}

impl Default for SearchSection {
	fn default() -> Self {
		let weights = HybridWeights::default();
		Self {
			default_mode: SearchMode::Hybrid,
			tag_weight: weights.tag,
			vector_weight: weights.vector,
			multimodal_weights: MultimodalWeights::default(),
			min_score: 0.0,
			default_limit: 10,
			deadline_ms: 2000,
			embed_timeout_s: 30,
			embed_retries: 2,
		}
	}
}

impl SearchSection {
	/// The hybrid weights as a validated pair.
	#[must_use]
	pub const fn hybrid_weights(&self) -> HybridWeights {
		HybridWeights {
			tag: self.tag_weight,
			vector: self.vector_weight,
		}
	}
}

/// Embedding cache options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
	/// Embedding cache capacity, in entries
	pub embedding_capacity: usize,
}

impl Default for CacheSection {
	fn default() -> Self {
		Self {
			embedding_capacity: 10_000,
		}
	}
}

/// Segment derivation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentsSection {
	/// Whether segment records are derived at ingest
	pub enabled: bool,
	/// Spans shorter than this are skipped, seconds
	pub min_span_s: f64,
}

impl Default for SegmentsSection {
	fn default() -> Self {
		Self {
			enabled: false,
			min_span_s: 2.0,
		}
	}
}

// ============================================================================
// EngineConfig
// ============================================================================

/// The complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Root of the persisted store (`assets.jsonl`, vector matrices, ...)
	pub store_dir: PathBuf,
	/// Thumbnail root (`<thumbs>/<asset_id>/<ms>.jpg`)
	pub thumbs_dir: PathBuf,
	/// Proxy root (`<proxies>/<asset_id>.mp4`)
	pub proxies_dir: PathBuf,
	/// Scratch space for sampling artifacts
	pub work_dir: PathBuf,
	/// Rebuild the store when its persisted config disagrees
	pub allow_rebuild: bool,
	/// Text embedding dimension; must match the text provider
	pub text_dim: usize,
	/// Visual embedding dimension; must match the visual provider
	pub visual_dim: usize,
	/// Text provider identifier
	pub text_provider: String,
	/// Visual provider identifier
	pub visual_provider: String,
	/// Keyframe extraction options
	pub keyframe: KeyframeSection,
	/// Ingestion options
	pub ingest: IngestSection,
	/// Search options
	pub search: SearchSection,
	/// Cache options
	pub cache: CacheSection,
	/// Segment options
	pub segments: SegmentsSection,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			store_dir: PathBuf::from("store"),
			thumbs_dir: PathBuf::from("thumbs"),
			proxies_dir: PathBuf::from("proxies"),
			work_dir: std::env::temp_dir().join("previs-work"),
			allow_rebuild: false,
			text_dim: 384,
			visual_dim: 512,
			text_provider: "bge-small-en-v1.5".to_string(),
			visual_provider: "mobileclip-s2".to_string(),
			keyframe: KeyframeSection::default(),
			ingest: IngestSection::default(),
			search: SearchSection::default(),
			cache: CacheSection::default(),
			segments: SegmentsSection::default(),
		}
	}
}

impl EngineConfig {
	/// Parse a configuration from JSON, surfacing the offending field for
	/// unknown enum values and malformed entries.
	///
	/// # Errors
	///
	/// Returns [`CoreError::InvalidInput`] with the serde path on failure.
	pub fn from_json(json: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(json)
			.map_err(|e| CoreError::InvalidInput(format!("config: {e}")))?;
		config.validate()?;
		Ok(config)
	}

	/// Validate cross-field constraints.
	///
	/// # Errors
	///
	/// Returns [`CoreError::InvalidInput`] (or [`CoreError::InvalidQuery`]
	/// for weight violations) naming the offending option.
	pub fn validate(&self) -> Result<()> {
		if self.text_dim == 0 || self.visual_dim == 0 {
			return Err(CoreError::InvalidInput(
				"text_dim and visual_dim must be positive".into(),
			));
		}
		if self.search.default_limit == 0 {
			return Err(CoreError::InvalidInput(
				"search.default_limit must be positive".into(),
			));
		}
		if !(0.0..=1.0).contains(&self.keyframe.threshold) {
			return Err(CoreError::InvalidInput(
				"keyframe.threshold must be in [0, 1]".into(),
			));
		}
		if self.keyframe.interval_s <= 0.0 {
			return Err(CoreError::InvalidInput(
				"keyframe.interval_s must be positive".into(),
			));
		}
		if self.keyframe.max_keyframes == 0 {
			return Err(CoreError::InvalidInput(
				"keyframe.max_keyframes must be positive".into(),
			));
		}
		if self.ingest.embed_concurrency == 0 {
			return Err(CoreError::InvalidInput(
				"ingest.embed_concurrency must be positive".into(),
			));
		}
		self.search.hybrid_weights().validate()?;
		self.search.multimodal_weights.validate()?;
		if self.segments.enabled && self.segments.min_span_s <= 0.0 {
			return Err(CoreError::InvalidInput(
				"segments.min_span_s must be positive".into(),
			));
		}
		Ok(())
	}

	/// The store-level configuration derived from this one.
	#[must_use]
	pub fn store_config(&self) -> StoreConfig {
		StoreConfig {
			text_dim: self.text_dim,
			visual_dim: self.visual_dim,
			text_model: self.text_provider.clone(),
			visual_model: self.visual_provider.clone(),
			max_assets: None,
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_validate() {
		EngineConfig::default().validate().unwrap();
	}

	#[test]
	fn test_documented_defaults() {
		let config = EngineConfig::default();
		assert_eq!(config.text_dim, 384);
		assert_eq!(config.visual_dim, 512);
		assert_eq!(config.keyframe.strategy, Strategy::Hybrid);
		assert!((config.keyframe.threshold - 0.3).abs() < 1e-6);
		assert_eq!(config.keyframe.max_keyframes, 60);
		assert_eq!(config.ingest.embed_concurrency, 4);
		assert_eq!(config.search.deadline_ms, 2000);
		assert_eq!(config.search.embed_timeout_s, 30);
		assert_eq!(config.cache.embedding_capacity, 10_000);
	}

	#[test]
	fn test_unknown_strategy_rejected_with_context() {
		let err = EngineConfig::from_json(
			r#"{"keyframe": {"strategy": "psychic"}}"#,
		)
		.unwrap_err();
		assert_eq!(err.kind(), "invalid_input");
		assert!(err.to_string().contains("strategy") || err.to_string().contains("psychic"));
	}

	#[test]
	fn test_bad_weights_rejected() {
		let err = EngineConfig::from_json(
			r#"{"search": {"tag_weight": 0.5, "vector_weight": 0.6}}"#,
		)
		.unwrap_err();
		assert_eq!(err.kind(), "invalid_query");
	}

	#[test]
	fn test_zero_dim_rejected() {
		let mut config = EngineConfig::default();
		config.text_dim = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_partial_json_overlays_defaults() {
		let config = EngineConfig::from_json(
			r#"{"text_dim": 768, "keyframe": {"strategy": "interval"}}"#,
		)
		.unwrap();
		assert_eq!(config.text_dim, 768);
		assert_eq!(config.keyframe.strategy, Strategy::Interval);
		// Untouched sections keep their defaults.
		assert_eq!(config.search.default_limit, 10);
	}

	#[test]
	fn test_strategy_override() {
		let section = KeyframeSection::default();
		let params = section.to_params(Some(Strategy::SceneChange));
		assert_eq!(params.strategy, Strategy::SceneChange);
		assert_eq!(section.to_params(None).strategy, Strategy::Hybrid);
	}

	#[test]
	fn test_store_config_mirrors_dims() {
		let config = EngineConfig::default();
		let store = config.store_config();
		assert_eq!(store.text_dim, 384);
		assert_eq!(store.visual_model, "mobileclip-s2");
	}
}
