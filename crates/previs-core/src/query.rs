//! Query and result types for search and recall.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::asset::{AssetId, KeyframeId, SegmentId};
use crate::error::{CoreError, Result};
use crate::tags::{MatchedTag, TagAssignment, TagFilter};

// ============================================================================
// Modes & Weights
// ============================================================================

/// The four search modes. Closed enum: adding a mode is a design action,
/// and unknown strings fail deserialization instead of defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
	/// Tag match score only; vectors are never consulted
	TagOnly,
	/// Text embedding similarity only
	VectorOnly,
	/// Weighted sum of tag and vector scores
	Hybrid,
	/// Tag filters as a hard gate, then vector ranking
	FilterThenRank,
}

/// Mixing weights for [`SearchMode::Hybrid`]. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
	/// Weight of the tag match score
	pub tag: f32,
	/// Weight of the text vector score
	pub vector: f32,
}

impl Default for HybridWeights {
	fn default() -> Self {
		Self {
			tag: 0.4,
			vector: 0.6,
		}
	}
}

impl HybridWeights {
	/// Validate the sum-to-one contract.
	///
	/// # Errors
	///
	/// Returns [`CoreError::InvalidQuery`] when the weights do not sum to
	/// 1.0 within 1e-6 or any weight is negative.
	pub fn validate(&self) -> Result<()> {
		validate_weights(&[("tag", self.tag), ("vector", self.vector)])
	}
}

/// Mixing weights for multimodal fusion. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultimodalWeights {
	/// Weight of text-space similarity
	pub text: f32,
	/// Weight of cross-modal visual similarity
	pub visual: f32,
	/// Weight of the tag match score
	pub tag: f32,
}

impl Default for MultimodalWeights {
	fn default() -> Self {
		Self {
			text: 0.4,
			visual: 0.3,
			tag: 0.3,
		}
	}
}

impl MultimodalWeights {
	/// Validate the sum-to-one contract.
	///
	/// # Errors
	///
	/// Returns [`CoreError::InvalidQuery`] as [`HybridWeights::validate`].
	pub fn validate(&self) -> Result<()> {
		validate_weights(&[
			("text", self.text),
			("visual", self.visual),
			("tag", self.tag),
		])
	}
}

fn validate_weights(weights: &[(&str, f32)]) -> Result<()> {
	for (name, w) in weights {
		if *w < 0.0 {
			return Err(CoreError::InvalidQuery(format!(
				"weight `{name}` is negative ({w})"
			)));
		}
	}
	let sum: f32 = weights.iter().map(|(_, w)| w).sum();
	if (sum - 1.0).abs() > 1e-6 {
		return Err(CoreError::InvalidQuery(format!(
			"weights must sum to 1.0, got {sum}"
		)));
	}
	Ok(())
}

// ============================================================================
// Queries
// ============================================================================

/// A search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
	/// Free-text query; required for vector-backed modes
	#[serde(default)]
	pub text: String,
	/// Soft query tags contributing to the tag score
	#[serde(default)]
	pub tags: Vec<TagAssignment>,
	/// Hard constraints applied before scoring
	#[serde(default)]
	pub filter: TagFilter,
	/// Which scoring mode to run
	pub mode: SearchMode,
	/// Hybrid mixing weights
	#[serde(default)]
	pub weights: HybridWeights,
	/// Maximum results returned
	#[serde(default = "default_limit")]
	pub limit: usize,
	/// Minimum combined score; lower-scoring candidates are dropped
	#[serde(default)]
	pub min_score: f32,
}

const fn default_limit() -> usize {
	10
}

impl Query {
	/// A hybrid query over free text with default weights.
	#[must_use]
	pub fn hybrid(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			tags: Vec::new(),
			filter: TagFilter::default(),
			mode: SearchMode::Hybrid,
			weights: HybridWeights::default(),
			limit: default_limit(),
			min_score: 0.0,
		}
	}

	/// Validate mode-dependent preconditions.
	///
	/// # Errors
	///
	/// Returns [`CoreError::InvalidQuery`] for a zero limit, an empty text
	/// in a vector-backed mode, or invalid weights.
	pub fn validate(&self) -> Result<()> {
		if self.limit == 0 {
			return Err(CoreError::InvalidQuery("limit must be positive".into()));
		}
		if !(0.0..=1.0).contains(&self.min_score) {
			return Err(CoreError::InvalidQuery(format!(
				"min_score must be in [0, 1], got {}",
				self.min_score
			)));
		}
		let needs_text = matches!(
			self.mode,
			SearchMode::VectorOnly | SearchMode::Hybrid | SearchMode::FilterThenRank
		);
		if needs_text && self.text.trim().is_empty() {
			return Err(CoreError::InvalidQuery(format!(
				"mode {:?} requires non-empty query text",
				self.mode
			)));
		}
		if self.mode == SearchMode::Hybrid {
			self.weights.validate()?;
		}
		Ok(())
	}
}

/// A screenplay beat handed to recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beat {
	/// Beat description text
	pub text: String,
	/// Emotion tag hints
	#[serde(default)]
	pub emotion_tags: Vec<String>,
	/// Scene tag hints
	#[serde(default)]
	pub scene_tags: Vec<TagAssignment>,
	/// Action tag hints
	#[serde(default)]
	pub action_tags: Vec<TagAssignment>,
	/// Desired clip duration in seconds
	pub target_duration_s: f64,
}

impl Beat {
	/// Composite query string: beat text plus hint tags, the same text the
	/// recall layer embeds.
	#[must_use]
	pub fn composite_text(&self) -> String {
		let mut text = self.text.trim().to_string();
		for tag in &self.emotion_tags {
			text.push(' ');
			text.push_str(tag);
		}
		for tag in self.scene_tags.iter().chain(self.action_tags.iter()) {
			text.push(' ');
			text.push_str(&tag.display_path().replace('/', " "));
		}
		text
	}

	/// All hint tags as soft query tags.
	#[must_use]
	pub fn hint_tags(&self) -> Vec<TagAssignment> {
		self.scene_tags
			.iter()
			.chain(self.action_tags.iter())
			.cloned()
			.collect()
	}
}

// ============================================================================
// Results
// ============================================================================

/// Per-modality sub-scores. `None` means the modality was not requested;
/// a missing modality on the candidate side scores 0.0, never `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
	/// Tag match score in [0, 1]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tag: Option<f32>,
	/// Text-space similarity in [0, 1]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<f32>,
	/// Cross-modal visual similarity in [0, 1]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub visual: Option<f32>,
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
	/// The matched asset
	pub asset_id: AssetId,
	/// The matched segment, when segment recall produced the hit
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub segment_id: Option<SegmentId>,
	/// Combined score in [0, 1]
	pub score: f32,
	/// Per-modality breakdown
	pub sub_scores: SubScores,
	/// Query tags that matched, with their levels
	pub matched_tags: SmallVec<[MatchedTag; 8]>,
	/// Keyframes that contributed the visual score, best first
	#[serde(default)]
	pub matched_keyframes: Vec<KeyframeId>,
	/// Human-readable explanation assembled from the top matched tags
	pub reason: String,
}

/// One recall candidate with a suggested cut window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneCandidate {
	/// The candidate asset
	pub asset_id: AssetId,
	/// Segment enclosing the anchor, when segment records exist
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub segment_id: Option<SegmentId>,
	/// Suggested in point, seconds
	pub in_s: f64,
	/// Suggested out point, seconds
	pub out_s: f64,
	/// Keyframe the window is centered on
	pub anchor: KeyframeId,
	/// Combined score in [0, 1]
	pub score: f32,
	/// Per-modality breakdown
	pub sub_scores: SubScores,
	/// Human-readable explanation
	pub reason: String,
}

/// A ranked result list with partial/no-match diagnostics.
///
/// An empty list is not an error; `diagnostic` explains it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome<T> {
	/// Ranked hits, best first
	pub results: Vec<T>,
	/// True when a deadline truncated the work or a modality was missing
	#[serde(default)]
	pub partial: bool,
	/// Machine-readable note (`no_match`, `deadline_expired`, ...)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub diagnostic: Option<String>,
}

impl<T> SearchOutcome<T> {
	/// A complete outcome, annotated `no_match` when empty.
	#[must_use]
	pub fn complete(results: Vec<T>) -> Self {
		let diagnostic = results.is_empty().then(|| "no_match".to_string());
		Self {
			results,
			partial: false,
			diagnostic,
		}
	}

	/// A truncated outcome with the given diagnostic.
	#[must_use]
	pub fn partial(results: Vec<T>, diagnostic: impl Into<String>) -> Self {
		Self {
			results,
			partial: true,
			diagnostic: Some(diagnostic.into()),
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_default_weights_validate() {
		HybridWeights::default().validate().unwrap();
		MultimodalWeights::default().validate().unwrap();
	}

	#[test]
	fn test_weights_must_sum_to_one() {
		let err = HybridWeights { tag: 0.5, vector: 0.6 }.validate().unwrap_err();
		assert_eq!(err.kind(), "invalid_query");
		let err = MultimodalWeights { text: 1.0, visual: 0.5, tag: -0.5 }
			.validate()
			.unwrap_err();
		assert_eq!(err.kind(), "invalid_query");
	}

	#[test]
	fn test_empty_text_rejected_in_vector_mode() {
		let mut q = Query::hybrid("");
		q.mode = SearchMode::VectorOnly;
		assert_eq!(q.validate().unwrap_err().kind(), "invalid_query");
	}

	#[test]
	fn test_empty_text_allowed_in_tag_mode() {
		let mut q = Query::hybrid("");
		q.mode = SearchMode::TagOnly;
		q.validate().unwrap();
	}

	#[test]
	fn test_zero_limit_rejected() {
		let mut q = Query::hybrid("sunset");
		q.limit = 0;
		assert_eq!(q.validate().unwrap_err().kind(), "invalid_query");
	}

	#[test]
	fn test_unknown_mode_fails_deserialization() {
		let err = serde_json::from_str::<SearchMode>("\"psychic\"");
		assert!(err.is_err());
	}

	#[test]
	fn test_beat_composite_text() {
		let beat = Beat {
			text: "night city chase".into(),
			emotion_tags: vec!["tense".into()],
			scene_tags: vec![TagAssignment::chain("scene", Some("urban"), None, None)],
			action_tags: vec![TagAssignment::chain("action", Some("motion"), Some("chase"), None)],
			target_duration_s: 6.0,
		};
		let text = beat.composite_text();
		assert!(text.starts_with("night city chase"));
		assert!(text.contains("tense"));
		assert!(text.contains("scene urban"));
		assert!(text.contains("action motion chase"));
		assert_eq!(beat.hint_tags().len(), 2);
	}

	#[test]
	fn test_outcome_no_match_diagnostic() {
		let outcome: SearchOutcome<ScoredResult> = SearchOutcome::complete(Vec::new());
		assert!(!outcome.partial);
		assert_eq!(outcome.diagnostic.as_deref(), Some("no_match"));
	}
}
