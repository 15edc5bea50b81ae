//! Asset, keyframe, and segment records.
//!
//! These are the persisted rows of the store. Vectors never live on the
//! records; they live in the store's dense matrices and are joined by
//! internal row ids. External ids are stable strings: the asset id is the
//! first 16 hex chars of the SHA-256 of the file bytes (or a caller-scoped
//! id), and child ids are `<asset>/<ordinal>`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tags::{SourcedAssignment, TagAssignment};

// ============================================================================
// Identifiers
// ============================================================================

/// Stable external id of an asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
	/// Child keyframe id for the given ordinal.
	#[must_use]
	pub fn keyframe(&self, ordinal: usize) -> KeyframeId {
		KeyframeId(format!("{}/{ordinal}", self.0))
	}

	/// Child segment id for the given ordinal.
	#[must_use]
	pub fn segment(&self, ordinal: usize) -> SegmentId {
		SegmentId(format!("{}/s{ordinal}", self.0))
	}
}

impl std::fmt::Display for AssetId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for AssetId {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

/// Stable external id of a keyframe (`<asset>/<ordinal>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyframeId(pub String);

impl std::fmt::Display for KeyframeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Stable external id of a segment (`<asset>/s<ordinal>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub String);

impl std::fmt::Display for SegmentId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

// ============================================================================
// Enumerations
// ============================================================================

/// Kind of ingested media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
	/// Moving picture with a duration
	Video,
	/// Single still image
	Image,
}

/// Lifecycle state of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
	/// Accepted, not yet picked up by a worker
	Pending,
	/// A worker is running the pipeline stages
	Processing,
	/// Fully ingested and searchable
	Completed,
	/// Terminal failure; recoverable via force re-ingest
	Failed,
}

/// How a keyframe was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
	/// Emitted at a scene-change score peak
	SceneChange,
	/// Emitted on a fixed interval grid
	Interval,
	/// Scene-change pass with interval gap fill
	Hybrid,
}

// ============================================================================
// Records
// ============================================================================

/// One ingested media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
	/// Stable external id
	pub id: AssetId,
	/// Absolute path of the source media
	pub path: PathBuf,
	/// Video or image
	pub media_type: MediaType,
	/// Duration in seconds; `None` for images
	pub duration_s: Option<f64>,
	/// Pixel width
	pub width: u32,
	/// Pixel height
	pub height: u32,
	/// Unix epoch seconds at ingest
	pub created_at: u64,
	/// Lifecycle state
	pub status: ProcessingStatus,
	/// Validated tag chains with provenance
	pub tags: Vec<SourcedAssignment>,
	/// Free-form tag strings outside the hierarchy
	#[serde(default)]
	pub free_tags: Vec<String>,
	/// Text summary fed to the text embedder
	pub summary: String,
	/// Caption or transcript, when one was produced
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub caption: Option<String>,
	/// Child keyframes, chronological
	pub keyframes: Vec<KeyframeId>,
	/// Child segments, chronological
	#[serde(default)]
	pub segments: Vec<SegmentId>,
	/// Set when L1 had to fall back to `unknown`
	#[serde(default)]
	pub needs_review: bool,
	/// Set when proxy transcode failed and the original is used downstream
	#[serde(default)]
	pub no_proxy: bool,
	/// Set when keyframe extraction stopped early on a decode failure
	#[serde(default)]
	pub keyframes_partial: bool,
}

impl AssetRecord {
	/// Bare tag tuples without provenance, for filtering and scoring.
	#[must_use]
	pub fn tag_tuples(&self) -> Vec<TagAssignment> {
		self.tags.iter().map(|t| t.assignment.clone()).collect()
	}

	/// Whether the record satisfies the completed-asset invariants:
	/// non-empty L1 and summary, and at least one keyframe for videos.
	#[must_use]
	pub fn completed_invariants_hold(&self) -> bool {
		if self.status != ProcessingStatus::Completed {
			return true;
		}
		let has_l1 = self.tags.iter().any(|t| !t.assignment.l1.is_empty());
		let keyframes_ok = self.media_type == MediaType::Image || !self.keyframes.is_empty();
		has_l1 && !self.summary.is_empty() && keyframes_ok
	}
}

/// One sampled frame of a video asset. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyframeRecord {
	/// Stable external id
	pub id: KeyframeId,
	/// Owning asset
	pub asset_id: AssetId,
	/// Seconds from the start of the asset, `0 ≤ t ≤ duration`
	pub timestamp_s: f64,
	/// Stored thumbnail path (`<thumbs>/<asset_id>/<timestamp_ms>.jpg`)
	pub thumbnail_path: PathBuf,
	/// Strategy that emitted this frame
	pub method: ExtractionMethod,
	/// Scene-change score at emission, when the strategy computed one
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scene_score: Option<f32>,
}

/// A semantically coherent span of a video asset, bounded by adjacent
/// scene-change keyframes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
	/// Stable external id
	pub id: SegmentId,
	/// Owning asset
	pub asset_id: AssetId,
	/// Span start in seconds
	pub start_s: f64,
	/// Span end in seconds, `start < end ≤ duration`
	pub end_s: f64,
	/// Textual description fed to the text embedder
	pub description: String,
	/// Tags derived from keyframes inside the span
	pub tags: Vec<TagAssignment>,
}

impl SegmentRecord {
	/// Span length in seconds.
	#[must_use]
	pub fn span_s(&self) -> f64 {
		self.end_s - self.start_s
	}
}
