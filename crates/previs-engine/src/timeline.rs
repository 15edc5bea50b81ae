//! Rough-cut assembly.
//!
//! The last step from retrieval to a reviewable timeline: run recall for
//! every beat and lay the top surviving candidate per beat end to end. A
//! beat with no candidates leaves a gap entry rather than failing the
//! cut; an editor fills gaps, a pipeline error would lose the whole pass.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use previs_core::query::Beat;
use previs_core::{AssetId, Result};

use crate::ops::RecallOptions;
use crate::Engine;

/// One slot of the rough cut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutEntry {
	/// Index of the beat this entry covers
	pub beat_index: usize,
	/// Chosen asset, or `None` for a gap
	#[serde(skip_serializing_if = "Option::is_none")]
	pub asset_id: Option<AssetId>,
	/// In point within the asset, seconds
	pub in_s: f64,
	/// Out point within the asset, seconds
	pub out_s: f64,
	/// Combined retrieval score of the chosen candidate
	pub score: f32,
}

impl CutEntry {
	/// Entry duration in seconds.
	#[must_use]
	pub fn duration_s(&self) -> f64 {
		self.out_s - self.in_s
	}

	/// Whether this slot is an unfilled gap.
	#[must_use]
	pub const fn is_gap(&self) -> bool {
		self.asset_id.is_none()
	}
}

/// A rough-cut timeline across a beat list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoughCut {
	/// One entry per beat, in beat order
	pub entries: Vec<CutEntry>,
}

impl RoughCut {
	/// Total timeline duration (gaps count at their target duration).
	#[must_use]
	pub fn total_duration_s(&self) -> f64 {
		self.entries.iter().map(CutEntry::duration_s).sum()
	}

	/// How many beats found no candidate.
	#[must_use]
	pub fn gap_count(&self) -> usize {
		self.entries.iter().filter(|e| e.is_gap()).count()
	}
}

impl Engine {
	/// Assemble a rough cut: recall per beat, top candidate per slot.
	///
	/// # Errors
	///
	/// Returns `Cancelled` on cooperative cancellation; recall failures
	/// for individual beats degrade to gaps.
	#[instrument(skip_all, fields(beats = beats.len()))]
	pub async fn rough_cut(
		&self,
		beats: &[Beat],
		options: RecallOptions,
		cancel: &CancellationToken,
	) -> Result<RoughCut> {
		let mut entries = Vec::with_capacity(beats.len());
		for (beat_index, beat) in beats.iter().enumerate() {
			if cancel.is_cancelled() {
				return Err(previs_core::CoreError::Cancelled);
			}
			let outcome = match self.recall_for_beat(beat, options.clone(), cancel).await {
				Ok(outcome) => outcome,
				Err(previs_core::CoreError::Cancelled) => {
					return Err(previs_core::CoreError::Cancelled)
				}
				Err(err) => {
					debug!(beat_index, %err, "recall failed; leaving a gap");
					entries.push(gap_entry(beat_index, beat));
					continue;
				}
			};
			match outcome.results.into_iter().next() {
				Some(top) => entries.push(CutEntry {
					beat_index,
					asset_id: Some(top.asset_id),
					in_s: top.in_s,
					out_s: top.out_s,
					score: top.score,
				}),
				None => entries.push(gap_entry(beat_index, beat)),
			}
		}
		Ok(RoughCut { entries })
	}
}

fn gap_entry(beat_index: usize, beat: &Beat) -> CutEntry {
	CutEntry {
		beat_index,
		asset_id: None,
		in_s: 0.0,
		out_s: beat.target_duration_s,
		score: 0.0,
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;
	use crate::test_support::test_engine;
	use previs_core::store::AssetWrite;
	use previs_core::tags::{SourcedAssignment, TagAssignment, TagSource};
	use previs_core::{
		AssetRecord, ExtractionMethod, KeyframeRecord, MediaType, ProcessingStatus,
	};

	fn seed(engine: &Engine, id: &str, l3: &str) {
		let asset_id = AssetId::from(id);
		let keyframe = KeyframeRecord {
			id: asset_id.keyframe(0),
			asset_id: asset_id.clone(),
			timestamp_s: 10.0,
			thumbnail_path: format!("/thumbs/{id}/0.jpg").into(),
			method: ExtractionMethod::SceneChange,
			scene_score: Some(0.9),
		};
		engine
			.store()
			.commit(AssetWrite {
				asset: AssetRecord {
					id: asset_id.clone(),
					path: format!("/media/{id}.mp4").into(),
					media_type: MediaType::Video,
					duration_s: Some(20.0),
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
					summary: format!("{id}"),
					caption: None,
					keyframes: vec![asset_id.keyframe(0)],
					segments: vec![],
					needs_review: false,
					no_proxy: false,
					keyframes_partial: false,
				},
				text_embedding: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
				keyframes: vec![(keyframe, vec![1.0, 0.0, 0.0, 0.0])],
				segments: vec![],
			})
			.unwrap();
	}

	fn beat(text: &str, l3: &str, target: f64) -> Beat {
		Beat {
			text: text.into(),
			emotion_tags: vec![],
			scene_tags: vec![TagAssignment::chain("scene", Some("exterior"), Some(l3), None)],
			action_tags: vec![],
			target_duration_s: target,
		}
	}

	#[tokio::test]
	async fn test_rough_cut_fills_slots_and_gaps() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		seed(&engine, "aaaa000000000001", "sunset");

		let beats = vec![
			beat("golden light on water", "sunset", 4.0),
			// No snow asset exists; this slot must be a gap.
			beat("blizzard whiteout", "snow", 3.0),
		];
		let cut = engine
			.rough_cut(&beats, RecallOptions::default(), &CancellationToken::new())
			.await
			.unwrap();

		assert_eq!(cut.entries.len(), 2);
		assert!(!cut.entries[0].is_gap());
		assert_eq!(cut.entries[0].beat_index, 0);
		assert_eq!(cut.entries[0].duration_s(), 4.0);
		assert!(cut.entries[1].is_gap());
		assert_eq!(cut.gap_count(), 1);
		assert_eq!(cut.total_duration_s(), 7.0);
	}

	#[tokio::test]
	async fn test_rough_cut_cancelled() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let token = CancellationToken::new();
		token.cancel();
		let err = engine
			.rough_cut(&[beat("x", "sunset", 2.0)], RecallOptions::default(), &token)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), "cancelled");
	}
}
