//! Zero-shot keyframe tagging via the cross-modal embedding space.
//!
//! No dedicated classifier: the L3 vocabulary is encoded once through the
//! visual model's text tower ("scene exterior sunset", ...), and each
//! keyframe thumbnail is scored against those label vectors by cosine
//! similarity. Classes clearing the confidence threshold flow into the
//! asset's tag set as keyframe-derived assignments.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use previs_core::tags::enrich::{EnrichmentError, FrameTagScore, FrameTagger};
use previs_core::tags::{TagAssignment, TagHierarchy};
use previs_core::Result;
use previs_embed::{EmbeddingService, ImageInput};

use crate::map_embed_error;

/// Keep only the strongest labels per frame.
const TOP_LABELS_PER_FRAME: usize = 5;

/// A [`FrameTagger`] that scores thumbnails against the L3 vocabulary in
/// the visual embedding space.
pub struct ZeroShotFrameTagger {
	service: Arc<EmbeddingService>,
	labels: Vec<(TagAssignment, Vec<f32>)>,
}

impl ZeroShotFrameTagger {
	/// Encode the hierarchy's L3 chains as label vectors.
	///
	/// # Errors
	///
	/// Returns `EmbeddingUnavailable` when the visual text tower is down.
	#[instrument(skip_all)]
	pub fn new(service: Arc<EmbeddingService>, hierarchy: &TagHierarchy) -> Result<Self> {
		let chains = hierarchy.l3_chains();
		let phrases: Vec<String> = chains
			.iter()
			.map(|chain| chain.display_path().replace('/', " "))
			.collect();
		let vectors = service
			.embed_text_for_visual(&phrases)
			.map_err(|e| map_embed_error(e, previs_core::Modality::Visual))?;

		debug!(labels = chains.len(), "zero-shot label vectors encoded");
		Ok(Self {
			service,
			labels: chains.into_iter().zip(vectors).collect(),
		})
	}

	/// Number of encoded labels.
	#[must_use]
	pub fn label_count(&self) -> usize {
		self.labels.len()
	}
}

impl FrameTagger for ZeroShotFrameTagger {
	fn tag_frame(&self, thumbnail: &Path) -> std::result::Result<Vec<FrameTagScore>, EnrichmentError> {
		let embedded = self
			.service
			.embed_images(&[ImageInput::Path(thumbnail.to_path_buf())])
			.map_err(|e| EnrichmentError(e.to_string()))?;
		let Some(frame_vector) = embedded.into_iter().next() else {
			return Ok(Vec::new());
		};

		let mut scores: Vec<FrameTagScore> = self
			.labels
			.iter()
			.map(|(assignment, label_vector)| FrameTagScore {
				assignment: assignment.clone(),
				score: previs_core::vector::unit_score(previs_core::vector::dot(
					&frame_vector,
					label_vector,
				)),
			})
			.collect();

		scores.sort_by(|a, b| {
			b.score
				.partial_cmp(&a.score)
				.unwrap_or(std::cmp::Ordering::Equal)
		});
		scores.truncate(TOP_LABELS_PER_FRAME);
		Ok(scores)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::test_support::{StubText, StubVisual, TEXT_DIM, VISUAL_DIM};
	use previs_embed::{ServiceConfig, TextEmbedder, VisualEmbedder};

	fn service() -> Arc<EmbeddingService> {
		Arc::new(
			EmbeddingService::new(
				ServiceConfig {
					text_dim: TEXT_DIM,
					visual_dim: VISUAL_DIM,
					..ServiceConfig::default()
				},
				vec![Arc::new(StubText) as Arc<dyn TextEmbedder>],
				vec![Arc::new(StubVisual) as Arc<dyn VisualEmbedder>],
			)
			.unwrap(),
		)
	}

	#[test]
	fn test_labels_cover_l3_vocabulary() {
		let hierarchy = TagHierarchy::default();
		let tagger = ZeroShotFrameTagger::new(service(), &hierarchy).unwrap();
		assert_eq!(tagger.label_count(), hierarchy.l3_chains().len());
	}

	#[test]
	fn test_tag_frame_returns_bounded_scores() {
		let dir = tempfile::tempdir().unwrap();
		let thumb = dir.path().join("frame.png");
		image::RgbImage::new(8, 8).save(&thumb).unwrap();

		let tagger = ZeroShotFrameTagger::new(service(), &TagHierarchy::default()).unwrap();
		let scores = tagger.tag_frame(&thumb).unwrap();
		assert!(scores.len() <= TOP_LABELS_PER_FRAME);
		for entry in &scores {
			assert!((0.0..=1.0).contains(&entry.score));
			assert!(entry.assignment.l3.is_some());
		}
		// Sorted best first.
		for pair in scores.windows(2) {
			assert!(pair[0].score >= pair[1].score);
		}
	}
}
