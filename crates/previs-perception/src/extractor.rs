//! Keyframe extraction pipeline for one asset.
//!
//! Coordinates sampling, scene scoring, strategy selection, and thumbnail
//! writes. Frame-level failures degrade to a `partial` result rather than
//! failing the asset; only zero extractable frames is fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{PerceptionError, Result};
use crate::frames::{cleanup_samples, extract_frame_at, sample_frames};
use crate::scene::{score_samples, select_keyframes, KeyframeParams, Strategy};
use crate::thumbs::{write_thumbnail, DEFAULT_MAX_EDGE};

/// Sampling density for scene analysis, frames per second.
const SAMPLE_FPS: f64 = 4.0;

/// Cap on analysis samples for very long clips.
const MAX_SAMPLES: usize = 2000;

// ============================================================================
// Configuration & Output
// ============================================================================

/// Configuration for keyframe extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
	/// Strategy and thresholds
	pub params: KeyframeParams,
	/// Bound on the longer thumbnail edge, in pixels
	pub thumb_max_edge: u32,
}

impl Default for ExtractorConfig {
	fn default() -> Self {
		Self {
			params: KeyframeParams::default(),
			thumb_max_edge: DEFAULT_MAX_EDGE,
		}
	}
}

/// One extracted keyframe with its stored thumbnail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyframeOutput {
	/// Timestamp in seconds
	pub timestamp_s: f64,
	/// Timestamp rounded to the nearest millisecond (thumbnail key)
	pub timestamp_ms: u64,
	/// Written thumbnail path
	pub thumbnail_path: PathBuf,
	/// Scene-change score, for score-driven selections
	pub scene_score: Option<f32>,
}

/// Output of keyframe extraction for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
	/// Extracted keyframes, timestamps strictly increasing
	pub keyframes: Vec<KeyframeOutput>,
	/// True when some frames were lost to decode failures
	pub partial: bool,
}

// ============================================================================
// Extraction
// ============================================================================

/// Extract keyframes from a video and write their thumbnails.
///
/// `video_path` should be the proxy when one exists. Sampling artifacts
/// go to `work_dir` and are removed before returning; thumbnails go to
/// `<thumbs_dir>/<asset_id>/<ms>.jpg`.
///
/// # Errors
///
/// Returns [`PerceptionError::Cancelled`] on cancellation,
/// [`PerceptionError::NoFramesExtracted`] when nothing could be decoded,
/// and I/O or FFmpeg errors from the sampling pass.
#[instrument(skip_all, fields(video = %video_path.as_ref().display(), asset = asset_id))]
pub async fn extract_keyframes(
	video_path: impl AsRef<Path>,
	duration_s: f64,
	asset_id: &str,
	thumbs_dir: &Path,
	work_dir: &Path,
	config: &ExtractorConfig,
	cancel: &CancellationToken,
) -> Result<ExtractionOutput> {
	let video_path = video_path.as_ref();
	if cancel.is_cancelled() {
		return Err(PerceptionError::Cancelled);
	}

	// Scene analysis pass, skipped for the pure interval strategy.
	let scored = if config.params.strategy == Strategy::Interval {
		Vec::new()
	} else {
		let samples = sample_frames(video_path, work_dir, SAMPLE_FPS, MAX_SAMPLES).await?;
		if cancel.is_cancelled() {
			cleanup_samples(&samples).await;
			return Err(PerceptionError::Cancelled);
		}
		let scored = score_samples(&samples);
		if scored.len() < samples.len() {
			debug!(
				samples = samples.len(),
				scored = scored.len(),
				"some samples were undecodable"
			);
		}
		scored
	};

	let selected = select_keyframes(&scored, duration_s, &config.params);

	// Score-driven selections can reuse their sample file as the
	// thumbnail source; grid selections need a fresh grab.
	let sample_by_ms: HashMap<u64, PathBuf> = scored
		.iter()
		.map(|s| (to_ms(s.timestamp_s), s.path.clone()))
		.collect();

	let mut keyframes: Vec<KeyframeOutput> = Vec::with_capacity(selected.len());
	let mut partial = false;
	for frame in &selected {
		if cancel.is_cancelled() {
			cleanup_samples_scored(&scored).await;
			return Err(PerceptionError::Cancelled);
		}
		let timestamp_ms = to_ms(frame.timestamp_s);
		if keyframes.last().is_some_and(|last| timestamp_ms <= last.timestamp_ms) {
			continue;
		}

		let source = match sample_by_ms.get(&timestamp_ms) {
			Some(path) => path.clone(),
			None => {
				let grab = work_dir.join(format!("{asset_id}-grab-{timestamp_ms}.jpg"));
				match extract_frame_at(video_path, frame.timestamp_s, &grab).await {
					Ok(sampled) => sampled.path,
					Err(err) => {
						warn!(ts = frame.timestamp_s, %err, "keyframe grab failed; skipping");
						partial = true;
						continue;
					}
				}
			}
		};

		match write_thumbnail(
			&source,
			thumbs_dir,
			asset_id,
			timestamp_ms,
			config.thumb_max_edge,
		) {
			Ok(thumbnail_path) => keyframes.push(KeyframeOutput {
				timestamp_s: frame.timestamp_s,
				timestamp_ms,
				thumbnail_path,
				scene_score: frame.scene_score,
			}),
			Err(err) => {
				warn!(ts = frame.timestamp_s, %err, "thumbnail write failed; skipping");
				partial = true;
			}
		}
	}

	cleanup_samples_scored(&scored).await;

	if keyframes.is_empty() {
		return Err(PerceptionError::NoFramesExtracted(video_path.to_path_buf()));
	}
	debug!(count = keyframes.len(), partial, "keyframes extracted");
	Ok(ExtractionOutput { keyframes, partial })
}

/// The single pseudo-keyframe of a still image: the image itself at t=0.
///
/// # Errors
///
/// Returns [`PerceptionError::ImageRead`] or [`PerceptionError::Io`] when
/// the thumbnail cannot be produced.
#[instrument(skip_all, fields(image = %image_path.as_ref().display(), asset = asset_id))]
pub fn extract_image_keyframe(
	image_path: impl AsRef<Path>,
	asset_id: &str,
	thumbs_dir: &Path,
	thumb_max_edge: u32,
) -> Result<KeyframeOutput> {
	let thumbnail_path =
		write_thumbnail(image_path.as_ref(), thumbs_dir, asset_id, 0, thumb_max_edge)?;
	Ok(KeyframeOutput {
		timestamp_s: 0.0,
		timestamp_ms: 0,
		thumbnail_path,
		scene_score: None,
	})
}

fn to_ms(timestamp_s: f64) -> u64 {
	(timestamp_s * 1000.0).round().max(0.0) as u64
}

async fn cleanup_samples_scored(scored: &[crate::scene::ScoredSample]) {
	for sample in scored {
		if let Err(err) = tokio::fs::remove_file(&sample.path).await {
			debug!(path = %sample.path.display(), %err, "sample cleanup failed");
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_to_ms_rounds_to_nearest() {
		assert_eq!(to_ms(0.0), 0);
		assert_eq!(to_ms(2.0004), 2000);
		assert_eq!(to_ms(5.4996), 5500);
		assert_eq!(to_ms(-0.2), 0);
	}

	#[test]
	fn test_image_keyframe_at_zero() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("still.png");
		image::RgbImage::new(640, 480).save(&src).unwrap();

		let kf = extract_image_keyframe(&src, "img00000000000001", dir.path(), 320).unwrap();
		assert_eq!(kf.timestamp_ms, 0);
		assert!(kf.scene_score.is_none());
		assert!(kf.thumbnail_path.ends_with("img00000000000001/0.jpg"));
		assert!(kf.thumbnail_path.exists());
	}

	#[tokio::test]
	async fn test_cancelled_before_start() {
		let dir = tempfile::tempdir().unwrap();
		let cancel = CancellationToken::new();
		cancel.cancel();
		let err = extract_keyframes(
			"/nonexistent.mp4",
			10.0,
			"a1",
			dir.path(),
			dir.path(),
			&ExtractorConfig::default(),
			&cancel,
		)
		.await
		.unwrap_err();
		assert!(matches!(err, PerceptionError::Cancelled));
	}
}
