//! Scene-change scoring and keyframe selection.
//!
//! Scene changes are detected by comparing perceptual hashes of
//! consecutive sampled frames. Perceptual hashes are robust to encoding,
//! scaling, and compression noise, and the Hamming distance between two
//! 64-bit hashes normalizes cleanly into the `[0, 1]` score range the
//! selection thresholds operate on.
//!
//! Selection is pure: given scored samples and a duration, each strategy
//! returns timestamps. That keeps every boundary case (thresholds 0 and
//! 1, burst suppression, gap fill, the cap) testable without video files.

use std::path::{Path, PathBuf};

use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::frames::SampledFrame;

/// Hash size (8x8 = 64 bits).
const HASH_SIZE: u32 = 8;

/// Bits in the perceptual hash; Hamming distances normalize against this.
const HASH_BITS: u32 = HASH_SIZE * HASH_SIZE;

// ============================================================================
// Configuration
// ============================================================================

/// Keyframe selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
	/// Emit where the scene-change score crosses the threshold
	SceneChange,
	/// Emit on a fixed interval grid aligned to t=0
	Interval,
	/// Scene-change pass, then fill oversized gaps with interval frames
	Hybrid,
}

/// Parameters for keyframe selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyframeParams {
	/// Which strategy to run
	pub strategy: Strategy,
	/// Scene-change score threshold in [0, 1]
	pub threshold: f32,
	/// Interval grid spacing in seconds
	pub interval_s: f64,
	/// Minimum spacing between scene-change emissions, in seconds
	pub min_interval_s: f64,
	/// Hybrid: gaps longer than this get interval fill frames
	pub max_gap_s: f64,
	/// Hard cap per asset; selections above it are uniformly subsampled
	pub max_keyframes: usize,
}

impl Default for KeyframeParams {
	fn default() -> Self {
		Self {
			strategy: Strategy::Hybrid,
			threshold: 0.3,
			interval_s: 2.0,
			min_interval_s: 1.0,
			max_gap_s: 10.0,
			max_keyframes: 60,
		}
	}
}

// ============================================================================
// Scoring
// ============================================================================

/// A sampled frame with its scene-change score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSample {
	/// Path of the sampled frame image
	pub path: PathBuf,
	/// Timestamp in seconds
	pub timestamp_s: f64,
	/// Normalized distance from the previous sample; the first sample
	/// scores 1.0 (the start of the clip is always a scene boundary)
	pub score: f32,
}

/// A selected keyframe timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedFrame {
	/// Timestamp in seconds
	pub timestamp_s: f64,
	/// Scene-change score, when the selection was score-driven
	pub scene_score: Option<f32>,
}

/// Compute the perceptual hash of one frame image.
///
/// # Errors
///
/// Returns [`crate::PerceptionError::ImageRead`] for undecodable frames.
pub fn compute_phash(path: impl AsRef<Path>) -> Result<Vec<u8>> {
	let image = image::open(path.as_ref())?;
	let hasher = HasherConfig::new()
		.hash_alg(HashAlg::DoubleGradient)
		.hash_size(HASH_SIZE, HASH_SIZE)
		.to_hasher();
	Ok(hasher.hash_image(&image).as_bytes().to_vec())
}

/// Hamming distance between two hashes, in bits.
#[must_use]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
	a.iter()
		.zip(b.iter())
		.map(|(x, y)| (x ^ y).count_ones())
		.sum()
}

/// Score consecutive samples by normalized hash distance.
///
/// Frames that fail to decode are skipped (logged by the caller via the
/// shrinking count); scoring continues with the surviving sequence.
#[instrument(skip_all, fields(samples = samples.len()))]
pub fn score_samples(samples: &[SampledFrame]) -> Vec<ScoredSample> {
	let mut scored = Vec::with_capacity(samples.len());
	let mut previous_hash: Option<Vec<u8>> = None;

	for sample in samples {
		let hash = match compute_phash(&sample.path) {
			Ok(hash) => hash,
			Err(err) => {
				debug!(path = %sample.path.display(), %err, "skipping undecodable sample");
				continue;
			}
		};
		let score = match &previous_hash {
			Some(prev) => hamming_distance(prev, &hash) as f32 / HASH_BITS as f32,
			None => 1.0,
		};
		scored.push(ScoredSample {
			path: sample.path.clone(),
			timestamp_s: sample.timestamp_s,
			score,
		});
		previous_hash = Some(hash);
	}

	scored
}

// ============================================================================
// Selection
// ============================================================================

/// Select keyframe timestamps per the configured strategy, capped at
/// `max_keyframes` by uniform subsampling.
#[must_use]
pub fn select_keyframes(
	scored: &[ScoredSample],
	duration_s: f64,
	params: &KeyframeParams,
) -> Vec<SelectedFrame> {
	let selected = match params.strategy {
		Strategy::SceneChange => select_scene_change(scored, params),
		Strategy::Interval => select_interval(duration_s, params.interval_s),
		Strategy::Hybrid => {
			let mut frames = select_scene_change(scored, params);
			fill_gaps(&mut frames, duration_s, params);
			frames
		}
	};
	uniform_subsample(selected, params.max_keyframes)
}

/// Scene-change selection: the first sample always emits, then every
/// sample at or above the threshold, subject to `min_interval_s` burst
/// suppression.
fn select_scene_change(scored: &[ScoredSample], params: &KeyframeParams) -> Vec<SelectedFrame> {
	let mut out: Vec<SelectedFrame> = Vec::new();
	for sample in scored {
		if sample.score < params.threshold && !out.is_empty() {
			continue;
		}
		if let Some(last) = out.last() {
			if sample.timestamp_s - last.timestamp_s < params.min_interval_s {
				continue;
			}
		}
		out.push(SelectedFrame {
			timestamp_s: sample.timestamp_s,
			scene_score: Some(sample.score),
		});
	}
	out
}

/// Interval grid aligned to t=0; a frame at exactly `duration` is valid.
fn select_interval(duration_s: f64, interval_s: f64) -> Vec<SelectedFrame> {
	if interval_s <= 0.0 || duration_s < 0.0 {
		return Vec::new();
	}
	let mut out = Vec::new();
	let mut t = 0.0;
	while t <= duration_s + 1e-9 {
		out.push(SelectedFrame {
			timestamp_s: t.min(duration_s),
			scene_score: None,
		});
		t += interval_s;
	}
	out
}

/// Insert interval frames into gaps longer than `max_gap_s`, including the
/// tail gap up to the end of the clip.
fn fill_gaps(frames: &mut Vec<SelectedFrame>, duration_s: f64, params: &KeyframeParams) {
	if params.interval_s <= 0.0 {
		return;
	}
	let mut filled = Vec::new();
	let bounds: Vec<f64> = frames
		.iter()
		.map(|f| f.timestamp_s)
		.chain(std::iter::once(duration_s))
		.collect();

	for (i, frame) in frames.iter().enumerate() {
		filled.push(frame.clone());
		let gap_end = bounds[i + 1];
		if gap_end - frame.timestamp_s > params.max_gap_s {
			let mut t = frame.timestamp_s + params.interval_s;
			while t < gap_end - 1e-9 {
				filled.push(SelectedFrame {
					timestamp_s: t,
					scene_score: None,
				});
				t += params.interval_s;
			}
		}
	}
	*frames = filled;
}

/// Uniformly subsample a selection down to `cap` frames, keeping the first
/// and last.
fn uniform_subsample(frames: Vec<SelectedFrame>, cap: usize) -> Vec<SelectedFrame> {
	if cap == 0 || frames.len() <= cap {
		return frames;
	}
	if cap == 1 {
		return frames.into_iter().take(1).collect();
	}
	let n = frames.len();
	let mut picked = Vec::with_capacity(cap);
	let mut last_index = usize::MAX;
	for i in 0..cap {
		let index = i * (n - 1) / (cap - 1);
		if index != last_index {
			picked.push(frames[index].clone());
			last_index = index;
		}
	}
	picked
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;

	/// Samples at 0.5 s spacing with the given scores.
	fn scored(scores: &[f32]) -> Vec<ScoredSample> {
		scores
			.iter()
			.enumerate()
			.map(|(i, &score)| ScoredSample {
				path: PathBuf::from(format!("/tmp/{i}.jpg")),
				timestamp_s: i as f64 * 0.5,
				score,
			})
			.collect()
	}

	fn params(strategy: Strategy) -> KeyframeParams {
		KeyframeParams {
			strategy,
			..KeyframeParams::default()
		}
	}

	#[test]
	fn test_hamming_distance() {
		assert_eq!(hamming_distance(&[0xFF], &[0x00]), 8);
		assert_eq!(hamming_distance(&[0xFF], &[0xF0]), 4);
		assert_eq!(hamming_distance(&[0xAA, 0x00], &[0xAA, 0x00]), 0);
	}

	#[test]
	fn test_scene_change_scenario_three_cuts() {
		// 10 s clip sampled at 0.5 s with cuts at 2.0, 5.5, 8.0.
		let mut scores = vec![0.05f32; 21];
		scores[0] = 1.0;
		scores[4] = 0.6; // t=2.0
		scores[11] = 0.7; // t=5.5
		scores[16] = 0.5; // t=8.0
		let selected = select_keyframes(&scored(&scores), 10.0, &params(Strategy::SceneChange));

		let ts: Vec<f64> = selected.iter().map(|f| f.timestamp_s).collect();
		assert_eq!(ts, vec![0.0, 2.0, 5.5, 8.0]);
		assert!(selected.iter().all(|f| f.scene_score.is_some()));
	}

	#[test]
	fn test_threshold_zero_emits_every_sample() {
		let scores = vec![0.0f32; 9];
		let mut p = params(Strategy::SceneChange);
		p.threshold = 0.0;
		p.min_interval_s = 0.0;
		let selected = select_keyframes(&scored(&scores), 4.0, &p);
		assert_eq!(selected.len(), 9);
	}

	#[test]
	fn test_threshold_one_emits_only_first_frame() {
		let mut scores = vec![0.9f32; 9];
		scores[0] = 1.0;
		let mut p = params(Strategy::SceneChange);
		p.threshold = 1.0;
		let selected = select_keyframes(&scored(&scores), 4.0, &p);
		assert_eq!(selected.len(), 1);
		assert_eq!(selected[0].timestamp_s, 0.0);
	}

	#[test]
	fn test_min_interval_suppresses_bursts() {
		// Three consecutive high scores 0.5 s apart; default min interval
		// of 1 s lets only every other one through.
		let scores = vec![1.0, 0.9, 0.9, 0.9, 0.05];
		let selected = select_keyframes(&scored(&scores), 2.0, &params(Strategy::SceneChange));
		let ts: Vec<f64> = selected.iter().map(|f| f.timestamp_s).collect();
		assert_eq!(ts, vec![0.0, 1.0]);
	}

	#[test]
	fn test_interval_grid_aligned_and_inclusive() {
		let selected = select_keyframes(&[], 10.0, &params(Strategy::Interval));
		let ts: Vec<f64> = selected.iter().map(|f| f.timestamp_s).collect();
		assert_eq!(ts, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
		assert!(selected.iter().all(|f| f.scene_score.is_none()));
	}

	#[test]
	fn test_hybrid_fills_long_gaps() {
		// One scene change at t=0 only; 30 s clip → 30 s tail gap gets
		// interval fill every 2 s.
		let mut scores = vec![0.05f32; 61];
		scores[0] = 1.0;
		let mut p = params(Strategy::Hybrid);
		p.max_keyframes = 100;
		let selected = select_keyframes(&scored(&scores), 30.0, &p);

		assert!(selected.len() > 10);
		assert_eq!(selected[0].timestamp_s, 0.0);
		assert!(selected[0].scene_score.is_some());
		// Fill frames carry no score and no gap exceeds max_gap_s.
		assert!(selected[1].scene_score.is_none());
		for pair in selected.windows(2) {
			assert!(pair[1].timestamp_s - pair[0].timestamp_s <= p.max_gap_s + 1e-9);
		}
	}

	#[test]
	fn test_hybrid_no_fill_for_small_gaps() {
		// Scene changes every 4 s in a 12 s clip; under the 10 s max gap.
		let mut scores = vec![0.05f32; 25];
		scores[0] = 1.0;
		scores[8] = 0.8;
		scores[16] = 0.8;
		scores[24] = 0.8;
		let selected = select_keyframes(&scored(&scores), 12.0, &params(Strategy::Hybrid));
		assert_eq!(selected.len(), 4);
	}

	#[test]
	fn test_cap_subsamples_uniformly() {
		let scores = vec![0.0f32; 100];
		let mut p = params(Strategy::SceneChange);
		p.threshold = 0.0;
		p.min_interval_s = 0.0;
		p.max_keyframes = 10;
		let selected = select_keyframes(&scored(&scores), 50.0, &p);
		assert_eq!(selected.len(), 10);
		assert_eq!(selected[0].timestamp_s, 0.0);
		// Last frame survives the subsample.
		assert_eq!(selected[9].timestamp_s, 49.5);
	}

	#[test]
	fn test_timestamps_strictly_increasing() {
		let mut scores = vec![0.05f32; 41];
		scores[0] = 1.0;
		scores[10] = 0.9;
		scores[30] = 0.9;
		for strategy in [Strategy::SceneChange, Strategy::Interval, Strategy::Hybrid] {
			let selected = select_keyframes(&scored(&scores), 20.0, &params(strategy));
			for pair in selected.windows(2) {
				assert!(pair[1].timestamp_s > pair[0].timestamp_s, "{strategy:?}");
			}
		}
	}
}
