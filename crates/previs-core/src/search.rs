//! Search and recall scoring.
//!
//! Everything here is pure: callers hand in a snapshot and already-embedded
//! query vectors, and get ranked candidates back. Embedding, deadlines, and
//! retries live in the host engine; keeping them out of the scoring path is
//! what makes every ranking decision unit-testable with synthetic vectors.
//!
//! The filter path always runs before any vector work: tag constraints cut
//! the candidate set, then similarity is computed only for survivors.

use std::collections::HashMap;

use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;

use crate::asset::{AssetId, KeyframeId};
use crate::error::Result;
use crate::query::{
	Beat, MultimodalWeights, Query, SceneCandidate, ScoredResult, SearchMode, SubScores,
};
use crate::store::Snapshot;
use crate::tags::{tag_match_score, MatchedTag};
use crate::vector::RowScore;

/// How many keyframe ids a result lists as visual evidence.
const MAX_MATCHED_KEYFRAMES: usize = 3;

/// How many matched tags feed the reason string.
const REASON_TAGS: usize = 3;

// ============================================================================
// Search
// ============================================================================

/// Run a validated query against a snapshot.
///
/// `text_vector` is the embedded query text in text space, or `None` when
/// the text modality is unavailable; an unavailable modality contributes
/// zero to its sub-score, it never fails the search. The caller is
/// responsible for failing fast when *every* requested modality is down.
///
/// # Errors
///
/// Returns [`crate::CoreError::Cancelled`] when `cancel` fires mid-scan.
pub fn search(
	snapshot: &Snapshot,
	query: &Query,
	text_vector: Option<&[f32]>,
	cancel: &CancellationToken,
) -> Result<Vec<ScoredResult>> {
	// Empty tag query in tag-only mode matches nothing by definition.
	if query.mode == SearchMode::TagOnly && query.tags.is_empty() {
		return Ok(Vec::new());
	}

	let candidates = snapshot.filter_candidates(&query.filter);
	if candidates.is_empty() {
		return Ok(Vec::new());
	}

	let text_scores = match (query.mode, text_vector) {
		(SearchMode::TagOnly, _) | (_, None) => HashMap::new(),
		(_, Some(vector)) => {
			let scores = snapshot.text_scan(
				vector,
				Some(&candidates),
				candidates.len(),
				0.0,
				cancel,
			)?;
			scores
				.into_iter()
				.map(|RowScore { row, score }| (row, score))
				.collect::<HashMap<u32, f32>>()
		}
	};

	let mut results: Vec<ScoredResult> = Vec::new();
	for &row in &candidates {
		let Some(asset) = snapshot.asset_by_row(row) else {
			continue;
		};
		let text_score = text_scores.get(&row).copied().unwrap_or(0.0);
		let (tag_score, matched) = tag_match_score(&query.tags, &asset.tag_tuples());

		let (score, sub_scores) = match query.mode {
			SearchMode::TagOnly => {
				if tag_score <= 0.0 {
					continue;
				}
				(
					tag_score,
					SubScores {
						tag: Some(tag_score),
						..SubScores::default()
					},
				)
			}
			SearchMode::VectorOnly | SearchMode::FilterThenRank => (
				text_score,
				SubScores {
					text: Some(text_score),
					..SubScores::default()
				},
			),
			SearchMode::Hybrid => {
				let combined = query
					.weights
					.tag
					.mul_add(tag_score, query.weights.vector * text_score);
				(
					combined,
					SubScores {
						tag: Some(tag_score),
						text: Some(text_score),
						..SubScores::default()
					},
				)
			}
		};

		if score < query.min_score {
			continue;
		}
		results.push(ScoredResult {
			asset_id: asset.id.clone(),
			segment_id: None,
			score,
			reason: build_reason(&matched, &sub_scores),
			sub_scores,
			matched_tags: matched,
			matched_keyframes: Vec::new(),
		});
	}

	rank(&mut results, query.limit);
	Ok(results)
}

/// Multimodal fusion: text-space, cross-modal visual, and tag scores in a
/// single weighted sum.
///
/// `visual_vector` is the query text encoded into the visual space; the
/// visual sub-score of an asset is the maximum similarity over its
/// keyframes, zero when it has none.
///
/// # Errors
///
/// Returns [`crate::CoreError::Cancelled`] when `cancel` fires mid-scan.
pub fn multimodal_search(
	snapshot: &Snapshot,
	query: &Query,
	weights: MultimodalWeights,
	text_vector: Option<&[f32]>,
	visual_vector: Option<&[f32]>,
	cancel: &CancellationToken,
) -> Result<Vec<ScoredResult>> {
	let candidates = snapshot.filter_candidates(&query.filter);
	if candidates.is_empty() {
		return Ok(Vec::new());
	}

	let text_scores: HashMap<u32, f32> = match text_vector {
		Some(vector) => snapshot
			.text_scan(vector, Some(&candidates), candidates.len(), 0.0, cancel)?
			.into_iter()
			.map(|s| (s.row, s.score))
			.collect(),
		None => HashMap::new(),
	};

	let mut results = Vec::new();
	for &row in &candidates {
		let Some(asset) = snapshot.asset_by_row(row) else {
			continue;
		};
		let (tag_score, matched) = tag_match_score(&query.tags, &asset.tag_tuples());
		let text_score = text_scores.get(&row).copied().unwrap_or(0.0);
		let (visual_score, matched_keyframes) = match visual_vector {
			Some(vector) => best_keyframes(snapshot, &asset.id, vector, cancel)?,
			None => (0.0, Vec::new()),
		};

		let score = weights.text.mul_add(
			text_score,
			weights
				.visual
				.mul_add(visual_score, weights.tag * tag_score),
		);
		if score < query.min_score {
			continue;
		}

		let sub_scores = SubScores {
			tag: Some(tag_score),
			text: Some(text_score),
			visual: Some(visual_score),
		};
		results.push(ScoredResult {
			asset_id: asset.id.clone(),
			segment_id: None,
			score,
			reason: build_reason(&matched, &sub_scores),
			sub_scores,
			matched_tags: matched,
			matched_keyframes,
		});
	}

	rank(&mut results, query.limit);
	Ok(results)
}

/// Rank assets by similarity of their keyframes to an image embedding.
///
/// The best keyframe wins for each asset; results carry the contributing
/// keyframes best-first.
///
/// # Errors
///
/// Returns [`crate::CoreError::Cancelled`] when `cancel` fires mid-scan.
pub fn search_by_image(
	snapshot: &Snapshot,
	image_vector: &[f32],
	limit: usize,
	min_score: f32,
	cancel: &CancellationToken,
) -> Result<Vec<ScoredResult>> {
	let scores = snapshot.visual_scan(
		image_vector,
		None,
		snapshot.keyframe_count(),
		min_score,
		cancel,
	)?;

	// Group by owning asset, best keyframe first (scan output is ordered).
	let mut by_asset: HashMap<AssetId, (f32, Vec<KeyframeId>)> = HashMap::new();
	for RowScore { row, score } in scores {
		let Some(frame) = snapshot.keyframe_by_row(row) else {
			continue;
		};
		let entry = by_asset
			.entry(frame.asset_id.clone())
			.or_insert_with(|| (score, Vec::new()));
		entry.0 = entry.0.max(score);
		if entry.1.len() < MAX_MATCHED_KEYFRAMES {
			entry.1.push(frame.id.clone());
		}
	}

	let mut results: Vec<ScoredResult> = by_asset
		.into_iter()
		.map(|(asset_id, (score, matched_keyframes))| ScoredResult {
			asset_id,
			segment_id: None,
			score,
			sub_scores: SubScores {
				visual: Some(score),
				..SubScores::default()
			},
			matched_tags: SmallVec::new(),
			matched_keyframes,
			reason: format!("visual match {score:.2}"),
		})
		.collect();

	rank(&mut results, limit);
	Ok(results)
}

// ============================================================================
// Recall
// ============================================================================

/// Recall candidates for a beat, given its embedded query vectors.
///
/// Runs a hybrid search with the beat's hint tags as soft query tags, then
/// anchors each candidate on the keyframe most similar to the beat text in
/// visual space and centers the suggested window there.
///
/// # Errors
///
/// Returns [`crate::CoreError::Cancelled`] when `cancel` fires mid-scan.
pub fn recall_for_beat(
	snapshot: &Snapshot,
	beat: &Beat,
	query: &Query,
	text_vector: Option<&[f32]>,
	visual_vector: Option<&[f32]>,
	desired_count: usize,
	cancel: &CancellationToken,
) -> Result<Vec<SceneCandidate>> {
	let hits = search(snapshot, query, text_vector, cancel)?;

	let mut candidates = Vec::new();
	for hit in hits {
		if candidates.len() >= desired_count {
			break;
		}
		// A zero score means nothing matched; it is not a candidate.
		if hit.score <= 0.0 {
			continue;
		}
		let Some(asset) = snapshot.asset(&hit.asset_id) else {
			continue;
		};
		let duration = asset.duration_s.unwrap_or(0.0);

		// Anchor on the keyframe closest to the beat in visual space; fall
		// back to the first keyframe when the visual modality is down.
		let anchored = match visual_vector {
			Some(vector) => {
				let (score, frames) = best_keyframes(snapshot, &asset.id, vector, cancel)?;
				frames.into_iter().next().map(|id| (id, score))
			}
			None => None,
		};
		let (anchor, visual_score, anchor_ts) = match anchored {
			Some((id, score)) => {
				let ts = snapshot
					.keyframes_of(&asset.id)
					.iter()
					.find(|f| f.id == id)
					.map_or(0.0, |f| f.timestamp_s);
				(id, score, ts)
			}
			None => match snapshot.keyframes_of(&asset.id).first() {
				Some(frame) => (frame.id.clone(), 0.0, frame.timestamp_s),
				None => continue,
			},
		};

		let (in_s, out_s) = suggest_window(duration, anchor_ts, beat.target_duration_s);
		let segment_id = snapshot
			.segments_of(&asset.id)
			.into_iter()
			.find(|s| s.start_s <= anchor_ts && anchor_ts < s.end_s)
			.map(|s| s.id.clone());
		let sub_scores = SubScores {
			visual: Some(visual_score),
			..hit.sub_scores
		};
		candidates.push(SceneCandidate {
			asset_id: hit.asset_id,
			segment_id,
			in_s,
			out_s,
			anchor,
			score: hit.score,
			reason: build_reason(&hit.matched_tags, &sub_scores),
			sub_scores,
		});
	}
	Ok(candidates)
}

/// Center a window of `min(target, duration)` seconds on a keyframe
/// timestamp, clamped into `[0, duration]`.
#[must_use]
pub fn suggest_window(duration_s: f64, anchor_ts: f64, target_duration_s: f64) -> (f64, f64) {
	let window = target_duration_s.min(duration_s).max(0.0);
	let half = window / 2.0;
	let in_s = (anchor_ts - half).clamp(0.0, (duration_s - window).max(0.0));
	(in_s, in_s + window)
}

// ============================================================================
// Internals
// ============================================================================

/// Best-scoring keyframes of one asset against a visual-space vector.
fn best_keyframes(
	snapshot: &Snapshot,
	asset_id: &AssetId,
	visual_vector: &[f32],
	cancel: &CancellationToken,
) -> Result<(f32, Vec<KeyframeId>)> {
	let rows = snapshot.visual_rows_of(asset_id);
	if rows.is_empty() {
		return Ok((0.0, Vec::new()));
	}
	let scores = snapshot.visual_scan(
		visual_vector,
		Some(rows),
		MAX_MATCHED_KEYFRAMES,
		0.0,
		cancel,
	)?;
	let best = scores.first().map_or(0.0, |s| s.score);
	let frames = scores
		.iter()
		.filter_map(|s| snapshot.keyframe_by_row(s.row).map(|f| f.id.clone()))
		.collect();
	Ok((best, frames))
}

/// Deterministic ranking: score desc, then text sub-score desc, then
/// asset id ascending.
fn rank(results: &mut Vec<ScoredResult>, limit: usize) {
	results.sort_by(|a, b| {
		b.score
			.partial_cmp(&a.score)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| {
				let ta = a.sub_scores.text.unwrap_or(0.0);
				let tb = b.sub_scores.text.unwrap_or(0.0);
				tb.partial_cmp(&ta).unwrap_or(std::cmp::Ordering::Equal)
			})
			.then_with(|| a.asset_id.cmp(&b.asset_id))
	});
	results.truncate(limit);
}

/// Assemble the human-readable reason from the strongest matched tags and
/// whichever sub-scores were computed.
fn build_reason(matched: &[MatchedTag], sub_scores: &SubScores) -> String {
	use std::fmt::Write;

	let mut by_weight: Vec<&MatchedTag> = matched.iter().collect();
	by_weight.sort_by(|a, b| {
		b.level
			.weight()
			.partial_cmp(&a.level.weight())
			.unwrap_or(std::cmp::Ordering::Equal)
	});

	let mut reason = String::new();
	if !by_weight.is_empty() {
		let paths: Vec<String> = by_weight
			.iter()
			.take(REASON_TAGS)
			.map(|m| m.tag.display_path())
			.collect();
		let _ = write!(reason, "matched tags {}", paths.join(", "));
	}
	for (name, value) in [
		("text", sub_scores.text),
		("visual", sub_scores.visual),
	] {
		if let Some(v) = value {
			if !reason.is_empty() {
				reason.push_str("; ");
			}
			let _ = write!(reason, "{name} similarity {v:.2}");
		}
	}
	if reason.is_empty() {
		reason.push_str("no signals matched");
	}
	reason
}
