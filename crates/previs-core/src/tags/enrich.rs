//! Best-effort tag enrichment.
//!
//! Two optional sources feed the tag set beyond filename heuristics:
//!
//! 1. An LLM given the filename, caption, and keyframe captions, answering
//!    in a strict JSON schema.
//! 2. A visual classifier scoring each keyframe against the L3 vocabulary.
//!
//! Both are behind traits implemented by the host; the core only builds
//! prompts, parses and validates responses, and aggregates per-frame
//! scores. An asset record must come out usable even when every call here
//! fails, so nothing in this module returns a hard error to the pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{SourcedAssignment, TagAssignment, TagHierarchy, TagSource};

// ============================================================================
// LLM Enrichment
// ============================================================================

/// Failure from an enrichment backend. Best-effort: logged, never fatal.
#[derive(Debug, thiserror::Error)]
#[error("enrichment failed: {0}")]
pub struct EnrichmentError(pub String);

/// Context handed to the enrichment backend.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRequest<'a> {
	/// Original filename of the asset
	pub filename: &'a str,
	/// Caption or transcript, when one exists
	pub caption: Option<&'a str>,
	/// Captions of extracted keyframes, chronological
	pub keyframe_captions: &'a [String],
}

/// An LLM backend that answers enrichment prompts with raw JSON.
pub trait TagEnricher: Send + Sync {
	/// Produce the JSON payload for [`parse_enrichment`].
	///
	/// # Errors
	///
	/// Returns [`EnrichmentError`] when the backend is unreachable or the
	/// response is unusable. Callers treat this as a skipped source.
	fn enrich(&self, request: &EnrichmentRequest<'_>) -> Result<String, EnrichmentError>;
}

/// Build the strict-schema prompt for an enrichment request.
///
/// The prompt pins the response shape and enumerates the allowed L1
/// categories so well-behaved models stay inside the hierarchy; responses
/// are validated regardless.
#[must_use]
pub fn build_prompt(request: &EnrichmentRequest<'_>, hierarchy: &TagHierarchy) -> String {
	use std::fmt::Write;

	let mut prompt = String::from(
		"Classify this video/image asset into hierarchical tags.\n\nAsset filename: ",
	);
	prompt.push_str(request.filename);
	if let Some(caption) = request.caption {
		let _ = write!(prompt, "\nCaption: {caption}");
	}
	if !request.keyframe_captions.is_empty() {
		let _ = write!(
			prompt,
			"\nKeyframes: {}",
			request.keyframe_captions.join(" | ")
		);
	}

	let l1s: Vec<String> = hierarchy
		.l3_chains()
		.iter()
		.map(|c| c.l1.clone())
		.collect::<std::collections::BTreeSet<_>>()
		.into_iter()
		.collect();

	let _ = write!(
		prompt,
		"\n\nRespond with JSON only, no prose:\n\
		{{\"assignments\": [{{\"l1\": \"...\", \"l2\": \"...\", \"l3\": \"...\", \"l4\": \"...\", \"confidence\": 0.0}}]}}\n\
		l1 must be one of: {}. l2/l3 must exist in the production hierarchy; \
		l4 is a free short descriptor. Omit levels you are not sure about.",
		l1s.join(", ")
	);
	prompt
}

#[derive(Debug, Deserialize)]
struct RawPayload {
	#[serde(default)]
	assignments: Vec<RawAssignment>,
}

#[derive(Debug, Deserialize)]
struct RawAssignment {
	l1: String,
	#[serde(default)]
	l2: Option<String>,
	#[serde(default)]
	l3: Option<String>,
	#[serde(default)]
	l4: Option<String>,
	#[serde(default)]
	confidence: Option<f32>,
}

/// Outcome of parsing one enrichment response.
#[derive(Debug, Default)]
pub struct EnrichmentOutcome {
	/// Assignments that passed hierarchy validation
	pub accepted: Vec<SourcedAssignment>,
	/// How many entries were rejected (each is logged individually)
	pub rejected: usize,
}

/// Parse and validate an enrichment JSON payload.
///
/// Entries outside the hierarchy are logged and counted, never silently
/// promoted. An L4 descriptor without an L3 parent is stripped (the rest
/// of the chain is kept if valid), matching the persisted-tag invariant.
#[must_use]
pub fn parse_enrichment(json: &str, hierarchy: &TagHierarchy) -> EnrichmentOutcome {
	let payload: RawPayload = match serde_json::from_str(json) {
		Ok(p) => p,
		Err(err) => {
			warn!(%err, "enrichment response is not valid JSON");
			return EnrichmentOutcome::default();
		}
	};

	let mut outcome = EnrichmentOutcome::default();
	for raw in payload.assignments {
		let mut assignment = TagAssignment::chain(
			raw.l1,
			raw.l2.as_deref(),
			raw.l3.as_deref(),
			raw.l4.as_deref(),
		);
		if assignment.l4.is_some() && assignment.l3.is_none() {
			warn!(
				tag = %assignment.display_path(),
				"dropping L4 descriptor without an L3 parent"
			);
			assignment.l4 = None;
		}
		match hierarchy.validate(&assignment) {
			Ok(()) => {
				let confidence = raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0);
				outcome.accepted.push(SourcedAssignment {
					assignment,
					source: TagSource::Enrichment,
					confidence,
				});
			}
			Err(rejection) => {
				warn!(
					tag = %assignment.display_path(),
					%rejection,
					"enrichment assignment rejected"
				);
				outcome.rejected += 1;
			}
		}
	}
	outcome
}

// ============================================================================
// Keyframe Classification
// ============================================================================

/// One class score for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameTagScore {
	/// The candidate chain (usually an L3 chain from the vocabulary)
	pub assignment: TagAssignment,
	/// Classifier confidence in [0, 1]
	pub score: f32,
}

/// A visual classifier run per keyframe thumbnail.
pub trait FrameTagger: Send + Sync {
	/// Score the frame against the candidate vocabulary.
	///
	/// # Errors
	///
	/// Returns [`EnrichmentError`] when classification fails for this
	/// frame; the pipeline skips the frame and continues.
	fn tag_frame(&self, thumbnail: &Path) -> Result<Vec<FrameTagScore>, EnrichmentError>;
}

/// Aggregate per-frame class scores across an asset.
///
/// For each distinct chain the aggregate is the mean of its better half of
/// frame scores, so a class strongly present in part of the clip is not
/// diluted by frames where it is absent. Chains at or above `threshold`
/// are admitted with the aggregate as confidence.
#[must_use]
pub fn aggregate_frame_tags(
	per_frame: &[Vec<FrameTagScore>],
	threshold: f32,
) -> Vec<SourcedAssignment> {
	use std::collections::HashMap;

	let mut grouped: HashMap<TagAssignment, Vec<f32>> = HashMap::new();
	for frame in per_frame {
		for hit in frame {
			grouped
				.entry(hit.assignment.clone())
				.or_default()
				.push(hit.score);
		}
	}

	let mut out: Vec<SourcedAssignment> = grouped
		.into_iter()
		.filter_map(|(assignment, mut scores)| {
			scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
			let half = scores.len().div_ceil(2);
			let aggregate = scores[..half].iter().sum::<f32>() / half as f32;
			(aggregate >= threshold).then_some(SourcedAssignment {
				assignment,
				source: TagSource::Keyframe,
				confidence: aggregate,
			})
		})
		.collect();

	// Deterministic order for persistence and tests.
	out.sort_by(|a, b| a.assignment.cmp(&b.assignment));
	out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;

	fn chain(l1: &str, l2: &str, l3: &str) -> TagAssignment {
		TagAssignment::chain(l1, Some(l2), Some(l3), None)
	}

	#[test]
	fn test_parse_accepts_valid_chain() {
		let h = TagHierarchy::default();
		let json = r#"{"assignments": [
			{"l1": "scene", "l2": "exterior", "l3": "night", "l4": "neon glow", "confidence": 0.9}
		]}"#;
		let outcome = parse_enrichment(json, &h);
		assert_eq!(outcome.rejected, 0);
		assert_eq!(outcome.accepted.len(), 1);
		let entry = &outcome.accepted[0];
		assert_eq!(entry.source, TagSource::Enrichment);
		assert_eq!(entry.assignment.l4.as_deref(), Some("neon glow"));
		assert_eq!(entry.confidence, 0.9);
	}

	#[test]
	fn test_parse_rejects_unknown_and_counts() {
		let h = TagHierarchy::default();
		let json = r#"{"assignments": [
			{"l1": "scene", "l2": "exterior", "l3": "night"},
			{"l1": "spaceship"},
			{"l1": "scene", "l2": "orbit"}
		]}"#;
		let outcome = parse_enrichment(json, &h);
		assert_eq!(outcome.accepted.len(), 1);
		assert_eq!(outcome.rejected, 2);
	}

	#[test]
	fn test_parse_strips_orphan_l4() {
		let h = TagHierarchy::default();
		let json = r#"{"assignments": [
			{"l1": "scene", "l2": "exterior", "l4": "wide vista"}
		]}"#;
		let outcome = parse_enrichment(json, &h);
		assert_eq!(outcome.accepted.len(), 1);
		assert!(outcome.accepted[0].assignment.l4.is_none());
	}

	#[test]
	fn test_parse_garbage_is_empty_not_fatal() {
		let h = TagHierarchy::default();
		let outcome = parse_enrichment("certainly! here are your tags:", &h);
		assert!(outcome.accepted.is_empty());
		assert_eq!(outcome.rejected, 0);
	}

	#[test]
	fn test_prompt_mentions_filename_and_schema() {
		let h = TagHierarchy::default();
		let request = EnrichmentRequest {
			filename: "EXT_harbor_dawn.mp4",
			caption: Some("boats at first light"),
			keyframe_captions: &[],
		};
		let prompt = build_prompt(&request, &h);
		assert!(prompt.contains("EXT_harbor_dawn.mp4"));
		assert!(prompt.contains("\"assignments\""));
		assert!(prompt.contains("scene"));
	}

	#[test]
	fn test_aggregate_mean_of_top_half() {
		let night = chain("scene", "exterior", "night");
		let frames = vec![
			vec![FrameTagScore { assignment: night.clone(), score: 0.9 }],
			vec![FrameTagScore { assignment: night.clone(), score: 0.7 }],
			vec![FrameTagScore { assignment: night.clone(), score: 0.1 }],
			vec![],
		];
		let tags = aggregate_frame_tags(&frames, 0.5);
		assert_eq!(tags.len(), 1);
		// Better half of {0.9, 0.7, 0.1} is {0.9, 0.7} → 0.8
		assert!((tags[0].confidence - 0.8).abs() < 1e-6);
		assert_eq!(tags[0].source, TagSource::Keyframe);
	}

	#[test]
	fn test_aggregate_threshold_filters() {
		let frames = vec![vec![FrameTagScore {
			assignment: chain("scene", "exterior", "rain"),
			score: 0.2,
		}]];
		assert!(aggregate_frame_tags(&frames, 0.5).is_empty());
	}
}
