//! Hierarchical tags.
//!
//! Four ordered levels govern matching granularity:
//!
//! - **L1** — coarse asset category (`character`, `scene`, `action`, ...),
//!   mandatory on every completed asset.
//! - **L2** — subcategory under one L1 (`scene/exterior`).
//! - **L3** — specific attribute under one L2 (`scene/exterior/sunset`).
//! - **L4** — open-vocabulary descriptor hanging off an L3 chain.
//!
//! Assignments are stored as explicit four-tuples, never as flattened
//! `a/b/c/d` strings, so level-aware scoring stays a field comparison.
//! An L(n+1) value is only accepted when its L(n) parent is present and
//! exists in the configured hierarchy; L4 is open but still requires an
//! L3 parent on the assignment.

pub mod enrich;
pub mod lexicon;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ============================================================================
// Levels
// ============================================================================

/// One of the four tag levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagLevel {
	/// Coarse category
	L1,
	/// Subcategory
	L2,
	/// Specific attribute
	L3,
	/// Free descriptor
	L4,
}

impl TagLevel {
	/// Match weight used by tag scoring; deeper levels weigh less because
	/// they match less often but carry less categorical signal.
	#[must_use]
	pub const fn weight(self) -> f32 {
		match self {
			Self::L1 => 1.0,
			Self::L2 => 0.7,
			Self::L3 => 0.5,
			Self::L4 => 0.3,
		}
	}
}

// ============================================================================
// Assignments
// ============================================================================

/// Where a tag assignment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSource {
	/// Matched a filename token against the lexicon
	Filename,
	/// Produced by LLM enrichment and validated against the hierarchy
	Enrichment,
	/// Derived from keyframe classification
	Keyframe,
	/// Supplied by the caller
	Manual,
}

/// One validated tag chain on an asset.
///
/// `l2`..`l4` are optional but contiguous: `l3` implies `l2`, `l4` implies
/// `l3`. Construction goes through [`TagHierarchy::validate`]; a raw
/// literal is only appropriate in tests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagAssignment {
	/// Mandatory coarse category
	pub l1: String,
	/// Subcategory under `l1`
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub l2: Option<String>,
	/// Attribute under `l2`
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub l3: Option<String>,
	/// Free descriptor under `l3`
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub l4: Option<String>,
}

impl TagAssignment {
	/// An L1-only assignment.
	#[must_use]
	pub fn l1(l1: impl Into<String>) -> Self {
		Self {
			l1: normalize(&l1.into()),
			l2: None,
			l3: None,
			l4: None,
		}
	}

	/// Build an assignment down to whichever levels are given.
	#[must_use]
	pub fn chain(
		l1: impl Into<String>,
		l2: Option<&str>,
		l3: Option<&str>,
		l4: Option<&str>,
	) -> Self {
		Self {
			l1: normalize(&l1.into()),
			l2: l2.map(normalize),
			l3: l3.map(normalize),
			l4: l4.map(normalize),
		}
	}

	/// The deepest level this assignment specifies.
	#[must_use]
	pub const fn depth(&self) -> TagLevel {
		if self.l4.is_some() {
			TagLevel::L4
		} else if self.l3.is_some() {
			TagLevel::L3
		} else if self.l2.is_some() {
			TagLevel::L2
		} else {
			TagLevel::L1
		}
	}

	/// Whether this assignment satisfies `query` as a prefix pattern.
	///
	/// A query tag matches when every level it specifies equals the same
	/// level here; levels the query leaves empty are unconstrained. An
	/// L1-only query `scene` matches `scene/exterior/sunset`.
	#[must_use]
	pub fn satisfies(&self, query: &Self) -> bool {
		if self.l1 != query.l1 {
			return false;
		}
		for (mine, wanted) in [
			(&self.l2, &query.l2),
			(&self.l3, &query.l3),
			(&self.l4, &query.l4),
		] {
			if let Some(w) = wanted {
				if mine.as_ref() != Some(w) {
					return false;
				}
			}
		}
		true
	}

	/// Human-readable path form for logs and reason strings.
	#[must_use]
	pub fn display_path(&self) -> String {
		let mut s = self.l1.clone();
		for part in [&self.l2, &self.l3, &self.l4].into_iter().flatten() {
			s.push('/');
			s.push_str(part);
		}
		s
	}
}

/// Lowercase, trimmed tag value.
fn normalize(raw: &str) -> String {
	raw.trim().to_lowercase()
}

/// A tag assignment together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedAssignment {
	/// The validated chain
	pub assignment: TagAssignment,
	/// Which source produced it
	pub source: TagSource,
	/// Source confidence in [0, 1]; 1.0 for lexicon and manual tags
	pub confidence: f32,
}

// ============================================================================
// Hierarchy
// ============================================================================

/// Why an assignment was rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagRejection {
	/// The L1 value is not in the hierarchy.
	#[error("unknown L1 tag `{0}`")]
	UnknownL1(String),
	/// The L2 value is not defined under its L1.
	#[error("unknown L2 tag `{l2}` under `{l1}`")]
	UnknownL2 {
		/// Parent L1
		l1: String,
		/// Offending L2
		l2: String,
	},
	/// The L3 value is not defined under its L1/L2.
	#[error("unknown L3 tag `{l3}` under `{l1}/{l2}`")]
	UnknownL3 {
		/// Parent L1
		l1: String,
		/// Parent L2
		l2: String,
		/// Offending L3
		l3: String,
	},
	/// A level is present without its parent level.
	#[error("tag `{0}` skips a parent level")]
	MissingParent(String),
	/// The assignment is empty.
	#[error("empty tag assignment")]
	Empty,
}

/// The configured tag vocabulary for L1..L3. L4 is open.
///
/// Built programmatically (the default previs vocabulary plus
/// `add_l1`/`add_l2`/`add_l3` extensions); never serialized.
#[derive(Debug, Clone)]
pub struct TagHierarchy {
	l1: BTreeSet<String>,
	l2: BTreeMap<String, BTreeSet<String>>,
	l3: BTreeMap<(String, String), BTreeSet<String>>,
}

impl TagHierarchy {
	/// An empty hierarchy. `unknown` is always a valid L1 so the fallback
	/// assignment validates.
	#[must_use]
	pub fn empty() -> Self {
		let mut l1 = BTreeSet::new();
		let _ = l1.insert("unknown".to_string());
		Self {
			l1,
			l2: BTreeMap::new(),
			l3: BTreeMap::new(),
		}
	}

	/// Register an L1 value.
	pub fn add_l1(&mut self, l1: &str) -> &mut Self {
		let _ = self.l1.insert(normalize(l1));
		self
	}

	/// Register an L2 value under an L1, creating the L1 if needed.
	pub fn add_l2(&mut self, l1: &str, l2: &str) -> &mut Self {
		let l1 = normalize(l1);
		let _ = self.l1.insert(l1.clone());
		let _ = self.l2.entry(l1).or_default().insert(normalize(l2));
		self
	}

	/// Register an L3 value under an L1/L2 pair, creating parents if needed.
	pub fn add_l3(&mut self, l1: &str, l2: &str, l3: &str) -> &mut Self {
		let (l1, l2) = (normalize(l1), normalize(l2));
		let _ = self.add_l2(&l1, &l2);
		let _ = self
			.l3
			.entry((l1, l2))
			.or_default()
			.insert(normalize(l3));
		self
	}

	/// Whether the L1 value exists.
	#[must_use]
	pub fn has_l1(&self, l1: &str) -> bool {
		self.l1.contains(&normalize(l1))
	}

	/// All L3 chains, for zero-shot class vocabularies.
	#[must_use]
	pub fn l3_chains(&self) -> Vec<TagAssignment> {
		self.l3
			.iter()
			.flat_map(|((l1, l2), values)| {
				values.iter().map(move |l3| TagAssignment {
					l1: l1.clone(),
					l2: Some(l2.clone()),
					l3: Some(l3.clone()),
					l4: None,
				})
			})
			.collect()
	}

	/// Validate an assignment against the hierarchy.
	///
	/// # Errors
	///
	/// Returns a [`TagRejection`] naming the offending level. L4 is never
	/// checked against a vocabulary but still requires an L3 parent.
	pub fn validate(&self, tag: &TagAssignment) -> Result<(), TagRejection> {
		if tag.l1.is_empty() {
			return Err(TagRejection::Empty);
		}
		if !self.l1.contains(&tag.l1) {
			return Err(TagRejection::UnknownL1(tag.l1.clone()));
		}
		if tag.l2.is_none() && (tag.l3.is_some() || tag.l4.is_some()) {
			return Err(TagRejection::MissingParent(tag.display_path()));
		}
		if tag.l3.is_none() && tag.l4.is_some() {
			return Err(TagRejection::MissingParent(tag.display_path()));
		}
		if let Some(l2) = &tag.l2 {
			let known = self.l2.get(&tag.l1).is_some_and(|set| set.contains(l2));
			if !known {
				return Err(TagRejection::UnknownL2 {
					l1: tag.l1.clone(),
					l2: l2.clone(),
				});
			}
			if let Some(l3) = &tag.l3 {
				let key = (tag.l1.clone(), l2.clone());
				let known = self.l3.get(&key).is_some_and(|set| set.contains(l3));
				if !known {
					return Err(TagRejection::UnknownL3 {
						l1: tag.l1.clone(),
						l2: l2.clone(),
						l3: l3.clone(),
					});
				}
			}
		}
		Ok(())
	}
}

impl Default for TagHierarchy {
	/// The seeded previsualization vocabulary.
	fn default() -> Self {
		let mut h = Self::empty();
		for l1 in ["character", "scene", "action", "prop", "dialogue"] {
			let _ = h.add_l1(l1);
		}

		for l2 in ["interior", "exterior", "urban", "nature"] {
			let _ = h.add_l2("scene", l2);
		}
		for l3 in ["day", "night", "rain", "snow", "sunset", "ocean"] {
			let _ = h.add_l3("scene", "exterior", l3);
		}
		for l3 in ["office", "home", "studio", "warehouse"] {
			let _ = h.add_l3("scene", "interior", l3);
		}
		for l3 in ["street", "rooftop", "alley", "skyline"] {
			let _ = h.add_l3("scene", "urban", l3);
		}
		for l3 in ["forest", "mountain", "desert", "river"] {
			let _ = h.add_l3("scene", "nature", l3);
		}

		for l2 in ["protagonist", "antagonist", "supporting", "crowd"] {
			let _ = h.add_l2("character", l2);
			for l3 in ["closeup", "medium", "wide"] {
				let _ = h.add_l3("character", l2, l3);
			}
		}

		for (l2, l3s) in [
			("motion", &["chase", "run", "walk", "fall"][..]),
			("combat", &["fight", "shootout", "swordplay"][..]),
			("gesture", &["point", "wave", "embrace"][..]),
		] {
			let _ = h.add_l2("action", l2);
			for l3 in l3s {
				let _ = h.add_l3("action", l2, l3);
			}
		}

		for (l2, l3s) in [
			("vehicle", &["car", "motorcycle", "aircraft", "boat"][..]),
			("weapon", &["gun", "sword", "knife"][..]),
			("device", &["phone", "camera", "computer"][..]),
		] {
			let _ = h.add_l2("prop", l2);
			for l3 in l3s {
				let _ = h.add_l3("prop", l2, l3);
			}
		}

		for (l2, l3s) in [
			("conversation", &["argument", "interview", "whisper"][..]),
			("monologue", &["narration", "speech"][..]),
		] {
			let _ = h.add_l2("dialogue", l2);
			for l3 in l3s {
				let _ = h.add_l3("dialogue", l2, l3);
			}
		}

		h
	}
}

// ============================================================================
// Merging
// ============================================================================

/// Merge newly sourced assignments into an existing set.
///
/// Later sources may add but never overwrite: a tuple already present keeps
/// its original source and confidence. Returns how many entries were added.
pub fn merge_assignments(
	existing: &mut Vec<SourcedAssignment>,
	incoming: impl IntoIterator<Item = SourcedAssignment>,
) -> usize {
	let mut added = 0;
	for entry in incoming {
		let duplicate = existing
			.iter()
			.any(|e| e.assignment == entry.assignment);
		if !duplicate {
			existing.push(entry);
			added += 1;
		}
	}
	added
}

// ============================================================================
// Filters & Scoring
// ============================================================================

/// Hard tag constraints applied before any scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagFilter {
	/// Every pattern must be satisfied by at least one assignment
	#[serde(default)]
	pub require_all: Vec<TagAssignment>,
	/// At least one pattern must be satisfied (ignored when empty)
	#[serde(default)]
	pub require_any: Vec<TagAssignment>,
	/// No assignment may satisfy any of these patterns
	#[serde(default)]
	pub exclude: Vec<TagAssignment>,
}

impl TagFilter {
	/// Whether the filter constrains anything at all.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.require_all.is_empty() && self.require_any.is_empty() && self.exclude.is_empty()
	}

	/// Evaluate the filter against an asset's assignments.
	#[must_use]
	pub fn passes(&self, tags: &[TagAssignment]) -> bool {
		let satisfied =
			|pattern: &TagAssignment| tags.iter().any(|t| t.satisfies(pattern));

		self.require_all.iter().all(satisfied)
			&& (self.require_any.is_empty() || self.require_any.iter().any(satisfied))
			&& !self.exclude.iter().any(satisfied)
	}
}

/// A query tag that matched, with the level it matched at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedTag {
	/// The query pattern that matched
	pub tag: TagAssignment,
	/// Depth of the query pattern
	pub level: TagLevel,
}

/// Level-weighted tag match score in [0, 1].
///
/// `score = Σ w(level(q)) over matched q / Σ w(level(q)) over all q`.
/// An empty query scores 1.0: the absence of a constraint is full
/// satisfaction, not zero evidence.
#[must_use]
pub fn tag_match_score(
	query: &[TagAssignment],
	tags: &[TagAssignment],
) -> (f32, SmallVec<[MatchedTag; 8]>) {
	if query.is_empty() {
		return (1.0, SmallVec::new());
	}

	let mut matched = SmallVec::new();
	let mut hit = 0.0f32;
	let mut total = 0.0f32;
	for q in query {
		let level = q.depth();
		total += level.weight();
		if tags.iter().any(|t| t.satisfies(q)) {
			hit += level.weight();
			matched.push(MatchedTag {
				tag: q.clone(),
				level,
			});
		}
	}

	(hit / total, matched)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;

	fn tag(l1: &str, l2: Option<&str>, l3: Option<&str>, l4: Option<&str>) -> TagAssignment {
		TagAssignment::chain(l1, l2, l3, l4)
	}

	#[test]
	fn test_depth() {
		assert_eq!(tag("scene", None, None, None).depth(), TagLevel::L1);
		assert_eq!(tag("scene", Some("exterior"), None, None).depth(), TagLevel::L2);
		assert_eq!(
			tag("scene", Some("exterior"), Some("sunset"), Some("golden hour")).depth(),
			TagLevel::L4
		);
	}

	#[test]
	fn test_satisfies_prefix() {
		let full = tag("scene", Some("exterior"), Some("sunset"), None);
		assert!(full.satisfies(&tag("scene", None, None, None)));
		assert!(full.satisfies(&tag("scene", Some("exterior"), None, None)));
		assert!(full.satisfies(&full));
		assert!(!full.satisfies(&tag("scene", Some("interior"), None, None)));
		assert!(!full.satisfies(&tag("action", None, None, None)));
	}

	#[test]
	fn test_validate_default_vocabulary() {
		let h = TagHierarchy::default();
		assert!(h.validate(&tag("scene", Some("exterior"), Some("sunset"), None)).is_ok());
		assert!(h
			.validate(&tag("scene", Some("exterior"), Some("sunset"), Some("anything at all")))
			.is_ok());
		assert!(h.validate(&tag("unknown", None, None, None)).is_ok());
	}

	#[test]
	fn test_validate_rejects_unknown_levels() {
		let h = TagHierarchy::default();
		assert_eq!(
			h.validate(&tag("spaceship", None, None, None)),
			Err(TagRejection::UnknownL1("spaceship".into()))
		);
		assert!(matches!(
			h.validate(&tag("scene", Some("underwater"), None, None)),
			Err(TagRejection::UnknownL2 { .. })
		));
		assert!(matches!(
			h.validate(&tag("scene", Some("exterior"), Some("eclipse"), None)),
			Err(TagRejection::UnknownL3 { .. })
		));
	}

	#[test]
	fn test_validate_rejects_skipped_parent() {
		let h = TagHierarchy::default();
		// L4 without L3
		assert!(matches!(
			h.validate(&TagAssignment {
				l1: "scene".into(),
				l2: Some("exterior".into()),
				l3: None,
				l4: Some("moody".into()),
			}),
			Err(TagRejection::MissingParent(_))
		));
		// L3 without L2
		assert!(matches!(
			h.validate(&TagAssignment {
				l1: "scene".into(),
				l2: None,
				l3: Some("sunset".into()),
				l4: None,
			}),
			Err(TagRejection::MissingParent(_))
		));
	}

	#[test]
	fn test_normalization_case_insensitive() {
		let t = tag("Scene", Some("EXTERIOR"), None, None);
		assert_eq!(t.l1, "scene");
		assert_eq!(t.l2.as_deref(), Some("exterior"));
	}

	#[test]
	fn test_merge_never_overwrites() {
		let mut set = vec![SourcedAssignment {
			assignment: tag("scene", Some("exterior"), None, None),
			source: TagSource::Filename,
			confidence: 1.0,
		}];
		let added = merge_assignments(
			&mut set,
			[
				SourcedAssignment {
					assignment: tag("scene", Some("exterior"), None, None),
					source: TagSource::Enrichment,
					confidence: 0.4,
				},
				SourcedAssignment {
					assignment: tag("action", None, None, None),
					source: TagSource::Enrichment,
					confidence: 0.9,
				},
			],
		);
		assert_eq!(added, 1);
		assert_eq!(set.len(), 2);
		// The earlier filename source survives.
		assert_eq!(set[0].source, TagSource::Filename);
	}

	#[test]
	fn test_filter_all_any_exclude() {
		let tags = vec![
			tag("scene", Some("exterior"), Some("night"), None),
			tag("action", Some("motion"), Some("chase"), None),
		];
		let filter = TagFilter {
			require_all: vec![tag("scene", None, None, None)],
			require_any: vec![
				tag("action", Some("motion"), Some("chase"), None),
				tag("dialogue", None, None, None),
			],
			exclude: vec![tag("scene", Some("interior"), None, None)],
		};
		assert!(filter.passes(&tags));

		let excluding = TagFilter {
			exclude: vec![tag("action", None, None, None)],
			..TagFilter::default()
		};
		assert!(!excluding.passes(&tags));
	}

	#[test]
	fn test_tag_score_weights() {
		let tags = vec![tag("scene", Some("exterior"), Some("sunset"), None)];
		// L1 query matches: 1.0 / 1.0
		let (score, matched) = tag_match_score(&[tag("scene", None, None, None)], &tags);
		assert_eq!(score, 1.0);
		assert_eq!(matched.len(), 1);

		// One L1 hit + one L3 miss: 1.0 / 1.5
		let (score, _) = tag_match_score(
			&[
				tag("scene", None, None, None),
				tag("scene", Some("exterior"), Some("ocean"), None),
			],
			&tags,
		);
		assert!((score - 1.0 / 1.5).abs() < 1e-6);
	}

	#[test]
	fn test_tag_score_empty_query_is_full() {
		let (score, matched) = tag_match_score(&[], &[tag("scene", None, None, None)]);
		assert_eq!(score, 1.0);
		assert!(matched.is_empty());
	}

	#[test]
	fn test_l3_chains_cover_vocabulary() {
		let h = TagHierarchy::default();
		let chains = h.l3_chains();
		assert!(chains
			.iter()
			.any(|c| c.l3.as_deref() == Some("sunset") && c.l2.as_deref() == Some("exterior")));
		assert!(chains.iter().all(|c| c.depth() == TagLevel::L3));
	}
}
