//! Filename tag heuristics.
//!
//! Production footage arrives with names like `EXT_city_night_chase_01.mp4`
//! or `海边日落_特写.mov`. The lexicon maps case-insensitive tokens (English
//! and Chinese) to partial tag chains; every token hit contributes its
//! chain as a candidate assignment with full confidence.
//!
//! Tokenization splits on the common separators (`_`, `-`, space, dots)
//! and on script boundaries, so mixed ASCII/CJK names yield both kinds of
//! token. CJK runs are additionally matched by sliding windows because
//! they carry no separators of their own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{SourcedAssignment, TagAssignment, TagHierarchy, TagSource};

/// Longest CJK window tried against the lexicon.
const MAX_CJK_WINDOW: usize = 4;

/// A partial chain contributed by one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconEntry {
	/// L1 category
	pub l1: String,
	/// Optional L2 subcategory
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub l2: Option<String>,
	/// Optional L3 attribute
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub l3: Option<String>,
}

impl LexiconEntry {
	fn new(l1: &str, l2: Option<&str>, l3: Option<&str>) -> Self {
		Self {
			l1: l1.to_string(),
			l2: l2.map(str::to_string),
			l3: l3.map(str::to_string),
		}
	}

	fn to_assignment(&self) -> TagAssignment {
		TagAssignment::chain(
			self.l1.clone(),
			self.l2.as_deref(),
			self.l3.as_deref(),
			None,
		)
	}
}

/// Token → chain dictionary for filename tagging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lexicon {
	entries: HashMap<String, LexiconEntry>,
}

impl Lexicon {
	/// An empty lexicon.
	#[must_use]
	pub fn empty() -> Self {
		Self::default()
	}

	/// Register a token. Tokens are stored lowercase.
	pub fn insert(&mut self, token: &str, entry: LexiconEntry) -> &mut Self {
		let _ = self.entries.insert(token.to_lowercase(), entry);
		self
	}

	/// Number of registered tokens.
	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the lexicon has no tokens.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Look up one already-lowercased token.
	#[must_use]
	pub fn get(&self, token: &str) -> Option<&LexiconEntry> {
		self.entries.get(token)
	}

	/// Tag a filename: tokenize, look up every token, validate each hit
	/// against the hierarchy, and return deduplicated assignments.
	///
	/// Hits that fail hierarchy validation are dropped; the lexicon is
	/// operator-supplied and may lag behind vocabulary edits.
	#[must_use]
	pub fn tag_filename(
		&self,
		filename: &str,
		hierarchy: &TagHierarchy,
	) -> Vec<SourcedAssignment> {
		let mut out: Vec<SourcedAssignment> = Vec::new();
		for token in tokenize(filename) {
			let Some(entry) = self.entries.get(&token) else {
				continue;
			};
			let assignment = entry.to_assignment();
			if let Err(rejection) = hierarchy.validate(&assignment) {
				tracing::warn!(token, %rejection, "lexicon entry rejected by hierarchy");
				continue;
			}
			if out.iter().all(|e| e.assignment != assignment) {
				out.push(SourcedAssignment {
					assignment,
					source: TagSource::Filename,
					confidence: 1.0,
				});
			}
		}
		out
	}
}

impl Lexicon {
	/// The built-in production-footage lexicon.
	#[must_use]
	pub fn builtin() -> Self {
		let mut lex = Self::empty();
		let table: &[(&[&str], LexiconEntry)] = &[
			// Screenplay slugline conventions
			(&["int", "interior", "内景"], LexiconEntry::new("scene", Some("interior"), None)),
			(&["ext", "exterior", "外景"], LexiconEntry::new("scene", Some("exterior"), None)),
			// Exterior attributes
			(&["day", "白天", "日景"], LexiconEntry::new("scene", Some("exterior"), Some("day"))),
			(&["night", "夜", "夜晚", "夜景"], LexiconEntry::new("scene", Some("exterior"), Some("night"))),
			(&["rain", "雨"], LexiconEntry::new("scene", Some("exterior"), Some("rain"))),
			(&["snow", "雪"], LexiconEntry::new("scene", Some("exterior"), Some("snow"))),
			(&["sunset", "dusk", "日落", "黄昏"], LexiconEntry::new("scene", Some("exterior"), Some("sunset"))),
			(&["ocean", "sea", "海", "海边", "海洋"], LexiconEntry::new("scene", Some("exterior"), Some("ocean"))),
			// Urban / nature
			(&["city", "urban", "城市"], LexiconEntry::new("scene", Some("urban"), None)),
			(&["street", "街道"], LexiconEntry::new("scene", Some("urban"), Some("street"))),
			(&["rooftop", "天台"], LexiconEntry::new("scene", Some("urban"), Some("rooftop"))),
			(&["alley", "巷"], LexiconEntry::new("scene", Some("urban"), Some("alley"))),
			(&["forest", "森林"], LexiconEntry::new("scene", Some("nature"), Some("forest"))),
			(&["mountain", "山"], LexiconEntry::new("scene", Some("nature"), Some("mountain"))),
			(&["desert", "沙漠"], LexiconEntry::new("scene", Some("nature"), Some("desert"))),
			(&["river", "河"], LexiconEntry::new("scene", Some("nature"), Some("river"))),
			// Interiors
			(&["office", "办公室"], LexiconEntry::new("scene", Some("interior"), Some("office"))),
			(&["home", "家"], LexiconEntry::new("scene", Some("interior"), Some("home"))),
			(&["studio", "摄影棚"], LexiconEntry::new("scene", Some("interior"), Some("studio"))),
			(&["warehouse", "仓库"], LexiconEntry::new("scene", Some("interior"), Some("warehouse"))),
			// Action
			(&["chase", "追逐", "追"], LexiconEntry::new("action", Some("motion"), Some("chase"))),
			(&["run", "奔跑"], LexiconEntry::new("action", Some("motion"), Some("run"))),
			(&["walk", "行走"], LexiconEntry::new("action", Some("motion"), Some("walk"))),
			(&["fight", "打斗", "格斗"], LexiconEntry::new("action", Some("combat"), Some("fight"))),
			(&["shootout", "枪战"], LexiconEntry::new("action", Some("combat"), Some("shootout"))),
			// Characters
			(&["hero", "protagonist", "主角"], LexiconEntry::new("character", Some("protagonist"), None)),
			(&["villain", "antagonist", "反派"], LexiconEntry::new("character", Some("antagonist"), None)),
			(&["crowd", "人群"], LexiconEntry::new("character", Some("crowd"), None)),
			(&["closeup", "特写"], LexiconEntry::new("character", Some("protagonist"), Some("closeup"))),
			// Props
			(&["car", "汽车", "车"], LexiconEntry::new("prop", Some("vehicle"), Some("car"))),
			(&["motorcycle", "摩托"], LexiconEntry::new("prop", Some("vehicle"), Some("motorcycle"))),
			(&["aircraft", "plane", "飞机"], LexiconEntry::new("prop", Some("vehicle"), Some("aircraft"))),
			(&["boat", "船"], LexiconEntry::new("prop", Some("vehicle"), Some("boat"))),
			(&["gun", "枪"], LexiconEntry::new("prop", Some("weapon"), Some("gun"))),
			// Dialogue
			(&["dialogue", "对话"], LexiconEntry::new("dialogue", None, None)),
			(&["interview", "采访"], LexiconEntry::new("dialogue", Some("conversation"), Some("interview"))),
			(&["speech", "演讲"], LexiconEntry::new("dialogue", Some("monologue"), Some("speech"))),
		];
		for (tokens, entry) in table {
			for token in *tokens {
				let _ = lex.insert(token, entry.clone());
			}
		}
		lex
	}
}

// ============================================================================
// Tokenization
// ============================================================================

/// Split a filename into lowercase lookup tokens.
///
/// The extension is dropped; ASCII runs split on `_`, `-`, space, dots and
/// digit boundaries; each CJK run yields the run itself plus sliding
/// windows of 2..=[`MAX_CJK_WINDOW`] characters.
#[must_use]
pub fn tokenize(filename: &str) -> Vec<String> {
	let stem = filename
		.rsplit_once('.')
		.map_or(filename, |(stem, _ext)| stem);

	let mut tokens = Vec::new();
	let mut ascii = String::new();
	let mut cjk: Vec<char> = Vec::new();

	let mut flush_ascii = |buf: &mut String, tokens: &mut Vec<String>| {
		if !buf.is_empty() {
			tokens.push(std::mem::take(buf).to_lowercase());
		}
	};
	let mut flush_cjk = |buf: &mut Vec<char>, tokens: &mut Vec<String>| {
		if buf.is_empty() {
			return;
		}
		let run: String = buf.iter().collect();
		tokens.push(run);
		for window in 2..=MAX_CJK_WINDOW.min(buf.len().saturating_sub(1)) {
			for start in 0..=buf.len() - window {
				tokens.push(buf[start..start + window].iter().collect());
			}
		}
		buf.clear();
	};

	for ch in stem.chars() {
		if is_cjk(ch) {
			flush_ascii(&mut ascii, &mut tokens);
			cjk.push(ch);
		} else if ch.is_ascii_alphabetic() {
			flush_cjk(&mut cjk, &mut tokens);
			ascii.push(ch);
		} else {
			// Separators and digits end both kinds of run.
			flush_ascii(&mut ascii, &mut tokens);
			flush_cjk(&mut cjk, &mut tokens);
		}
	}
	flush_ascii(&mut ascii, &mut tokens);
	flush_cjk(&mut cjk, &mut tokens);

	tokens
}

const fn is_cjk(ch: char) -> bool {
	matches!(ch,
		'\u{4E00}'..='\u{9FFF}'          // CJK Unified Ideographs
		| '\u{3400}'..='\u{4DBF}'        // Extension A
		| '\u{F900}'..='\u{FAFF}')       // Compatibility Ideographs
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_tokenize_ascii_separators() {
		let tokens = tokenize("EXT_city_night-chase 01.mp4");
		assert!(tokens.contains(&"ext".to_string()));
		assert!(tokens.contains(&"city".to_string()));
		assert!(tokens.contains(&"night".to_string()));
		assert!(tokens.contains(&"chase".to_string()));
		// Extension and digits are not tokens.
		assert!(!tokens.contains(&"mp4".to_string()));
		assert!(!tokens.contains(&"01".to_string()));
	}

	#[test]
	fn test_tokenize_cjk_windows() {
		let tokens = tokenize("海边日落_特写.mov");
		assert!(tokens.contains(&"海边日落".to_string()));
		assert!(tokens.contains(&"日落".to_string()));
		assert!(tokens.contains(&"海边".to_string()));
		assert!(tokens.contains(&"特写".to_string()));
	}

	#[test]
	fn test_tokenize_mixed_scripts() {
		let tokens = tokenize("night夜景test");
		assert!(tokens.contains(&"night".to_string()));
		assert!(tokens.contains(&"夜景".to_string()));
		assert!(tokens.contains(&"test".to_string()));
	}

	#[test]
	fn test_builtin_tags_slugline_name() {
		let lex = Lexicon::builtin();
		let h = TagHierarchy::default();
		let tags = lex.tag_filename("EXT_city_night_chase_01.mp4", &h);

		let paths: Vec<String> = tags.iter().map(|t| t.assignment.display_path()).collect();
		assert!(paths.contains(&"scene/exterior".to_string()));
		assert!(paths.contains(&"scene/urban".to_string()));
		assert!(paths.contains(&"scene/exterior/night".to_string()));
		assert!(paths.contains(&"action/motion/chase".to_string()));
		assert!(tags.iter().all(|t| t.source == TagSource::Filename));
	}

	#[test]
	fn test_builtin_tags_chinese_name() {
		let lex = Lexicon::builtin();
		let h = TagHierarchy::default();
		let tags = lex.tag_filename("海边日落.mp4", &h);
		let paths: Vec<String> = tags.iter().map(|t| t.assignment.display_path()).collect();
		assert!(paths.contains(&"scene/exterior/sunset".to_string()));
		assert!(paths.contains(&"scene/exterior/ocean".to_string()));
	}

	#[test]
	fn test_duplicate_tokens_dedup() {
		let lex = Lexicon::builtin();
		let h = TagHierarchy::default();
		let tags = lex.tag_filename("night_night_night.mp4", &h);
		assert_eq!(tags.len(), 1);
	}

	#[test]
	fn test_invalid_lexicon_entry_dropped() {
		let mut lex = Lexicon::empty();
		let _ = lex.insert("warp", LexiconEntry::new("starfield", None, None));
		let h = TagHierarchy::default();
		assert!(lex.tag_filename("warp_core.mp4", &h).is_empty());
	}
}
