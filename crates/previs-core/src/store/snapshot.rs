//! Immutable store snapshots.
//!
//! A snapshot is the complete read view of the store as of one generation:
//! record vectors plus the dense vector matrices, joined by internal row
//! ids. Readers clone an `Arc<Snapshot>` and score against it without any
//! lock; writers build the next generation privately and swap the `Arc`.
//!
//! Row ids are dense and internal. Deletion swaps the last row into the
//! hole (matrix and record vector in lockstep) and remaps the moved
//! record's id, so external ids stay stable across generations.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::asset::{AssetId, AssetRecord, KeyframeId, KeyframeRecord, SegmentId, SegmentRecord};
use crate::error::{Modality, Result};
use crate::tags::TagFilter;
use crate::vector::{scan_top_k, RowScore, VectorMatrix};

use super::StoreConfig;

/// One immutable generation of the store.
#[derive(Debug, Clone)]
pub struct Snapshot {
	pub(crate) config: StoreConfig,
	pub(crate) assets: Vec<AssetRecord>,
	pub(crate) asset_rows: HashMap<AssetId, u32>,
	pub(crate) text: VectorMatrix,
	pub(crate) keyframes: Vec<KeyframeRecord>,
	pub(crate) keyframe_rows: HashMap<KeyframeId, u32>,
	pub(crate) asset_keyframes: HashMap<AssetId, Vec<u32>>,
	pub(crate) visual: VectorMatrix,
	pub(crate) segments: Vec<SegmentRecord>,
	pub(crate) segment_rows: HashMap<SegmentId, u32>,
	pub(crate) segment_text: VectorMatrix,
}

impl Snapshot {
	/// An empty snapshot for the given dimensions.
	#[must_use]
	pub(crate) fn empty(config: StoreConfig) -> Self {
		let text_dim = config.text_dim;
		let visual_dim = config.visual_dim;
		Self {
			config,
			assets: Vec::new(),
			asset_rows: HashMap::new(),
			text: VectorMatrix::new(Modality::Text, text_dim),
			keyframes: Vec::new(),
			keyframe_rows: HashMap::new(),
			asset_keyframes: HashMap::new(),
			visual: VectorMatrix::new(Modality::Visual, visual_dim),
			segments: Vec::new(),
			segment_rows: HashMap::new(),
			segment_text: VectorMatrix::new(Modality::Text, text_dim),
		}
	}

	// ------------------------------------------------------------------
	// Read API
	// ------------------------------------------------------------------

	/// Number of assets in this generation.
	#[must_use]
	pub fn asset_count(&self) -> usize {
		self.assets.len()
	}

	/// Number of keyframes in this generation.
	#[must_use]
	pub fn keyframe_count(&self) -> usize {
		self.keyframes.len()
	}

	/// Look up an asset record by external id.
	#[must_use]
	pub fn asset(&self, id: &AssetId) -> Option<&AssetRecord> {
		self.asset_rows
			.get(id)
			.and_then(|&row| self.assets.get(row as usize))
	}

	/// Asset record by dense row id.
	#[must_use]
	pub fn asset_by_row(&self, row: u32) -> Option<&AssetRecord> {
		self.assets.get(row as usize)
	}

	/// Keyframe record by dense row id.
	#[must_use]
	pub fn keyframe_by_row(&self, row: u32) -> Option<&KeyframeRecord> {
		self.keyframes.get(row as usize)
	}

	/// All keyframe records of one asset, chronological.
	#[must_use]
	pub fn keyframes_of(&self, id: &AssetId) -> Vec<&KeyframeRecord> {
		let mut frames: Vec<&KeyframeRecord> = self
			.asset_keyframes
			.get(id)
			.into_iter()
			.flatten()
			.filter_map(|&row| self.keyframes.get(row as usize))
			.collect();
		frames.sort_by(|a, b| {
			a.timestamp_s
				.partial_cmp(&b.timestamp_s)
				.unwrap_or(std::cmp::Ordering::Equal)
		});
		frames
	}

	/// Visual-matrix rows of one asset's keyframes.
	#[must_use]
	pub fn visual_rows_of(&self, id: &AssetId) -> &[u32] {
		self.asset_keyframes
			.get(id)
			.map_or(&[], Vec::as_slice)
	}

	/// Segment records of one asset, chronological.
	#[must_use]
	pub fn segments_of(&self, id: &AssetId) -> Vec<&SegmentRecord> {
		let mut spans: Vec<&SegmentRecord> = self
			.segments
			.iter()
			.filter(|s| &s.asset_id == id)
			.collect();
		spans.sort_by(|a, b| {
			a.start_s
				.partial_cmp(&b.start_s)
				.unwrap_or(std::cmp::Ordering::Equal)
		});
		spans
	}

	/// Iterate all asset records in row order.
	pub fn assets(&self) -> impl Iterator<Item = &AssetRecord> {
		self.assets.iter()
	}

	/// The store configuration this generation was built under.
	#[must_use]
	pub const fn config(&self) -> &StoreConfig {
		&self.config
	}

	/// Asset rows passing a tag filter. With an empty filter this is every
	/// row, so callers can feed the result straight into a scan.
	#[must_use]
	pub fn filter_candidates(&self, filter: &TagFilter) -> Vec<u32> {
		if filter.is_empty() {
			return (0..self.assets.len() as u32).collect();
		}
		self.assets
			.iter()
			.enumerate()
			.filter(|(_, asset)| filter.passes(&asset.tag_tuples()))
			.map(|(row, _)| row as u32)
			.collect()
	}

	/// Score a text-space query over asset rows.
	///
	/// # Errors
	///
	/// Returns [`crate::CoreError::Cancelled`] when `cancel` fires.
	pub fn text_scan(
		&self,
		query: &[f32],
		rows: Option<&[u32]>,
		k: usize,
		min_score: f32,
		cancel: &CancellationToken,
	) -> Result<Vec<RowScore>> {
		scan_top_k(&self.text, query, rows, k, min_score, cancel)
	}

	/// Score a visual-space query over keyframe rows.
	///
	/// # Errors
	///
	/// Returns [`crate::CoreError::Cancelled`] when `cancel` fires.
	pub fn visual_scan(
		&self,
		query: &[f32],
		rows: Option<&[u32]>,
		k: usize,
		min_score: f32,
		cancel: &CancellationToken,
	) -> Result<Vec<RowScore>> {
		scan_top_k(&self.visual, query, rows, k, min_score, cancel)
	}

	// ------------------------------------------------------------------
	// Generation building (writer side)
	// ------------------------------------------------------------------

	/// Append a fully validated asset with its children. Dim validation
	/// happened before this call; a failure here would leave the builder
	/// generation inconsistent, so the caller discards it on error.
	pub(crate) fn insert_asset(
		&mut self,
		asset: AssetRecord,
		text_embedding: &[f32],
		keyframes: Vec<(KeyframeRecord, Vec<f32>)>,
		segments: Vec<(SegmentRecord, Vec<f32>)>,
	) -> Result<()> {
		let asset_id = asset.id.clone();
		let asset_row = self.text.push(text_embedding)?;
		self.assets.push(asset);
		let _ = self.asset_rows.insert(asset_id.clone(), asset_row);

		let mut visual_rows = Vec::with_capacity(keyframes.len());
		for (record, embedding) in keyframes {
			let row = self.visual.push(&embedding)?;
			let _ = self.keyframe_rows.insert(record.id.clone(), row);
			self.keyframes.push(record);
			visual_rows.push(row);
		}
		let _ = self.asset_keyframes.insert(asset_id, visual_rows);

		for (record, embedding) in segments {
			let row = self.segment_text.push(&embedding)?;
			let _ = self.segment_rows.insert(record.id.clone(), row);
			self.segments.push(record);
		}
		Ok(())
	}

	/// Remove an asset and all its children. Returns `false` when the id
	/// is unknown.
	pub(crate) fn remove_asset(&mut self, id: &AssetId) -> bool {
		let Some(asset_row) = self.asset_rows.remove(id) else {
			return false;
		};

		// Asset row: swap-with-last in matrix and record vector together.
		if let Some(moved) = self.text.swap_remove(asset_row) {
			debug_assert_eq!(moved as usize, self.assets.len() - 1);
		}
		let _ = self.assets.swap_remove(asset_row as usize);
		if let Some(moved_asset) = self.assets.get(asset_row as usize) {
			let _ = self
				.asset_rows
				.insert(moved_asset.id.clone(), asset_row);
		}

		// Keyframe rows, removed from highest row down so earlier removals
		// never invalidate later ones.
		let mut rows = self.asset_keyframes.remove(id).unwrap_or_default();
		rows.sort_unstable_by(|a, b| b.cmp(a));
		for row in rows {
			let removed = self.keyframes[row as usize].id.clone();
			let _ = self.keyframe_rows.remove(&removed);
			let _ = self.visual.swap_remove(row);
			let _ = self.keyframes.swap_remove(row as usize);
			if let Some(moved) = self.keyframes.get(row as usize) {
				let moved_id = moved.id.clone();
				let moved_asset = moved.asset_id.clone();
				let old_row = self.keyframes.len() as u32;
				let _ = self.keyframe_rows.insert(moved_id, row);
				if let Some(sibling_rows) = self.asset_keyframes.get_mut(&moved_asset) {
					for r in sibling_rows.iter_mut() {
						if *r == old_row {
							*r = row;
						}
					}
				}
			}
		}

		// Segment rows.
		let mut segment_rows: Vec<u32> = self
			.segments
			.iter()
			.enumerate()
			.filter(|(_, s)| &s.asset_id == id)
			.map(|(row, _)| row as u32)
			.collect();
		segment_rows.sort_unstable_by(|a, b| b.cmp(a));
		for row in segment_rows {
			let removed = self.segments[row as usize].id.clone();
			let _ = self.segment_rows.remove(&removed);
			let _ = self.segment_text.swap_remove(row);
			let _ = self.segments.swap_remove(row as usize);
			if let Some(moved) = self.segments.get(row as usize) {
				let _ = self.segment_rows.insert(moved.id.clone(), row);
			}
		}

		true
	}
}
