//! The vector store.
//!
//! The store exclusively owns asset/keyframe/segment rows and the vector
//! matrices; every other component holds only ids. Reads are lock-free:
//! callers take an `Arc<Snapshot>` and keep scoring against it even while
//! writes commit. Writes serialize behind a single writer lock, build the
//! next generation privately, persist it, and swap the `Arc` under a short
//! write lock.
//!
//! Writes are transactional at the asset level: either the asset row and
//! all of its keyframes and segments commit together, or nothing changes.
//! Any vector of the wrong dimension rejects the whole write and bumps the
//! `rejected_writes` counter without touching the store.

mod persist;
mod snapshot;

pub use snapshot::Snapshot;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::asset::{AssetId, AssetRecord, KeyframeRecord, MediaType, SegmentRecord};
use crate::error::{CoreError, Modality, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Declared store dimensions and model identity. Persisted as
/// `config.json`; opening a store under a different configuration aborts
/// unless `allow_rebuild` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
	/// Text embedding dimension
	pub text_dim: usize,
	/// Visual embedding dimension
	pub visual_dim: usize,
	/// Identifier of the text model that produced the text vectors
	pub text_model: String,
	/// Identifier of the visual model that produced the visual vectors
	pub visual_model: String,
	/// Capacity cap; writes past it fail with `StoreFull`
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_assets: Option<usize>,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			text_dim: 384,
			visual_dim: 512,
			text_model: "bge-small-en-v1.5".to_string(),
			visual_model: "mobileclip-s2".to_string(),
			max_assets: None,
		}
	}
}

impl StoreConfig {
	/// Whether vectors persisted under `self` remain valid under `other`.
	#[must_use]
	pub fn compatible_with(&self, other: &Self) -> bool {
		self.text_dim == other.text_dim
			&& self.visual_dim == other.visual_dim
			&& self.text_model == other.text_model
			&& self.visual_model == other.visual_model
	}
}

// ============================================================================
// Writes
// ============================================================================

/// A complete asset write: the record plus every vector that belongs to it.
#[derive(Debug, Clone)]
pub struct AssetWrite {
	/// The asset record
	pub asset: AssetRecord,
	/// Primary text embedding, `text_dim` floats
	pub text_embedding: Vec<f32>,
	/// Keyframe records with their visual embeddings, chronological
	pub keyframes: Vec<(KeyframeRecord, Vec<f32>)>,
	/// Segment records with their text embeddings, chronological
	pub segments: Vec<(SegmentRecord, Vec<f32>)>,
}

// ============================================================================
// Store
// ============================================================================

/// Snapshot-swapping vector store with optional on-disk persistence.
pub struct VectorStore {
	dir: Option<PathBuf>,
	current: RwLock<Arc<Snapshot>>,
	writer: Mutex<()>,
	rejected_writes: AtomicU64,
}

impl VectorStore {
	/// Open (or create) a persisted store at `dir`.
	///
	/// # Errors
	///
	/// Returns [`CoreError::ConfigMismatch`] when the persisted config
	/// disagrees and `allow_rebuild` is false, or [`CoreError::StoreIo`]
	/// on unreadable state.
	#[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
	pub fn open(dir: impl AsRef<Path>, config: StoreConfig, allow_rebuild: bool) -> Result<Self> {
		let dir = dir.as_ref().to_path_buf();
		std::fs::create_dir_all(&dir)?;
		let snapshot = persist::load(&dir, &config, allow_rebuild)?;
		let store = Self {
			dir: Some(dir),
			current: RwLock::new(Arc::new(snapshot)),
			writer: Mutex::new(()),
			rejected_writes: AtomicU64::new(0),
		};
		// Make the (possibly rebuilt) config durable immediately.
		store.persist_current()?;
		Ok(store)
	}

	/// A purely in-memory store, for hosts that manage persistence
	/// themselves and for tests.
	#[must_use]
	pub fn in_memory(config: StoreConfig) -> Self {
		Self {
			dir: None,
			current: RwLock::new(Arc::new(Snapshot::empty(config))),
			writer: Mutex::new(()),
			rejected_writes: AtomicU64::new(0),
		}
	}

	/// The current generation. Cheap; callers hold it for the whole read.
	#[must_use]
	pub fn snapshot(&self) -> Arc<Snapshot> {
		Arc::clone(&self.current.read())
	}

	/// How many writes were rejected for dimension mismatches.
	#[must_use]
	pub fn rejected_writes(&self) -> u64 {
		self.rejected_writes.load(Ordering::Relaxed)
	}

	/// Whether an asset id exists in the current generation.
	#[must_use]
	pub fn contains(&self, id: &AssetId) -> bool {
		self.snapshot().asset(id).is_some()
	}

	/// Number of assets in the current generation.
	#[must_use]
	pub fn asset_count(&self) -> usize {
		self.snapshot().asset_count()
	}

	/// Fetch one asset record.
	///
	/// # Errors
	///
	/// Returns [`CoreError::NotFound`] for an unknown id.
	pub fn get_asset(&self, id: &AssetId) -> Result<AssetRecord> {
		self.snapshot()
			.asset(id)
			.cloned()
			.ok_or_else(|| CoreError::NotFound(id.to_string()))
	}

	/// Fetch an asset's keyframe records, chronological.
	///
	/// # Errors
	///
	/// Returns [`CoreError::NotFound`] for an unknown id.
	pub fn list_keyframes(&self, id: &AssetId) -> Result<Vec<KeyframeRecord>> {
		let snapshot = self.snapshot();
		if snapshot.asset(id).is_none() {
			return Err(CoreError::NotFound(id.to_string()));
		}
		Ok(snapshot.keyframes_of(id).into_iter().cloned().collect())
	}

	/// Commit one asset write, replacing any existing asset with the same
	/// id together with all of its children.
	///
	/// # Errors
	///
	/// [`CoreError::DimensionMismatch`] (counter bumped, store untouched),
	/// [`CoreError::InvalidInput`] for violated record invariants,
	/// [`CoreError::StoreFull`] past the capacity cap, or
	/// [`CoreError::StoreIo`] when persistence fails (no swap happens).
	#[instrument(skip_all, fields(asset = %write.asset.id))]
	pub fn commit(&self, write: AssetWrite) -> Result<()> {
		let _writer = self.writer.lock();
		let previous = self.snapshot();

		self.validate(&previous, &write)?;

		let replacing = previous.asset(&write.asset.id).is_some();
		if !replacing {
			if let Some(cap) = previous.config().max_assets {
				if previous.asset_count() >= cap {
					return Err(CoreError::StoreFull(format!(
						"store holds {} assets, cap is {cap}",
						previous.asset_count()
					)));
				}
			}
		}

		let mut next = (*previous).clone();
		if replacing {
			let _ = next.remove_asset(&write.asset.id);
		}
		next.insert_asset(
			write.asset,
			&write.text_embedding,
			write.keyframes,
			write.segments,
		)?;

		self.swap_in(next)?;
		debug!(replacing, "asset committed");
		Ok(())
	}

	/// Delete an asset and all of its children.
	///
	/// # Errors
	///
	/// Returns [`CoreError::NotFound`] for an unknown id, or
	/// [`CoreError::StoreIo`] when persistence fails (no swap happens).
	#[instrument(skip_all, fields(asset = %id))]
	pub fn delete(&self, id: &AssetId) -> Result<()> {
		let _writer = self.writer.lock();
		let previous = self.snapshot();
		if previous.asset(id).is_none() {
			return Err(CoreError::NotFound(id.to_string()));
		}
		let mut next = (*previous).clone();
		let _ = next.remove_asset(id);
		self.swap_in(next)
	}

	// ------------------------------------------------------------------
	// Internals
	// ------------------------------------------------------------------

	fn validate(&self, snapshot: &Snapshot, write: &AssetWrite) -> Result<()> {
		let config = snapshot.config();

		// Dim safety first: any wrong vector rejects the whole write.
		let dim_check = |len: usize, modality: Modality, expected: usize| -> Result<()> {
			if len == expected {
				Ok(())
			} else {
				Err(CoreError::DimensionMismatch {
					modality,
					expected,
					got: len,
				})
			}
		};
		let dims = std::iter::once(dim_check(
			write.text_embedding.len(),
			Modality::Text,
			config.text_dim,
		))
		.chain(write.keyframes.iter().map(|(_, v)| {
			dim_check(v.len(), Modality::Visual, config.visual_dim)
		}))
		.chain(write.segments.iter().map(|(_, v)| {
			dim_check(v.len(), Modality::Text, config.text_dim)
		}));
		for check in dims {
			if let Err(err) = check {
				let _ = self.rejected_writes.fetch_add(1, Ordering::Relaxed);
				return Err(err);
			}
		}

		// Record invariants.
		let asset = &write.asset;
		if !asset.completed_invariants_hold() {
			return Err(CoreError::InvalidInput(format!(
				"asset {} marked completed without tags/summary/keyframes",
				asset.id
			)));
		}
		let duration = asset.duration_s.unwrap_or(f64::INFINITY);
		let mut previous_ts = f64::NEG_INFINITY;
		for (frame, _) in &write.keyframes {
			if frame.asset_id != asset.id {
				return Err(CoreError::InvalidInput(format!(
					"keyframe {} belongs to a different asset",
					frame.id
				)));
			}
			if frame.timestamp_s < 0.0 || frame.timestamp_s > duration {
				return Err(CoreError::InvalidInput(format!(
					"keyframe {} timestamp {} outside [0, {duration}]",
					frame.id, frame.timestamp_s
				)));
			}
			if frame.timestamp_s <= previous_ts {
				return Err(CoreError::InvalidInput(format!(
					"keyframe timestamps must be strictly increasing at {}",
					frame.id
				)));
			}
			previous_ts = frame.timestamp_s;
		}
		for (segment, _) in &write.segments {
			if segment.start_s < 0.0
				|| segment.end_s <= segment.start_s
				|| segment.end_s > duration
			{
				return Err(CoreError::InvalidInput(format!(
					"segment {} span [{}, {}] invalid for duration {duration}",
					segment.id, segment.start_s, segment.end_s
				)));
			}
		}
		// A pending/processing skeleton has no duration yet; only a
		// completed video must carry one.
		if asset.media_type == MediaType::Video
			&& asset.status == crate::asset::ProcessingStatus::Completed
			&& asset.duration_s.is_none()
		{
			return Err(CoreError::InvalidInput(format!(
				"completed video asset {} has no duration",
				asset.id
			)));
		}
		Ok(())
	}

	/// Persist the candidate generation, then swap it in. Ordering matters:
	/// a persistence failure must leave readers on the previous generation.
	fn swap_in(&self, next: Snapshot) -> Result<()> {
		let next = Arc::new(next);
		if let Some(dir) = &self.dir {
			persist::save(dir, &next)?;
		}
		*self.current.write() = next;
		Ok(())
	}

	fn persist_current(&self) -> Result<()> {
		if let Some(dir) = &self.dir {
			persist::save(dir, &self.snapshot())?;
		}
		Ok(())
	}
}

impl std::fmt::Debug for VectorStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("VectorStore")
			.field("dir", &self.dir)
			.field("assets", &self.asset_count())
			.field("rejected_writes", &self.rejected_writes())
			.finish()
	}
}
