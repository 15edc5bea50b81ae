//! Thumbnail storage.
//!
//! Thumbnails live at deterministic content-addressed paths,
//! `<thumbs>/<asset_id>/<timestamp_ms>.jpg`, so readers never need an
//! index and writers partition by asset with no locking.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use tracing::instrument;

use crate::error::Result;

/// Default bound on the longer thumbnail edge, in pixels.
pub const DEFAULT_MAX_EDGE: u32 = 320;

/// Deterministic thumbnail path for an asset frame.
#[must_use]
pub fn thumbnail_path(thumbs_dir: &Path, asset_id: &str, timestamp_ms: u64) -> PathBuf {
	thumbs_dir.join(asset_id).join(format!("{timestamp_ms}.jpg"))
}

/// Downscale a frame to `max_edge` (preserving aspect) and write it to its
/// deterministic path. Frames already small enough are re-encoded without
/// scaling. Returns the written path.
///
/// # Errors
///
/// Returns [`crate::PerceptionError::ImageRead`] for undecodable frames
/// and [`crate::PerceptionError::Io`] for filesystem failures.
#[instrument(skip_all, fields(asset = asset_id, ms = timestamp_ms))]
pub fn write_thumbnail(
	frame_path: &Path,
	thumbs_dir: &Path,
	asset_id: &str,
	timestamp_ms: u64,
	max_edge: u32,
) -> Result<PathBuf> {
	let out_path = thumbnail_path(thumbs_dir, asset_id, timestamp_ms);
	if let Some(parent) = out_path.parent() {
		std::fs::create_dir_all(parent)?;
	}

	let image = image::open(frame_path)?;
	let (w, h) = (image.width(), image.height());
	let scaled = if w.max(h) > max_edge {
		image.resize(max_edge, max_edge, FilterType::Triangle)
	} else {
		image
	};
	scaled.save(&out_path)?;
	Ok(out_path)
}
