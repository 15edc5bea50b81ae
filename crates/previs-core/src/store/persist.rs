//! On-disk persistence for the default store backend.
//!
//! Layout under the store directory:
//!
//! - `config.json` — declared dims and model ids; checked at open.
//! - `assets.jsonl` — one asset record per line, in row order, no vectors.
//! - `text_vectors.bin` — contiguous little-endian f32 matrix; row i of the
//!   matrix belongs to line i of `assets.jsonl`.
//! - `keyframes.jsonl` / `visual_vectors.bin` — same pairing for keyframes.
//! - `segments.jsonl` / `segment_vectors.bin` — same pairing for segments.
//!
//! Every file is written to a `.tmp` sibling and renamed into place, so a
//! crash mid-write leaves the previous generation readable. Startup is
//! tolerant: corrupt lines and orphaned rows are logged and skipped, never
//! fatal; only a configuration disagreement aborts the open.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::asset::{AssetRecord, KeyframeRecord, SegmentRecord};
use crate::error::{CoreError, Result};
use crate::vector::VectorMatrix;

use super::{Snapshot, StoreConfig};

const CONFIG_FILE: &str = "config.json";
const ASSETS_FILE: &str = "assets.jsonl";
const TEXT_VECTORS_FILE: &str = "text_vectors.bin";
const KEYFRAMES_FILE: &str = "keyframes.jsonl";
const VISUAL_VECTORS_FILE: &str = "visual_vectors.bin";
const SEGMENTS_FILE: &str = "segments.jsonl";
const SEGMENT_VECTORS_FILE: &str = "segment_vectors.bin";

// ============================================================================
// Save
// ============================================================================

/// Persist a full generation to `dir`.
pub(crate) fn save(dir: &Path, snapshot: &Snapshot) -> Result<()> {
	fs::create_dir_all(dir)?;
	write_json(&dir.join(CONFIG_FILE), &snapshot.config)?;
	write_jsonl(&dir.join(ASSETS_FILE), &snapshot.assets)?;
	write_matrix(&dir.join(TEXT_VECTORS_FILE), &snapshot.text)?;
	write_jsonl(&dir.join(KEYFRAMES_FILE), &snapshot.keyframes)?;
	write_matrix(&dir.join(VISUAL_VECTORS_FILE), &snapshot.visual)?;
	write_jsonl(&dir.join(SEGMENTS_FILE), &snapshot.segments)?;
	write_matrix(&dir.join(SEGMENT_VECTORS_FILE), &snapshot.segment_text)?;
	Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
	let json = serde_json::to_vec_pretty(value)
		.map_err(|e| CoreError::CorruptRecord(e.to_string()))?;
	write_atomic(path, &json)
}

fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
	let mut buf = Vec::new();
	for record in records {
		serde_json::to_writer(&mut buf, record)
			.map_err(|e| CoreError::CorruptRecord(e.to_string()))?;
		buf.push(b'\n');
	}
	write_atomic(path, &buf)
}

fn write_matrix(path: &Path, matrix: &VectorMatrix) -> Result<()> {
	let mut buf = Vec::with_capacity(matrix.as_slice().len() * 4);
	for value in matrix.as_slice() {
		buf.extend_from_slice(&value.to_le_bytes());
	}
	write_atomic(path, &buf)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
	let tmp = tmp_path(path);
	{
		let mut file = fs::File::create(&tmp)?;
		file.write_all(bytes)?;
		file.sync_all()?;
	}
	fs::rename(&tmp, path)?;
	Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
	let mut tmp = path.as_os_str().to_owned();
	tmp.push(".tmp");
	PathBuf::from(tmp)
}

// ============================================================================
// Load
// ============================================================================

/// Load the persisted generation, or an empty one for a fresh directory.
///
/// # Errors
///
/// Returns [`CoreError::ConfigMismatch`] when the persisted configuration
/// disagrees with `config` and `allow_rebuild` is false. I/O failures on
/// existing files surface as [`CoreError::StoreIo`].
pub(crate) fn load(dir: &Path, config: &StoreConfig, allow_rebuild: bool) -> Result<Snapshot> {
	let config_path = dir.join(CONFIG_FILE);
	if !config_path.exists() {
		return Ok(Snapshot::empty(config.clone()));
	}

	let persisted: StoreConfig = read_json(&config_path)?;
	if !persisted.compatible_with(config) {
		if allow_rebuild {
			warn!(
				persisted = ?persisted,
				current = ?config,
				"store config changed; discarding persisted vectors for rebuild"
			);
			return Ok(Snapshot::empty(config.clone()));
		}
		return Err(CoreError::ConfigMismatch(format!(
			"persisted text_dim={}/visual_dim={} vs configured text_dim={}/visual_dim={}",
			persisted.text_dim, persisted.visual_dim, config.text_dim, config.visual_dim
		)));
	}

	let assets: Vec<AssetRecord> = read_jsonl(&dir.join(ASSETS_FILE));
	let text = read_matrix(&dir.join(TEXT_VECTORS_FILE), config.text_dim);
	let keyframes: Vec<KeyframeRecord> = read_jsonl(&dir.join(KEYFRAMES_FILE));
	let visual = read_matrix(&dir.join(VISUAL_VECTORS_FILE), config.visual_dim);
	let segments: Vec<SegmentRecord> = read_jsonl(&dir.join(SEGMENTS_FILE));
	let segment_text = read_matrix(&dir.join(SEGMENT_VECTORS_FILE), config.text_dim);

	rebuild(
		config.clone(),
		assets,
		&text,
		keyframes,
		&visual,
		segments,
		&segment_text,
	)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
	let bytes = fs::read(path)?;
	serde_json::from_slice(&bytes)
		.map_err(|e| CoreError::CorruptRecord(format!("{}: {e}", path.display())))
}

/// Read a JSONL file, skipping (and logging) undecodable lines.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Vec<T> {
	let Ok(file) = fs::File::open(path) else {
		return Vec::new();
	};
	let mut records = Vec::new();
	for (line_no, line) in BufReader::new(file).lines().enumerate() {
		let Ok(line) = line else {
			warn!(path = %path.display(), line_no, "unreadable line; stopping scan");
			break;
		};
		if line.trim().is_empty() {
			continue;
		}
		match serde_json::from_str(&line) {
			Ok(record) => records.push(record),
			Err(err) => {
				warn!(path = %path.display(), line_no, %err, "skipping corrupt record");
			}
		}
	}
	records
}

/// Read a raw f32 matrix, truncating a ragged tail to whole rows.
fn read_matrix(path: &Path, dim: usize) -> Vec<Vec<f32>> {
	let Ok(bytes) = fs::read(path) else {
		return Vec::new();
	};
	let row_bytes = dim * 4;
	if row_bytes == 0 {
		return Vec::new();
	}
	if bytes.len() % row_bytes != 0 {
		warn!(
			path = %path.display(),
			len = bytes.len(),
			"matrix file is not a whole number of rows; truncating tail"
		);
	}
	bytes
		.chunks_exact(row_bytes)
		.map(|row| {
			row.chunks_exact(4)
				.map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
				.collect()
		})
		.collect()
}

/// Rebuild the in-memory generation by replaying records against their
/// matrix rows. Records past the end of their matrix (or orphaned from a
/// missing parent) are dropped with a log line, so a torn write costs the
/// tail, not the startup.
fn rebuild(
	config: StoreConfig,
	assets: Vec<AssetRecord>,
	text: &[Vec<f32>],
	keyframes: Vec<KeyframeRecord>,
	visual: &[Vec<f32>],
	segments: Vec<SegmentRecord>,
	segment_text: &[Vec<f32>],
) -> Result<Snapshot> {
	let mut snapshot = Snapshot::empty(config);

	let usable = assets.len().min(text.len());
	if usable < assets.len() {
		warn!(
			records = assets.len(),
			vectors = text.len(),
			"asset records without vectors; dropping tail"
		);
	}

	// Group children by asset in file order.
	let mut frames_by_asset: HashMap<crate::asset::AssetId, Vec<(KeyframeRecord, Vec<f32>)>> =
		HashMap::new();
	for (i, record) in keyframes.into_iter().enumerate() {
		match visual.get(i) {
			Some(vector) => frames_by_asset
				.entry(record.asset_id.clone())
				.or_default()
				.push((record, vector.clone())),
			None => warn!(keyframe = %record.id, "keyframe record without vector; dropped"),
		}
	}
	let mut segments_by_asset: HashMap<crate::asset::AssetId, Vec<(SegmentRecord, Vec<f32>)>> =
		HashMap::new();
	for (i, record) in segments.into_iter().enumerate() {
		match segment_text.get(i) {
			Some(vector) => segments_by_asset
				.entry(record.asset_id.clone())
				.or_default()
				.push((record, vector.clone())),
			None => warn!(segment = %record.id, "segment record without vector; dropped"),
		}
	}

	for (i, asset) in assets.into_iter().take(usable).enumerate() {
		let id = asset.id.clone();
		let frames = frames_by_asset.remove(&id).unwrap_or_default();
		let spans = segments_by_asset.remove(&id).unwrap_or_default();
		snapshot.insert_asset(asset, &text[i], frames, spans)?;
	}

	for id in frames_by_asset.keys() {
		warn!(asset = %id, "keyframes for unknown asset; dropped");
	}

	info!(
		assets = snapshot.asset_count(),
		keyframes = snapshot.keyframe_count(),
		"store loaded"
	);
	Ok(snapshot)
}
