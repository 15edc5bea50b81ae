//! Proxy transcoding.
//!
//! Source footage is often 4K ProRes or long-GOP camera originals that
//! are expensive to seek. A 720p H.264 proxy makes every downstream
//! decode (sampling, keyframe grabs) cheap. Proxies live at the
//! deterministic path `<proxies>/<asset_id>.mp4`; a failed transcode is
//! reported to the caller, which falls back to the original and marks the
//! asset `no_proxy`.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{PerceptionError, Result};

/// Deterministic proxy path for an asset.
#[must_use]
pub fn proxy_path(proxies_dir: &Path, asset_id: &str) -> PathBuf {
	proxies_dir.join(format!("{asset_id}.mp4"))
}

/// Transcode a source video to a 720p H.264 proxy.
///
/// Output height is fixed at 720 with the width following the source
/// aspect (`scale=-2:720` keeps it codec-friendly even for odd widths);
/// sources already at or below 720p are still rewrapped so downstream
/// decoding always sees the same codec.
///
/// # Errors
///
/// Returns [`PerceptionError::MediaNotFound`] for a missing source or
/// [`PerceptionError::FfmpegFailed`] when the transcode exits non-zero.
#[instrument(skip_all, fields(source = %source.as_ref().display(), asset = asset_id))]
pub async fn transcode_proxy(
	source: impl AsRef<Path>,
	proxies_dir: impl AsRef<Path>,
	asset_id: &str,
) -> Result<PathBuf> {
	let source = source.as_ref();
	if !source.exists() {
		return Err(PerceptionError::MediaNotFound(source.to_path_buf()));
	}

	let proxies_dir = proxies_dir.as_ref();
	tokio::fs::create_dir_all(proxies_dir).await?;
	let out_path = proxy_path(proxies_dir, asset_id);

	let output = Command::new("ffmpeg")
		.arg("-i")
		.arg(source)
		.args([
			"-vf",
			"scale=-2:'min(720,ih)'",
			"-c:v",
			"libx264",
			"-preset",
			"fast",
			"-crf",
			"23",
			"-c:a",
			"aac",
			"-b:a",
			"128k",
			"-movflags",
			"+faststart",
			"-y",
		])
		.arg(&out_path)
		.output()
		.await
		.map_err(|_| PerceptionError::FfmpegNotFound)?;

	if !output.status.success() {
		let stderr = String::from_utf8_lossy(&output.stderr);
		return Err(PerceptionError::FfmpegFailed {
			message: stderr.to_string(),
			exit_code: output.status.code(),
		});
	}

	debug!(proxy = %out_path.display(), "proxy written");
	Ok(out_path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_proxy_path_deterministic() {
		let path = proxy_path(Path::new("/data/proxies"), "abcd0123");
		assert_eq!(path, PathBuf::from("/data/proxies/abcd0123.mp4"));
	}

	#[tokio::test]
	async fn test_missing_source_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let err = transcode_proxy("/nonexistent.mov", dir.path(), "a1")
			.await
			.unwrap_err();
		assert!(matches!(err, PerceptionError::MediaNotFound(_)));
	}
}
