//! Media probing via FFprobe.
//!
//! FFprobe runs as an external process and answers in JSON. External
//! processes are preferred over linked FFmpeg libraries for the same
//! reasons across this crate: no build-time FFmpeg dependency, consistent
//! behavior across platforms, and support for everything the system
//! FFmpeg supports.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{PerceptionError, Result};

// ============================================================================
// Probe Output
// ============================================================================

/// Metadata about a video file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
	/// Duration in seconds
	pub duration_s: f64,
	/// Frame rate (frames per second)
	pub frame_rate: f64,
	/// Video width in pixels
	pub width: u32,
	/// Video height in pixels
	pub height: u32,
	/// Video codec name
	pub codec: String,
	/// Whether the file has an audio stream
	pub has_audio: bool,
}

/// Raw FFprobe stream data.
#[derive(Debug, Deserialize)]
struct FfprobeStream {
	codec_type: String,
	#[serde(default)]
	duration: Option<String>,
	#[serde(default)]
	r_frame_rate: Option<String>,
	#[serde(default)]
	width: Option<u32>,
	#[serde(default)]
	height: Option<u32>,
	#[serde(default)]
	codec_name: Option<String>,
}

/// Raw FFprobe format data.
#[derive(Debug, Deserialize)]
struct FfprobeFormat {
	#[serde(default)]
	duration: Option<String>,
}

/// Raw FFprobe output.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
	streams: Vec<FfprobeStream>,
	#[serde(default)]
	format: Option<FfprobeFormat>,
}

// ============================================================================
// Availability
// ============================================================================

/// Check if FFmpeg is available in PATH.
#[instrument]
pub async fn check_ffmpeg() -> Result<()> {
	let status = Command::new("ffmpeg")
		.arg("-version")
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status()
		.await;

	match status {
		Ok(status) if status.success() => Ok(()),
		_ => Err(PerceptionError::FfmpegNotFound),
	}
}

/// Check if FFprobe is available in PATH.
#[instrument]
pub async fn check_ffprobe() -> Result<()> {
	let status = Command::new("ffprobe")
		.arg("-version")
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status()
		.await;

	match status {
		Ok(status) if status.success() => Ok(()),
		_ => Err(PerceptionError::FfprobeNotFound),
	}
}

// ============================================================================
// Probing
// ============================================================================

/// Probe a video file for duration, dimensions, codec, and audio presence.
///
/// # Errors
///
/// Returns [`PerceptionError::MediaNotFound`] for a missing file,
/// [`PerceptionError::InvalidMedia`] when FFprobe rejects it, and
/// [`PerceptionError::NoVideoStream`] when no video stream exists.
#[instrument(skip_all, fields(media = %path.as_ref().display()))]
pub async fn probe_video(path: impl AsRef<Path>) -> Result<VideoInfo> {
	let path = path.as_ref();

	if !path.exists() {
		return Err(PerceptionError::MediaNotFound(path.to_path_buf()));
	}

	let output = Command::new("ffprobe")
		.args([
			"-v",
			"error",
			"-show_entries",
			"stream=duration,r_frame_rate,width,height,codec_name,codec_type",
			"-show_entries",
			"format=duration",
			"-of",
			"json",
		])
		.arg(path)
		.output()
		.await
		.map_err(|_| PerceptionError::FfprobeNotFound)?;

	if !output.status.success() {
		return Err(PerceptionError::InvalidMedia(path.to_path_buf()));
	}

	let stdout = String::from_utf8_lossy(&output.stdout);
	let probe: FfprobeOutput = serde_json::from_str(&stdout)
		.map_err(|e| PerceptionError::ProbeParse(e.to_string()))?;

	let video_stream = probe
		.streams
		.iter()
		.find(|s| s.codec_type == "video")
		.ok_or_else(|| PerceptionError::NoVideoStream(path.to_path_buf()))?;

	let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

	// Duration: stream first, then container format.
	let duration_s = video_stream
		.duration
		.as_ref()
		.and_then(|d| d.parse::<f64>().ok())
		.or_else(|| {
			probe
				.format
				.as_ref()
				.and_then(|f| f.duration.as_ref())
				.and_then(|d| d.parse::<f64>().ok())
		})
		.unwrap_or(0.0);

	let frame_rate = video_stream
		.r_frame_rate
		.as_deref()
		.and_then(parse_frame_rate)
		.unwrap_or(30.0);

	let info = VideoInfo {
		duration_s,
		frame_rate,
		width: video_stream.width.unwrap_or(0),
		height: video_stream.height.unwrap_or(0),
		codec: video_stream
			.codec_name
			.clone()
			.unwrap_or_else(|| "unknown".to_string()),
		has_audio,
	};
	debug!(?info, "probed video");
	Ok(info)
}

/// Probe a still image for its dimensions without a full decode.
///
/// # Errors
///
/// Returns [`PerceptionError::MediaNotFound`] for a missing file or
/// [`PerceptionError::ImageRead`] for an undecodable one.
#[instrument(skip_all, fields(media = %path.as_ref().display()))]
pub fn probe_image(path: impl AsRef<Path>) -> Result<(u32, u32)> {
	let path = path.as_ref();
	if !path.exists() {
		return Err(PerceptionError::MediaNotFound(path.to_path_buf()));
	}
	let dims = image::image_dimensions(path)?;
	Ok(dims)
}

/// Parse FFprobe's `num/den` frame-rate notation.
fn parse_frame_rate(raw: &str) -> Option<f64> {
	match raw.split_once('/') {
		Some((num, den)) => {
			let num: f64 = num.parse().ok()?;
			let den: f64 = den.parse().ok()?;
			(den > 0.0).then_some(num / den)
		}
		None => raw.parse().ok(),
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_frame_rate_fraction() {
		assert_eq!(parse_frame_rate("30000/1001").unwrap().round(), 30.0);
		assert_eq!(parse_frame_rate("25/1").unwrap(), 25.0);
		assert_eq!(parse_frame_rate("24").unwrap(), 24.0);
		assert!(parse_frame_rate("25/0").is_none());
		assert!(parse_frame_rate("x/y").is_none());
	}

	#[test]
	fn test_probe_image_missing_file() {
		let err = probe_image("/nonexistent/frame.png").unwrap_err();
		assert!(matches!(err, PerceptionError::MediaNotFound(_)));
	}

	#[test]
	fn test_probe_image_dimensions() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("dot.png");
		image::RgbImage::new(8, 6).save(&path).unwrap();
		assert_eq!(probe_image(&path).unwrap(), (8, 6));
	}

	#[tokio::test]
	async fn test_probe_video_missing_file() {
		let err = probe_video("/nonexistent/clip.mp4").await.unwrap_err();
		assert!(matches!(err, PerceptionError::MediaNotFound(_)));
	}
}
