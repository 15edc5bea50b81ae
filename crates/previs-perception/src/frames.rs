//! Frame extraction via the FFmpeg CLI.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::{PerceptionError, Result};

/// JPEG quality for analysis and keyframe grabs (1-31, lower is better).
const GRAB_QUALITY: u32 = 2;

/// A frame written to disk during extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampledFrame {
	/// Path of the frame image
	pub path: PathBuf,
	/// Timestamp in seconds
	pub timestamp_s: f64,
}

/// Extract one frame at an exact timestamp.
///
/// Seeks before the input (`-ss` before `-i`) so a grab out of a long
/// clip stays cheap; FFmpeg lands on the nearest decodable frame.
///
/// # Errors
///
/// Returns [`PerceptionError::FrameExtractionFailed`] when FFmpeg exits
/// non-zero or produces no file.
#[instrument(skip_all, fields(video = %video_path.as_ref().display(), timestamp = timestamp_s))]
pub async fn extract_frame_at(
	video_path: impl AsRef<Path>,
	timestamp_s: f64,
	output_path: impl AsRef<Path>,
) -> Result<SampledFrame> {
	let video_path = video_path.as_ref();
	let output_path = output_path.as_ref();

	if !video_path.exists() {
		return Err(PerceptionError::MediaNotFound(video_path.to_path_buf()));
	}
	if let Some(parent) = output_path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}

	let output = Command::new("ffmpeg")
		.args(["-ss", &format!("{timestamp_s:.3}"), "-i"])
		.arg(video_path)
		.args(["-vframes", "1", "-q:v", &GRAB_QUALITY.to_string(), "-y"])
		.arg(output_path)
		.output()
		.await
		.map_err(|_| PerceptionError::FfmpegNotFound)?;

	if !output.status.success() {
		let stderr = String::from_utf8_lossy(&output.stderr);
		return Err(PerceptionError::FrameExtractionFailed {
			timestamp: timestamp_s,
			reason: stderr.to_string(),
		});
	}
	if !output_path.exists() {
		return Err(PerceptionError::FrameExtractionFailed {
			timestamp: timestamp_s,
			reason: "output file was not created".to_string(),
		});
	}

	Ok(SampledFrame {
		path: output_path.to_path_buf(),
		timestamp_s,
	})
}

/// Sample frames at a fixed rate into `work_dir` for scene analysis.
///
/// One FFmpeg invocation with an `fps` filter writes `%05d.jpg` files;
/// timestamps are reconstructed from the sample index. `max_samples`
/// bounds the run on long clips.
///
/// # Errors
///
/// Returns [`PerceptionError::FfmpegFailed`] when the sampling run fails
/// outright; partial output from a mid-stream decode error is returned
/// with a warning instead.
#[instrument(skip_all, fields(video = %video_path.as_ref().display(), fps = sample_fps))]
pub async fn sample_frames(
	video_path: impl AsRef<Path>,
	work_dir: impl AsRef<Path>,
	sample_fps: f64,
	max_samples: usize,
) -> Result<Vec<SampledFrame>> {
	let video_path = video_path.as_ref();
	let work_dir = work_dir.as_ref();

	if !video_path.exists() {
		return Err(PerceptionError::MediaNotFound(video_path.to_path_buf()));
	}
	tokio::fs::create_dir_all(work_dir).await?;

	let prefix = uuid::Uuid::new_v4();
	let pattern = work_dir.join(format!("{prefix}-%05d.jpg"));

	let mut args: Vec<String> = vec![
		"-i".into(),
		video_path.display().to_string(),
		"-vf".into(),
		format!("fps={sample_fps}"),
		"-q:v".into(),
		GRAB_QUALITY.to_string(),
	];
	if max_samples > 0 {
		args.push("-frames:v".into());
		args.push(max_samples.to_string());
	}
	args.push("-y".into());
	args.push(pattern.display().to_string());

	let output = Command::new("ffmpeg")
		.args(&args)
		.output()
		.await
		.map_err(|_| PerceptionError::FfmpegNotFound)?;

	let mut frames = collect_samples(work_dir, &prefix.to_string(), sample_fps).await?;

	if !output.status.success() {
		if frames.is_empty() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			return Err(PerceptionError::FfmpegFailed {
				message: stderr.to_string(),
				exit_code: output.status.code(),
			});
		}
		// Decode failed mid-stream; keep what was gathered.
		warn!(
			frames = frames.len(),
			exit_code = ?output.status.code(),
			"sampling ended early; continuing with partial frames"
		);
	}

	frames.sort_by(|a, b| {
		a.timestamp_s
			.partial_cmp(&b.timestamp_s)
			.unwrap_or(std::cmp::Ordering::Equal)
	});
	debug!(count = frames.len(), "sampled frames");
	Ok(frames)
}

/// Collect `<prefix>-NNNNN.jpg` files and reconstruct their timestamps.
/// FFmpeg numbers output frames from 1; sample k sits at `(k-1)/fps`.
async fn collect_samples(
	work_dir: &Path,
	prefix: &str,
	sample_fps: f64,
) -> Result<Vec<SampledFrame>> {
	let mut frames = Vec::new();
	let mut entries = tokio::fs::read_dir(work_dir).await?;
	let file_prefix = format!("{prefix}-");

	while let Some(entry) = entries.next_entry().await? {
		let name = entry.file_name();
		let name = name.to_string_lossy();
		let Some(number) = name
			.strip_prefix(&file_prefix)
			.and_then(|rest| rest.strip_suffix(".jpg"))
			.and_then(|n| n.parse::<u64>().ok())
		else {
			continue;
		};
		frames.push(SampledFrame {
			path: entry.path(),
			timestamp_s: (number.saturating_sub(1)) as f64 / sample_fps,
		});
	}
	Ok(frames)
}

/// Remove sampling artifacts; failures are logged and ignored.
pub async fn cleanup_samples(frames: &[SampledFrame]) {
	for frame in frames {
		if let Err(err) = tokio::fs::remove_file(&frame.path).await {
			warn!(path = %frame.path.display(), %err, "failed to remove sample frame");
		}
	}
}
