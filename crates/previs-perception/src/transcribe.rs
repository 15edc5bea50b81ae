//! Audio transcription via Whisper.
//!
//! Produces a caption for ingested footage: the transcript feeds the
//! asset summary and tag enrichment. Transcription is best-effort — a
//! missing model or silent clip never fails an ingest.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::{PerceptionError, Result};

/// Whisper expects 16 kHz mono input.
const WHISPER_SAMPLE_RATE: u32 = 16_000;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
	/// Path to the Whisper GGML model file
	pub model_path: PathBuf,
	/// Language code ("en", "zh", "auto" for detection)
	pub language: String,
	/// Threads to use (0 = auto)
	pub threads: u32,
}

impl Default for TranscriptionConfig {
	fn default() -> Self {
		Self {
			model_path: default_model_path(),
			language: "auto".to_string(),
			threads: 0,
		}
	}
}

/// Default Whisper model location: `~/.previs/models/ggml-base.bin`.
fn default_model_path() -> PathBuf {
	dirs::home_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join(".previs")
		.join("models")
		.join("ggml-base.bin")
}

/// Check if the configured Whisper model exists on disk.
#[must_use]
pub fn is_model_available(config: &TranscriptionConfig) -> bool {
	config.model_path.exists()
}

// ============================================================================
// Output
// ============================================================================

/// One segment of transcribed speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
	/// Start time in milliseconds
	pub start_ms: i64,
	/// End time in milliseconds
	pub end_ms: i64,
	/// Transcribed text
	pub text: String,
}

/// Full transcription of one clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
	/// Joined transcript text
	pub text: String,
	/// Individual segments, chronological
	pub segments: Vec<TranscriptSegment>,
}

// ============================================================================
// Transcription
// ============================================================================

/// Transcribe a video's audio track.
///
/// # Errors
///
/// Returns [`PerceptionError::WhisperModelNotFound`] when the model file
/// is missing and [`PerceptionError::TranscriptionFailed`] on inference
/// failure. A video without an audio stream produces an empty result.
#[instrument(skip_all, fields(video = %video_path.as_ref().display()))]
pub async fn transcribe_video(
	video_path: impl AsRef<Path>,
	config: &TranscriptionConfig,
) -> Result<TranscriptionResult> {
	let video_path = video_path.as_ref();
	if !video_path.exists() {
		return Err(PerceptionError::MediaNotFound(video_path.to_path_buf()));
	}
	if !config.model_path.exists() {
		return Err(PerceptionError::WhisperModelNotFound(
			config.model_path.clone(),
		));
	}

	let samples = extract_audio_samples(video_path).await?;
	if samples.is_empty() {
		debug!("no audio to transcribe");
		return Ok(TranscriptionResult {
			text: String::new(),
			segments: Vec::new(),
		});
	}

	// Whisper inference is compute-bound; keep it off the async runtime.
	let config = config.clone();
	tokio::task::spawn_blocking(move || run_whisper(&config, &samples))
		.await
		.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?
}

/// Decode the audio track to 16 kHz mono f32 samples via FFmpeg.
async fn extract_audio_samples(video_path: &Path) -> Result<Vec<f32>> {
	let output = Command::new("ffmpeg")
		.arg("-i")
		.arg(video_path)
		.args([
			"-vn",
			"-ac",
			"1",
			"-ar",
			&WHISPER_SAMPLE_RATE.to_string(),
			"-f",
			"s16le",
			"-",
		])
		.output()
		.await
		.map_err(|_| PerceptionError::FfmpegNotFound)?;

	if !output.status.success() {
		// Most failures here are clips without an audio stream; treat
		// silence as silence.
		debug!(exit = ?output.status.code(), "audio extraction produced nothing");
		return Ok(Vec::new());
	}

	let pcm: Vec<i16> = output
		.stdout
		.chunks_exact(2)
		.map(|b| i16::from_le_bytes([b[0], b[1]]))
		.collect();
	let mut samples = vec![0.0f32; pcm.len()];
	whisper_rs::convert_integer_to_float_audio(&pcm, &mut samples)
		.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?;
	Ok(samples)
}

fn run_whisper(config: &TranscriptionConfig, samples: &[f32]) -> Result<TranscriptionResult> {
	let model_path = config.model_path.to_string_lossy();
	let ctx = WhisperContext::new_with_params(&model_path, WhisperContextParameters::default())
		.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?;
	let mut state = ctx
		.create_state()
		.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?;

	let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
	if config.language != "auto" {
		params.set_language(Some(&config.language));
	}
	if config.threads > 0 {
		params.set_n_threads(config.threads as i32);
	}
	params.set_print_progress(false);
	params.set_print_special(false);
	params.set_print_realtime(false);

	state
		.full(params, samples)
		.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?;

	let n_segments = state
		.full_n_segments()
		.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?;
	let mut segments = Vec::with_capacity(n_segments as usize);
	let mut text = String::new();
	for i in 0..n_segments {
		let segment_text = state
			.full_get_segment_text(i)
			.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?;
		let start_cs = state
			.full_get_segment_t0(i)
			.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?;
		let end_cs = state
			.full_get_segment_t1(i)
			.map_err(|e| PerceptionError::TranscriptionFailed(e.to_string()))?;

		let trimmed = segment_text.trim();
		if trimmed.is_empty() {
			continue;
		}
		if !text.is_empty() {
			text.push(' ');
		}
		text.push_str(trimmed);
		segments.push(TranscriptSegment {
			start_ms: start_cs * 10,
			end_ms: end_cs * 10,
			text: trimmed.to_string(),
		});
	}

	debug!(segments = segments.len(), "transcription complete");
	Ok(TranscriptionResult { text, segments })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_default_config_paths() {
		let config = TranscriptionConfig::default();
		assert!(config.model_path.to_string_lossy().contains("ggml"));
		assert_eq!(config.language, "auto");
	}

	#[test]
	fn test_model_availability() {
		let config = TranscriptionConfig {
			model_path: PathBuf::from("/nonexistent/model.bin"),
			..TranscriptionConfig::default()
		};
		assert!(!is_model_available(&config));
	}

	#[tokio::test]
	async fn test_missing_model_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let fake_video = dir.path().join("clip.mp4");
		std::fs::write(&fake_video, b"not a video").unwrap();
		let config = TranscriptionConfig {
			model_path: PathBuf::from("/nonexistent/model.bin"),
			..TranscriptionConfig::default()
		};
		let err = transcribe_video(&fake_video, &config).await.unwrap_err();
		assert!(matches!(err, PerceptionError::WhisperModelNotFound(_)));
	}
}
