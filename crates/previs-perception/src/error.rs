//! Error types for perception operations.

use std::path::PathBuf;

/// Errors that can occur during media perception.
#[derive(Debug, thiserror::Error)]
pub enum PerceptionError {
	/// FFmpeg is not installed or not found in PATH.
	#[error("FFmpeg not found. Please install FFmpeg: https://ffmpeg.org/download.html")]
	FfmpegNotFound,

	/// FFprobe is not installed or not found in PATH.
	#[error("FFprobe not found. Please install FFmpeg: https://ffmpeg.org/download.html")]
	FfprobeNotFound,

	/// Media file not found.
	#[error("media file not found: {0}")]
	MediaNotFound(PathBuf),

	/// Invalid media file (corrupt or unsupported format).
	#[error("invalid or unsupported media: {0}")]
	InvalidMedia(PathBuf),

	/// Media has no video stream.
	#[error("no video stream in {0}")]
	NoVideoStream(PathBuf),

	/// FFmpeg command failed.
	#[error("FFmpeg failed: {message}")]
	FfmpegFailed {
		/// Error output from FFmpeg
		message: String,
		/// Exit code if available
		exit_code: Option<i32>,
	},

	/// Failed to extract a frame at a timestamp.
	#[error("failed to extract frame at {timestamp}s: {reason}")]
	FrameExtractionFailed {
		/// Timestamp in seconds
		timestamp: f64,
		/// Reason for failure
		reason: String,
	},

	/// No frames could be extracted at all.
	#[error("no frames could be extracted from {0}")]
	NoFramesExtracted(PathBuf),

	/// Failed to read or decode an image file.
	#[error("failed to read image: {0}")]
	ImageRead(#[from] image::ImageError),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// FFprobe output could not be parsed.
	#[error("failed to parse FFprobe output: {0}")]
	ProbeParse(String),

	/// Whisper model not found on disk.
	#[cfg(feature = "transcription")]
	#[error("Whisper model not found at {0}; download it before enabling transcription")]
	WhisperModelNotFound(PathBuf),

	/// Whisper transcription failed.
	#[cfg(feature = "transcription")]
	#[error("transcription failed: {0}")]
	TranscriptionFailed(String),

	/// Operation was cancelled.
	#[error("operation was cancelled")]
	Cancelled,

	/// Operation timed out.
	#[error("operation timed out after {seconds}s")]
	Timeout {
		/// Timeout duration in seconds
		seconds: u64,
	},
}

impl PerceptionError {
	/// Check if this error is due to a missing system dependency.
	#[must_use]
	pub fn is_missing_dependency(&self) -> bool {
		matches!(self, Self::FfmpegNotFound | Self::FfprobeNotFound) || {
			#[cfg(feature = "transcription")]
			{
				matches!(self, Self::WhisperModelNotFound(_))
			}
			#[cfg(not(feature = "transcription"))]
			{
				false
			}
		}
	}

	/// Check if the error is recoverable (try again later).
	#[must_use]
	pub const fn is_recoverable(&self) -> bool {
		matches!(self, Self::Timeout { .. } | Self::Cancelled)
	}
}

/// Result type alias for perception operations.
pub type Result<T> = std::result::Result<T, PerceptionError>;
