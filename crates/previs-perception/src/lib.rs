//! # Previs Perception
//!
//! Media perception for the previsualization pipeline: everything that
//! touches pixels or containers lives here, behind FFmpeg/FFprobe run as
//! external processes. External processes are preferred over linked
//! libraries for:
//! - Simplicity and reliability
//! - No complex build dependencies
//! - Consistent behavior across platforms
//! - Support for all formats the system FFmpeg supports
//!
//! ## Modules
//!
//! - [`probe`] — duration/dimensions/codec/audio via FFprobe JSON
//! - [`frames`] — frame sampling and exact-timestamp grabs
//! - [`scene`] — perceptual-hash scene scoring and the three keyframe
//!   strategies (scene-change, interval, hybrid)
//! - [`extractor`] — the per-asset extraction pipeline: sample, score,
//!   select, write thumbnails; degrades to `partial` on decode failures
//! - [`thumbs`] — bounded-edge thumbnails at deterministic paths
//! - [`proxy`] — 720p H.264 proxy transcodes
//! - [`transcribe`] — Whisper captions (feature `transcription`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod extractor;
pub mod frames;
pub mod probe;
pub mod proxy;
pub mod scene;
pub mod thumbs;

#[cfg(feature = "transcription")]
pub mod transcribe;

pub use error::{PerceptionError, Result};
pub use extractor::{
	extract_image_keyframe, extract_keyframes, ExtractionOutput, ExtractorConfig, KeyframeOutput,
};
pub use probe::{check_ffmpeg, check_ffprobe, probe_image, probe_video, VideoInfo};
pub use scene::{KeyframeParams, Strategy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
