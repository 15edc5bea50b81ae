//! Error types for the retrieval core.
//!
//! Errors are explicit result variants, never panics. Each carries a
//! machine-readable kind (the variant), a short English message (`Display`),
//! and an optional remediation hint for the host to surface.

use std::path::PathBuf;

/// Errors produced by the retrieval core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
	/// Caller supplied an invalid input (bad path, bad option combination).
	#[error("invalid input: {0}")]
	InvalidInput(String),

	/// Caller supplied an invalid query (empty text in vector mode, bad weights).
	#[error("invalid query: {0}")]
	InvalidQuery(String),

	/// Asset, keyframe, or segment id does not exist.
	#[error("not found: {0}")]
	NotFound(String),

	/// A vector's length disagrees with the configured dimension.
	#[error("dimension mismatch for {modality}: expected {expected}, got {got}")]
	DimensionMismatch {
		/// Which modality column rejected the vector
		modality: Modality,
		/// Configured dimension
		expected: usize,
		/// Actual vector length
		got: usize,
	},

	/// All embedding backends failed.
	#[error("no embedding backend available: {0}")]
	EmbeddingUnavailable(String),

	/// Media probe failed to read the file.
	#[error("media probe failed for {path}: {reason}")]
	ProbeFailed {
		/// File that failed to probe
		path: PathBuf,
		/// Probe failure detail
		reason: String,
	},

	/// Keyframe extraction produced nothing usable.
	#[error("keyframe extraction failed for {path}: {reason}")]
	ExtractionFailed {
		/// File that failed extraction
		path: PathBuf,
		/// Extraction failure detail
		reason: String,
	},

	/// Every requested search modality is unusable.
	#[error("search unavailable: {0}")]
	SearchUnavailable(String),

	/// The persistence backend refused a write for capacity reasons.
	#[error("store full: {0}")]
	StoreFull(String),

	/// Persisted store state could not be read or written.
	#[error("store I/O error: {0}")]
	StoreIo(#[from] std::io::Error),

	/// A persisted record could not be decoded.
	#[error("corrupt store record: {0}")]
	CorruptRecord(String),

	/// Persisted store configuration disagrees with the running configuration.
	#[error("store config mismatch: {0}")]
	ConfigMismatch(String),

	/// Cooperative cancellation was signaled.
	#[error("operation was cancelled")]
	Cancelled,
}

/// Which embedding space a vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
	/// Text embedding space
	Text,
	/// Visual (CLIP-class) embedding space
	Visual,
}

impl std::fmt::Display for Modality {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Text => f.write_str("text"),
			Self::Visual => f.write_str("visual"),
		}
	}
}

impl CoreError {
	/// Stable machine-readable kind string for hosts that serialize errors.
	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::InvalidInput(_) => "invalid_input",
			Self::InvalidQuery(_) => "invalid_query",
			Self::NotFound(_) => "not_found",
			Self::DimensionMismatch { .. } => "dimension_mismatch",
			Self::EmbeddingUnavailable(_) => "embedding_unavailable",
			Self::ProbeFailed { .. } => "probe_failed",
			Self::ExtractionFailed { .. } => "extraction_failed",
			Self::SearchUnavailable(_) => "search_unavailable",
			Self::StoreFull(_) => "store_full",
			Self::StoreIo(_) => "store_io",
			Self::CorruptRecord(_) => "corrupt_record",
			Self::ConfigMismatch(_) => "config_mismatch",
			Self::Cancelled => "cancelled",
		}
	}

	/// Optional remediation hint for the operator.
	#[must_use]
	pub fn hint(&self) -> Option<&'static str> {
		match self {
			Self::EmbeddingUnavailable(_) => {
				Some("check that model files exist or a remote provider is reachable; retry with backoff")
			}
			Self::StoreFull(_) => {
				Some("disk-backed store out of capacity; configure a larger `store_dir`")
			}
			Self::ProbeFailed { .. } | Self::ExtractionFailed { .. } => {
				Some("the asset is marked failed; re-ingest with force=true after fixing the media")
			}
			Self::ConfigMismatch(_) => {
				Some("open the store with allow_rebuild=true to re-index under the new configuration")
			}
			_ => None,
		}
	}

	/// Check if the error is worth retrying (transient backend conditions).
	#[must_use]
	pub const fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::EmbeddingUnavailable(_) | Self::SearchUnavailable(_)
		)
	}

	/// Check if this error terminates the owning asset (ingest-side).
	#[must_use]
	pub const fn is_terminal_for_asset(&self) -> bool {
		matches!(
			self,
			Self::ProbeFailed { .. } | Self::ExtractionFailed { .. } | Self::InvalidInput(_)
		)
	}
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
