//! Error types for embedding operations.

use std::path::PathBuf;

/// Errors from embedding providers and the routing service.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
	/// Every configured backend for the requested modality failed.
	#[error("no embedding backend available: {0}")]
	Unavailable(String),

	/// A provider returned vectors of an unexpected dimension. The result
	/// is rejected outright, never truncated or padded.
	#[error("provider `{model}` returned dim {got}, expected {expected}")]
	DimMismatch {
		/// Provider model id
		model: String,
		/// Configured dimension
		expected: usize,
		/// Dimension the provider produced
		got: usize,
	},

	/// Model or tokenizer files are missing on disk.
	#[error("model files not found: {0}")]
	ModelNotFound(PathBuf),

	/// Inference failed inside a provider.
	#[error("inference failed: {0}")]
	Inference(String),

	/// Tokenization failed.
	#[error("tokenizer error: {0}")]
	Tokenizer(String),

	/// An image input could not be read or decoded.
	#[error("image input unreadable: {0}")]
	ImageInput(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl EmbedError {
	/// Whether the failure is transient and worth retrying with backoff.
	#[must_use]
	pub const fn is_retryable(&self) -> bool {
		matches!(self, Self::Unavailable(_) | Self::Inference(_))
	}

	/// Whether the failure should mark the provider degraded and trigger
	/// fallback to the next one in the chain. Dimension mismatches are
	/// configuration errors and must surface instead.
	#[must_use]
	pub const fn triggers_fallback(&self) -> bool {
		matches!(
			self,
			Self::Inference(_) | Self::Tokenizer(_) | Self::ModelNotFound(_) | Self::Io(_)
		)
	}
}

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_dim_mismatch_not_fallback() {
		let err = EmbedError::DimMismatch {
			model: "bge-small-en-v1.5".into(),
			expected: 384,
			got: 768,
		};
		assert!(!err.triggers_fallback());
		assert!(err.to_string().contains("384"));
	}

	#[test]
	fn test_inference_triggers_fallback() {
		assert!(EmbedError::Inference("onnx session died".into()).triggers_fallback());
		assert!(EmbedError::Unavailable("all down".into()).is_retryable());
	}
}
