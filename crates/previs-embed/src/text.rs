//! In-process ONNX text embedding (BGE-class sentence encoders).
//!
//! Runs the encoder directly via ONNX Runtime — no external services.
//! Produces mean-pooled, L2-normalized embeddings; the model table pins
//! each checkpoint to its output dimension so the configured `text_dim`
//! can be validated before any inference runs.

use ndarray::{Array2, ArrayD};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokenizers::Tokenizer;
use tracing::info;

use crate::error::{EmbedError, Result};
use crate::provider::{l2_normalize, TextEmbedder};

/// Known text encoder checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextModel {
	/// BGE-small-en-v1.5, 384 dimensions, fast default
	BgeSmallEnV15,
	/// BGE-base-en-v1.5, 768 dimensions, better quality
	BgeBaseEnV15,
}

impl TextModel {
	/// Stable model identifier.
	#[must_use]
	pub const fn model_id(self) -> &'static str {
		match self {
			Self::BgeSmallEnV15 => "bge-small-en-v1.5",
			Self::BgeBaseEnV15 => "bge-base-en-v1.5",
		}
	}

	/// Output dimension of the checkpoint.
	#[must_use]
	pub const fn dim(self) -> usize {
		match self {
			Self::BgeSmallEnV15 => 384,
			Self::BgeBaseEnV15 => 768,
		}
	}
}

/// Default model directory: `~/.previs/models`
fn default_model_dir() -> PathBuf {
	dirs::home_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join(".previs")
		.join("models")
}

/// Configuration for loading a text encoder.
#[derive(Debug, Clone)]
pub struct TextEmbedderConfig {
	/// Which checkpoint to load
	pub model: TextModel,
	/// Path to the ONNX model file; defaults under the model directory
	pub model_path: Option<PathBuf>,
	/// Path to the tokenizer.json file; defaults under the model directory
	pub tokenizer_path: Option<PathBuf>,
}

impl Default for TextEmbedderConfig {
	fn default() -> Self {
		Self {
			model: TextModel::BgeSmallEnV15,
			model_path: None,
			tokenizer_path: None,
		}
	}
}

impl TextEmbedderConfig {
	fn resolved_model_path(&self) -> PathBuf {
		self.model_path.clone().unwrap_or_else(|| {
			default_model_dir().join(format!("{}.onnx", self.model.model_id()))
		})
	}

	fn resolved_tokenizer_path(&self) -> PathBuf {
		self.tokenizer_path.clone().unwrap_or_else(|| {
			default_model_dir().join(format!("{}-tokenizer.json", self.model.model_id()))
		})
	}
}

/// In-process text embedder using ONNX Runtime.
///
/// Thread-safe: wraps `ort::Session` in a `Mutex` since `Session::run`
/// requires `&mut self`. The lock is held only during inference; pooling
/// and normalization run outside it.
pub struct OrtTextEmbedder {
	model: TextModel,
	session: Mutex<Session>,
	tokenizer: Tokenizer,
}

impl OrtTextEmbedder {
	/// Load the ONNX model and tokenizer from disk.
	///
	/// # Errors
	///
	/// Returns [`EmbedError::ModelNotFound`] for missing files and
	/// [`EmbedError::Inference`]/[`EmbedError::Tokenizer`] for load
	/// failures.
	pub fn load(config: &TextEmbedderConfig) -> Result<Self> {
		let model_path = config.resolved_model_path();
		let tokenizer_path = config.resolved_tokenizer_path();

		if !model_path.exists() {
			return Err(EmbedError::ModelNotFound(model_path));
		}
		if !tokenizer_path.exists() {
			return Err(EmbedError::ModelNotFound(tokenizer_path));
		}

		let session = Session::builder()
			.and_then(|mut b| b.commit_from_file(&model_path))
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		let tokenizer = Tokenizer::from_file(&tokenizer_path)
			.map_err(|e| EmbedError::Tokenizer(e.to_string()))?;

		info!(model = config.model.model_id(), "text encoder loaded");
		Ok(Self {
			model: config.model,
			session: Mutex::new(session),
			tokenizer,
		})
	}

	/// Check whether model files exist at the configured (or default)
	/// paths without loading them.
	#[must_use]
	pub fn is_available(config: &TextEmbedderConfig) -> bool {
		config.resolved_model_path().exists() && config.resolved_tokenizer_path().exists()
	}

	/// Run inference and return the owned output plus the hidden size.
	/// Locks the session only for the duration of the run.
	fn run_inference(
		&self,
		input_ids: Tensor<i64>,
		attention_mask: Tensor<i64>,
		token_type_ids: Tensor<i64>,
	) -> Result<(ArrayD<f32>, usize)> {
		let mut session = self.session.lock();
		let outputs = session
			.run(ort::inputs![
				"input_ids" => input_ids,
				"attention_mask" => attention_mask,
				"token_type_ids" => token_type_ids,
			])
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		let view = outputs[0]
			.try_extract_array::<f32>()
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		let dim = view.shape().last().copied().unwrap_or(0);
		Ok((view.into_owned(), dim))
	}
}

impl TextEmbedder for OrtTextEmbedder {
	fn model_id(&self) -> &str {
		self.model.model_id()
	}

	fn dim(&self) -> usize {
		self.model.dim()
	}

	/// Embed a batch. Pads to the longest sequence for a single ONNX run,
	/// then mean-pools over real tokens and L2-normalizes.
	fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
		if texts.is_empty() {
			return Ok(vec![]);
		}

		let encodings = self
			.tokenizer
			.encode_batch(texts.to_vec(), true)
			.map_err(|e| EmbedError::Tokenizer(e.to_string()))?;

		let max_len = encodings
			.iter()
			.map(|e| e.get_ids().len())
			.max()
			.unwrap_or(0);
		let batch_size = encodings.len();

		let mut input_ids = vec![0i64; batch_size * max_len];
		let mut attention_mask = vec![0i64; batch_size * max_len];
		let token_type_ids = vec![0i64; batch_size * max_len];

		for (i, enc) in encodings.iter().enumerate() {
			let offset = i * max_len;
			for (j, &id) in enc.get_ids().iter().enumerate() {
				input_ids[offset + j] = i64::from(id);
			}
			for (j, &m) in enc.get_attention_mask().iter().enumerate() {
				attention_mask[offset + j] = i64::from(m);
			}
		}

		let to_tensor = |data: Vec<i64>| -> Result<Tensor<i64>> {
			let array = Array2::from_shape_vec([batch_size, max_len], data)
				.map_err(|e| EmbedError::Inference(e.to_string()))?;
			Tensor::from_array(array).map_err(|e| EmbedError::Inference(e.to_string()))
		};

		let (output, hidden_dim) = self.run_inference(
			to_tensor(input_ids)?,
			to_tensor(attention_mask)?,
			to_tensor(token_type_ids)?,
		)?;

		// Mean pooling + L2 normalization (no lock held).
		let mut results = Vec::with_capacity(batch_size);
		for i in 0..batch_size {
			let seq_len = encodings[i]
				.get_attention_mask()
				.iter()
				.filter(|&&m| m == 1)
				.count();

			let mut pooled = vec![0.0f32; hidden_dim];
			for t in 0..seq_len {
				for d in 0..hidden_dim {
					pooled[d] += output[[i, t, d]];
				}
			}
			if seq_len > 0 {
				let divisor = seq_len as f32;
				for v in &mut pooled {
					*v /= divisor;
				}
			}
			l2_normalize(&mut pooled);
			results.push(pooled);
		}

		Ok(results)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
	use super::*;

	#[test]
	fn test_model_table() {
		assert_eq!(TextModel::BgeSmallEnV15.dim(), 384);
		assert_eq!(TextModel::BgeBaseEnV15.dim(), 768);
		assert_eq!(TextModel::BgeSmallEnV15.model_id(), "bge-small-en-v1.5");
	}

	#[test]
	fn test_default_paths_under_model_dir() {
		let config = TextEmbedderConfig::default();
		let path = config.resolved_model_path();
		assert!(path.to_string_lossy().contains("bge-small-en-v1.5"));
	}

	#[test]
	fn test_is_available_false_without_files() {
		let config = TextEmbedderConfig {
			model_path: Some(PathBuf::from("/nonexistent/model.onnx")),
			tokenizer_path: Some(PathBuf::from("/nonexistent/tokenizer.json")),
			..TextEmbedderConfig::default()
		};
		assert!(!OrtTextEmbedder::is_available(&config));
	}

	// Integration tests require model files on disk — run with:
	// cargo test -p previs-embed -- --ignored
	#[test]
	#[ignore = "requires model files on disk"]
	fn test_embed_batch_normalized() {
		let embedder =
			OrtTextEmbedder::load(&TextEmbedderConfig::default()).expect("failed to load model");
		let results = embedder
			.embed_batch(&["sunset over the ocean", "a city street at night"])
			.expect("failed to embed");
		assert_eq!(results.len(), 2);
		for v in &results {
			assert_eq!(v.len(), 384);
			let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
			assert!((norm - 1.0).abs() < 0.01);
		}
	}
}
