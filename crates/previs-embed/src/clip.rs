//! CLIP-class cross-modal embedding (MobileCLIP-S2 ONNX pair).
//!
//! Two ONNX sessions — a vision tower and a text tower — trained into one
//! embedding space, so "night city chase" can be scored directly against
//! keyframe embeddings. Both towers L2-normalize their outputs; similarity
//! is a dot product downstream.
//!
//! Models are the Xenova MobileCLIP-S2 export:
//! `mobileclip-s2_vision.onnx`, `mobileclip-s2_text.onnx`, plus the
//! matching `mobileclip-s2-tokenizer.json`.

use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokenizers::Tokenizer;
use tracing::info;

use crate::error::{EmbedError, Result};
use crate::provider::{l2_normalize, ImageInput, VisualEmbedder};

/// CLIP input resolution.
const IMAGE_SIZE: u32 = 256;

/// CLIP text context length.
const CONTEXT_LENGTH: usize = 77;

/// Configuration for loading the CLIP pair.
#[derive(Debug, Clone)]
pub struct ClipConfig {
	/// Directory holding the model files
	pub models_dir: PathBuf,
	/// Model family name used in file names and as the model id
	pub model_name: String,
	/// Output dimension of both towers
	pub dim: usize,
}

impl Default for ClipConfig {
	fn default() -> Self {
		Self {
			models_dir: dirs::home_dir()
				.unwrap_or_else(|| PathBuf::from("."))
				.join(".previs")
				.join("models"),
			model_name: "mobileclip-s2".to_string(),
			dim: 512,
		}
	}
}

impl ClipConfig {
	fn vision_path(&self) -> PathBuf {
		self.models_dir.join(format!("{}_vision.onnx", self.model_name))
	}

	fn text_path(&self) -> PathBuf {
		self.models_dir.join(format!("{}_text.onnx", self.model_name))
	}

	fn tokenizer_path(&self) -> PathBuf {
		self.models_dir
			.join(format!("{}-tokenizer.json", self.model_name))
	}
}

/// Cross-modal embedder over a vision/text ONNX session pair.
pub struct ClipEmbedder {
	config: ClipConfig,
	vision: Mutex<Session>,
	text: Mutex<Session>,
	tokenizer: Tokenizer,
}

impl ClipEmbedder {
	/// Load both towers and the tokenizer from disk.
	///
	/// # Errors
	///
	/// Returns [`EmbedError::ModelNotFound`] for missing files and
	/// [`EmbedError::Inference`]/[`EmbedError::Tokenizer`] on load
	/// failures.
	pub fn load(config: ClipConfig) -> Result<Self> {
		for path in [config.vision_path(), config.text_path(), config.tokenizer_path()] {
			if !path.exists() {
				return Err(EmbedError::ModelNotFound(path));
			}
		}

		let vision = Session::builder()
			.and_then(|mut b| b.commit_from_file(config.vision_path()))
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		let text = Session::builder()
			.and_then(|mut b| b.commit_from_file(config.text_path()))
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		let tokenizer = Tokenizer::from_file(config.tokenizer_path())
			.map_err(|e| EmbedError::Tokenizer(e.to_string()))?;

		info!(model = %config.model_name, dim = config.dim, "CLIP pair loaded");
		Ok(Self {
			config,
			vision: Mutex::new(vision),
			text: Mutex::new(text),
			tokenizer,
		})
	}

	/// Check whether all three model files exist without loading them.
	#[must_use]
	pub fn is_available(config: &ClipConfig) -> bool {
		config.vision_path().exists()
			&& config.text_path().exists()
			&& config.tokenizer_path().exists()
	}

	/// Decode and preprocess one image into CHW float pixels.
	fn preprocess(&self, input: &ImageInput) -> Result<Vec<f32>> {
		let bytes = input.bytes()?;
		let image = image::load_from_memory(&bytes)
			.map_err(|e| EmbedError::ImageInput(e.to_string()))?
			.resize_exact(IMAGE_SIZE, IMAGE_SIZE, image::imageops::FilterType::Triangle)
			.to_rgb8();

		// MobileCLIP preprocessing: scale to [0, 1], no mean/std shift.
		let hw = (IMAGE_SIZE * IMAGE_SIZE) as usize;
		let mut pixels = vec![0.0f32; 3 * hw];
		for (i, pixel) in image.pixels().enumerate() {
			for c in 0..3 {
				pixels[c * hw + i] = f32::from(pixel.0[c]) / 255.0;
			}
		}
		Ok(pixels)
	}

	/// Extract `[batch, dim]` rows from a session output, normalized.
	fn extract_rows(output: &ort::value::Value, batch: usize, dim: usize) -> Result<Vec<Vec<f32>>> {
		let view = output
			.try_extract_array::<f32>()
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		let flat: Vec<f32> = view.iter().copied().collect();
		if flat.len() != batch * dim {
			return Err(EmbedError::Inference(format!(
				"unexpected output shape: {} values for batch {batch} dim {dim}",
				flat.len()
			)));
		}
		Ok(flat
			.chunks_exact(dim)
			.map(|row| {
				let mut v = row.to_vec();
				l2_normalize(&mut v);
				v
			})
			.collect())
	}
}

impl VisualEmbedder for ClipEmbedder {
	fn model_id(&self) -> &str {
		&self.config.model_name
	}

	fn dim(&self) -> usize {
		self.config.dim
	}

	fn embed_images(&self, images: &[ImageInput]) -> Result<Vec<Vec<f32>>> {
		if images.is_empty() {
			return Ok(vec![]);
		}

		let hw = (IMAGE_SIZE * IMAGE_SIZE) as usize;
		let mut pixel_values = Vec::with_capacity(images.len() * 3 * hw);
		for input in images {
			pixel_values.extend(self.preprocess(input)?);
		}
		let array = Array4::from_shape_vec(
			[images.len(), 3, IMAGE_SIZE as usize, IMAGE_SIZE as usize],
			pixel_values,
		)
		.map_err(|e| EmbedError::Inference(e.to_string()))?;
		let tensor =
			Tensor::from_array(array).map_err(|e| EmbedError::Inference(e.to_string()))?;

		let mut session = self.vision.lock();
		let outputs = session
			.run(ort::inputs!["pixel_values" => tensor])
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		Self::extract_rows(&outputs[0], images.len(), self.config.dim)
	}

	fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
		if texts.is_empty() {
			return Ok(vec![]);
		}

		let encodings = self
			.tokenizer
			.encode_batch(texts.to_vec(), true)
			.map_err(|e| EmbedError::Tokenizer(e.to_string()))?;

		// Fixed CLIP context: truncate or zero-pad every row to 77.
		let batch = encodings.len();
		let mut input_ids = vec![0i64; batch * CONTEXT_LENGTH];
		let mut attention_mask = vec![0i64; batch * CONTEXT_LENGTH];
		for (i, enc) in encodings.iter().enumerate() {
			let offset = i * CONTEXT_LENGTH;
			for (j, &id) in enc.get_ids().iter().take(CONTEXT_LENGTH).enumerate() {
				input_ids[offset + j] = i64::from(id);
			}
			for (j, &m) in enc
				.get_attention_mask()
				.iter()
				.take(CONTEXT_LENGTH)
				.enumerate()
			{
				attention_mask[offset + j] = i64::from(m);
			}
		}

		let to_tensor = |data: Vec<i64>| -> Result<Tensor<i64>> {
			let array = Array2::from_shape_vec([batch, CONTEXT_LENGTH], data)
				.map_err(|e| EmbedError::Inference(e.to_string()))?;
			Tensor::from_array(array).map_err(|e| EmbedError::Inference(e.to_string()))
		};

		let mut session = self.text.lock();
		let outputs = session
			.run(ort::inputs![
				"input_ids" => to_tensor(input_ids)?,
				"attention_mask" => to_tensor(attention_mask)?,
			])
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		Self::extract_rows(&outputs[0], batch, self.config.dim)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
	use super::*;

	#[test]
	fn test_default_config() {
		let config = ClipConfig::default();
		assert_eq!(config.dim, 512);
		assert!(config
			.vision_path()
			.to_string_lossy()
			.ends_with("mobileclip-s2_vision.onnx"));
	}

	#[test]
	fn test_is_available_false_without_files() {
		let config = ClipConfig {
			models_dir: PathBuf::from("/nonexistent"),
			..ClipConfig::default()
		};
		assert!(!ClipEmbedder::is_available(&config));
	}

	// Integration tests require the MobileCLIP ONNX pair on disk:
	// cargo test -p previs-embed -- --ignored
	#[test]
	#[ignore = "requires model files on disk"]
	fn test_cross_modal_space() {
		let clip = ClipEmbedder::load(ClipConfig::default()).expect("failed to load CLIP");
		let texts = clip
			.embed_texts(&["a photo of the ocean at sunset"])
			.expect("text tower failed");
		assert_eq!(texts[0].len(), 512);
		let norm: f32 = texts[0].iter().map(|v| v * v).sum::<f32>().sqrt();
		assert!((norm - 1.0).abs() < 0.01);
	}
}
