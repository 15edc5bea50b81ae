//! Provider traits.
//!
//! The text and visual embedding spaces are independent: a text provider
//! never scores images, and cross-modal queries go through the visual
//! provider's text tower, which encodes into the *visual* space. Keeping
//! the towers on one trait object guarantees they share a checkpoint.

use std::path::PathBuf;

use crate::error::Result;

/// An image handed to a visual provider: a file on disk or raw encoded
/// bytes.
#[derive(Debug, Clone)]
pub enum ImageInput {
	/// Path of an encoded image file (thumbnail, still)
	Path(PathBuf),
	/// Raw encoded image bytes
	Bytes(Vec<u8>),
}

impl ImageInput {
	/// The encoded bytes of this input, reading the file if needed.
	///
	/// # Errors
	///
	/// Returns [`crate::EmbedError::Io`] when the path cannot be read.
	pub fn bytes(&self) -> Result<std::borrow::Cow<'_, [u8]>> {
		match self {
			Self::Path(path) => Ok(std::borrow::Cow::Owned(std::fs::read(path)?)),
			Self::Bytes(bytes) => Ok(std::borrow::Cow::Borrowed(bytes)),
		}
	}
}

/// A text embedding backend.
pub trait TextEmbedder: Send + Sync {
	/// Stable model identifier (also the cache key component).
	fn model_id(&self) -> &str;

	/// Output dimension.
	fn dim(&self) -> usize;

	/// Embed a batch of texts, one L2-normalized vector per input, same
	/// order.
	///
	/// # Errors
	///
	/// Returns a provider-level [`crate::EmbedError`] on failure; the
	/// service decides whether to fall back.
	fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

	/// Cheap health probe used at startup provider selection.
	///
	/// # Errors
	///
	/// Returns whatever `embed_batch` returns for a trivial input.
	fn probe(&self) -> Result<()> {
		let _ = self.embed_batch(&["probe"])?;
		Ok(())
	}
}

/// A visual (CLIP-class) embedding backend: an image tower and a text
/// tower sharing one embedding space.
pub trait VisualEmbedder: Send + Sync {
	/// Stable model identifier (also the cache key component).
	fn model_id(&self) -> &str;

	/// Output dimension of both towers.
	fn dim(&self) -> usize;

	/// Embed a batch of images, one L2-normalized vector per input, same
	/// order.
	///
	/// # Errors
	///
	/// Returns a provider-level [`crate::EmbedError`] on failure.
	fn embed_images(&self, images: &[ImageInput]) -> Result<Vec<Vec<f32>>>;

	/// Encode texts into the image embedding space (the cross-modal
	/// tower).
	///
	/// # Errors
	///
	/// Returns a provider-level [`crate::EmbedError`] on failure.
	fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

	/// Cheap health probe used at startup provider selection.
	///
	/// # Errors
	///
	/// Returns whatever `embed_texts` returns for a trivial input.
	fn probe(&self) -> Result<()> {
		let _ = self.embed_texts(&["probe"])?;
		Ok(())
	}
}

/// L2-normalize a vector in place; zero vectors stay zero.
pub(crate) fn l2_normalize(v: &mut [f32]) {
	let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
	if norm > 0.0 {
		for x in v.iter_mut() {
			*x /= norm;
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_image_input_bytes() {
		let input = ImageInput::Bytes(vec![1, 2, 3]);
		assert_eq!(input.bytes().unwrap().as_ref(), &[1, 2, 3]);

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("img.bin");
		std::fs::write(&path, [9, 8]).unwrap();
		let input = ImageInput::Path(path);
		assert_eq!(input.bytes().unwrap().as_ref(), &[9, 8]);
	}

	#[test]
	fn test_l2_normalize() {
		let mut v = vec![3.0, 4.0];
		l2_normalize(&mut v);
		assert!((v[0] - 0.6).abs() < 1e-6);

		let mut zero = vec![0.0, 0.0];
		l2_normalize(&mut zero);
		assert_eq!(zero, vec![0.0, 0.0]);
	}
}
