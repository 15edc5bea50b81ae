//! Remote text embedding over an OpenAI-style `/embeddings` endpoint.
//!
//! A network provider slots into the same chain as the local ONNX
//! encoders, usually as the last resort after the local models. Requires
//! the `remote` feature.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EmbedError, Result};
use crate::provider::{l2_normalize, TextEmbedder};

/// Configuration for a remote embedding endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
	/// Endpoint URL, e.g. `https://api.openai.com/v1/embeddings`
	pub endpoint: String,
	/// Model name sent in the request body
	pub model: String,
	/// Expected output dimension
	pub dim: usize,
	/// Bearer token, when the endpoint requires one
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub api_key: Option<String>,
	/// Per-request timeout in seconds
	#[serde(default = "default_timeout_s")]
	pub timeout_s: u64,
}

const fn default_timeout_s() -> u64 {
	30
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
	model: &'a str,
	input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
	data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
	index: usize,
	embedding: Vec<f32>,
}

/// Text embedder backed by a remote HTTP endpoint.
pub struct RemoteTextEmbedder {
	config: RemoteConfig,
	client: reqwest::blocking::Client,
}

impl RemoteTextEmbedder {
	/// Build a client for the endpoint.
	///
	/// # Errors
	///
	/// Returns [`EmbedError::Inference`] when the HTTP client cannot be
	/// constructed.
	pub fn new(config: RemoteConfig) -> Result<Self> {
		let client = reqwest::blocking::Client::builder()
			.timeout(std::time::Duration::from_secs(config.timeout_s))
			.build()
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		Ok(Self { config, client })
	}
}

impl TextEmbedder for RemoteTextEmbedder {
	fn model_id(&self) -> &str {
		&self.config.model
	}

	fn dim(&self) -> usize {
		self.config.dim
	}

	fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
		if texts.is_empty() {
			return Ok(vec![]);
		}

		let mut request = self.client.post(&self.config.endpoint).json(&EmbeddingRequest {
			model: &self.config.model,
			input: texts,
		});
		if let Some(key) = &self.config.api_key {
			request = request.bearer_auth(key);
		}

		let response = request
			.send()
			.map_err(|e| EmbedError::Inference(e.to_string()))?;
		if !response.status().is_success() {
			return Err(EmbedError::Inference(format!(
				"endpoint answered {}",
				response.status()
			)));
		}
		let body: EmbeddingResponse = response
			.json()
			.map_err(|e| EmbedError::Inference(e.to_string()))?;

		if body.data.len() != texts.len() {
			return Err(EmbedError::Inference(format!(
				"endpoint returned {} vectors for {} inputs",
				body.data.len(),
				texts.len()
			)));
		}

		// Responses may arrive out of order; the index field is canonical.
		let mut rows = body.data;
		rows.sort_by_key(|r| r.index);
		debug!(batch = texts.len(), "remote embeddings received");
		Ok(rows
			.into_iter()
			.map(|r| {
				let mut v = r.embedding;
				l2_normalize(&mut v);
				v
			})
			.collect())
	}
}
