//! # Previs Embed
//!
//! Embedding inference for the previsualization retrieval stack. Two
//! independent embedding spaces:
//!
//! - **Text space** — BGE-class sentence encoders for summaries, segment
//!   descriptions, and query text ([`text`], feature `onnx`).
//! - **Visual space** — a CLIP-class vision/text tower pair sharing one
//!   space, so beat text can be scored directly against keyframe
//!   embeddings ([`clip`], feature `onnx`).
//!
//! The [`service::EmbeddingService`] routes every request: ordered
//! provider chains with degraded-fallback, a bounded LRU cache keyed by
//! `(modality, model_id, sha256(input))`, dimension enforcement, and the
//! zero-vector contract for empty strings. Hosts talk to the service, not
//! to providers.
//!
//! Providers are plain `Send + Sync` traits ([`provider`]); a remote
//! OpenAI-style endpoint is available behind the `remote` feature
//! ([`remote`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod provider;
pub mod service;

#[cfg(feature = "onnx")]
pub mod clip;
#[cfg(feature = "onnx")]
pub mod text;

#[cfg(feature = "remote")]
pub mod remote;

pub use cache::{CacheStats, EmbeddingCache};
pub use error::{EmbedError, Result};
pub use provider::{ImageInput, TextEmbedder, VisualEmbedder};
pub use service::{EmbeddingService, ProbeReport, ServiceConfig};

#[cfg(feature = "onnx")]
pub use clip::{ClipConfig, ClipEmbedder};
#[cfg(feature = "onnx")]
pub use text::{OrtTextEmbedder, TextEmbedderConfig, TextModel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
