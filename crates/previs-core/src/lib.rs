//! # Previs Core
//!
//! The retrieval engine behind a previsualization workflow: given a
//! screenplay decomposed into beats and a library of ingested footage,
//! find the clips that fit each beat and suggest where to cut them.
//!
//! This crate is the pure half of that system. It owns:
//!
//! - **The data model** — assets, keyframes, segments, and the stable ids
//!   that join them ([`asset`]).
//! - **Hierarchical tags** — four ordered levels with a validated L1..L3
//!   vocabulary and open L4 descriptors, stored as explicit tuples so
//!   level-aware scoring never parses strings ([`tags`]).
//! - **The vector store** — dim-checked, L2-normalized matrices behind
//!   immutable snapshots: readers never wait, writers swap ([`store`]).
//! - **Search & recall scoring** — tag/vector/hybrid/gated modes,
//!   multimodal fusion, and in/out window suggestion, all computed from
//!   pre-embedded query vectors ([`search`]).
//!
//! What it deliberately does *not* do: run models, touch FFmpeg, or talk
//! to the network. Embedding inference lives in `previs-embed`, media I/O
//! in `previs-perception`, and orchestration in `previs-engine`. The
//! seams are slices and ids, which keeps every ranking decision here
//! reproducible from synthetic vectors.
//!
//! ## Example
//!
//! ```rust
//! use previs_core::search::{search, suggest_window};
//! use previs_core::store::{StoreConfig, VectorStore};
//! use previs_core::query::{Query, SearchMode};
//! use tokio_util::sync::CancellationToken;
//!
//! let store = VectorStore::in_memory(StoreConfig {
//!     text_dim: 4,
//!     visual_dim: 3,
//!     ..StoreConfig::default()
//! });
//!
//! // An empty store answers with an empty list, never an error.
//! let mut query = Query::hybrid("sunset over ocean");
//! query.validate().unwrap();
//! let hits = search(
//!     &store.snapshot(),
//!     &query,
//!     Some(&[1.0, 0.0, 0.0, 0.0]),
//!     &CancellationToken::new(),
//! )
//! .unwrap();
//! assert!(hits.is_empty());
//!
//! // A 6 s window centered on t=12 inside a 30 s clip.
//! assert_eq!(suggest_window(30.0, 12.0, 6.0), (9.0, 15.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod asset;
pub mod error;
pub mod query;
pub mod search;
pub mod store;
pub mod tags;
pub mod vector;

pub use asset::{
	AssetId, AssetRecord, ExtractionMethod, KeyframeId, KeyframeRecord, MediaType,
	ProcessingStatus, SegmentId, SegmentRecord,
};
pub use error::{CoreError, Modality, Result};
pub use query::{
	Beat, HybridWeights, MultimodalWeights, Query, SceneCandidate, ScoredResult, SearchMode,
	SearchOutcome, SubScores,
};
pub use store::{AssetWrite, Snapshot, StoreConfig, VectorStore};
pub use tags::{TagAssignment, TagFilter, TagHierarchy, TagLevel, TagSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
