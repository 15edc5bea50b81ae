//! Seed an in-memory store with synthetic embeddings and run each search
//! mode against it.
//!
//! Run with: `cargo run --example basic_search -p previs-core`

#![allow(clippy::unwrap_used)]

use tokio_util::sync::CancellationToken;

use previs_core::query::{Query, SearchMode};
use previs_core::search::search;
use previs_core::store::{AssetWrite, StoreConfig, VectorStore};
use previs_core::tags::{SourcedAssignment, TagAssignment, TagSource};
use previs_core::{
	AssetId, AssetRecord, ExtractionMethod, KeyframeRecord, MediaType, ProcessingStatus,
};

fn main() {
	let store = VectorStore::in_memory(StoreConfig {
		text_dim: 4,
		visual_dim: 3,
		..StoreConfig::default()
	});

	let clips = [
		("sunset over the bay", "sunset", [1.0f32, 0.1, 0.0, 0.0]),
		("waves on the open ocean", "ocean", [0.1, 1.0, 0.0, 0.0]),
		("city street at night", "night", [0.0, 0.0, 1.0, 0.2]),
	];
	for (i, (summary, l3, text)) in clips.iter().enumerate() {
		let asset_id = AssetId(format!("{i:016x}"));
		let keyframe = KeyframeRecord {
			id: asset_id.keyframe(0),
			asset_id: asset_id.clone(),
			timestamp_s: 1.0,
			thumbnail_path: format!("/tmp/thumbs/{asset_id}/1000.jpg").into(),
			method: ExtractionMethod::SceneChange,
			scene_score: Some(0.7),
		};
		store
			.commit(AssetWrite {
				asset: AssetRecord {
					id: asset_id.clone(),
					path: format!("/media/clip{i}.mp4").into(),
					media_type: MediaType::Video,
					duration_s: Some(12.0),
					width: 1920,
					height: 1080,
					created_at: 1_700_000_000,
					status: ProcessingStatus::Completed,
					tags: vec![SourcedAssignment {
						assignment: TagAssignment::chain(
							"scene",
							Some("exterior"),
							Some(l3),
							None,
						),
						source: TagSource::Filename,
						confidence: 1.0,
					}],
					free_tags: vec![],
					summary: (*summary).to_string(),
					caption: None,
					keyframes: vec![asset_id.keyframe(0)],
					segments: vec![],
					needs_review: false,
					no_proxy: false,
					keyframes_partial: false,
				},
				text_embedding: text.to_vec(),
				keyframes: vec![(keyframe, vec![1.0, 0.0, 0.0])],
				segments: vec![],
			})
			.unwrap();
	}

	let cancel = CancellationToken::new();
	let snapshot = store.snapshot();

	// Hybrid: tags and a (synthetic) query embedding leaning toward sunset.
	let mut query = Query::hybrid("sunset over ocean");
	query.tags = vec![TagAssignment::chain("scene", Some("exterior"), Some("sunset"), None)];
	let hits = search(&snapshot, &query, Some(&[0.9, 0.4, 0.0, 0.0]), &cancel).unwrap();
	println!("hybrid results:");
	for hit in &hits {
		println!("  {}  score={:.3}  {}", hit.asset_id, hit.score, hit.reason);
	}

	// Tag-only: no vectors consulted at all.
	let mut query = Query::hybrid(String::new());
	query.mode = SearchMode::TagOnly;
	query.tags = vec![TagAssignment::chain("scene", Some("exterior"), None, None)];
	let hits = search(&snapshot, &query, None, &cancel).unwrap();
	println!("tag-only results: {} assets", hits.len());
}
