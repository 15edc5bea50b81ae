//! Benchmarks for the scoring hot path: filtered scans and hybrid search
//! over synthetic stores of varying size.

#![allow(clippy::unwrap_used, missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use previs_core::query::{Query, SearchMode};
use previs_core::search::search;
use previs_core::store::{AssetWrite, StoreConfig, VectorStore};
use previs_core::tags::{SourcedAssignment, TagAssignment, TagSource};
use previs_core::{
	AssetId, AssetRecord, ExtractionMethod, KeyframeRecord, MediaType, ProcessingStatus,
};

const TEXT_DIM: usize = 384;
const VISUAL_DIM: usize = 512;

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
	(0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn seeded_store(assets: usize) -> VectorStore {
	let mut rng = StdRng::seed_from_u64(7);
	let store = VectorStore::in_memory(StoreConfig {
		text_dim: TEXT_DIM,
		visual_dim: VISUAL_DIM,
		..StoreConfig::default()
	});
	let l3s = ["sunset", "ocean", "night", "day"];
	for i in 0..assets {
		let asset_id = AssetId(format!("{i:016x}"));
		let keyframe = KeyframeRecord {
			id: asset_id.keyframe(0),
			asset_id: asset_id.clone(),
			timestamp_s: 1.0,
			thumbnail_path: format!("/thumbs/{asset_id}/1000.jpg").into(),
			method: ExtractionMethod::SceneChange,
			scene_score: Some(0.5),
		};
		store
			.commit(AssetWrite {
				asset: AssetRecord {
					id: asset_id.clone(),
					path: format!("/media/{asset_id}.mp4").into(),
					media_type: MediaType::Video,
					duration_s: Some(30.0),
					width: 1920,
					height: 1080,
					created_at: 1_700_000_000,
					status: ProcessingStatus::Completed,
					tags: vec![SourcedAssignment {
						assignment: TagAssignment::chain(
							"scene",
							Some("exterior"),
							Some(l3s[i % l3s.len()]),
							None,
						),
						source: TagSource::Filename,
						confidence: 1.0,
					}],
					free_tags: vec![],
					summary: format!("asset {i}"),
					caption: None,
					keyframes: vec![asset_id.keyframe(0)],
					segments: vec![],
					needs_review: false,
					no_proxy: false,
					keyframes_partial: false,
				},
				text_embedding: random_vector(&mut rng, TEXT_DIM),
				keyframes: vec![(keyframe, random_vector(&mut rng, VISUAL_DIM))],
				segments: vec![],
			})
			.unwrap();
	}
	store
}

fn bench_hybrid_search(c: &mut Criterion) {
	let mut group = c.benchmark_group("hybrid_search");
	for size in [100usize, 1_000, 10_000] {
		let store = seeded_store(size);
		let snapshot = store.snapshot();
		let mut rng = StdRng::seed_from_u64(11);
		let query_vec = random_vector(&mut rng, TEXT_DIM);
		let mut query = Query::hybrid("sunset over ocean");
		query.tags = vec![TagAssignment::chain(
			"scene",
			Some("exterior"),
			Some("sunset"),
			None,
		)];
		let cancel = CancellationToken::new();

		let _ = group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
			b.iter(|| {
				let hits =
					search(&snapshot, &query, Some(black_box(&query_vec)), &cancel).unwrap();
				black_box(hits)
			});
		});
	}
	group.finish();
}

fn bench_tag_only(c: &mut Criterion) {
	let store = seeded_store(10_000);
	let snapshot = store.snapshot();
	let mut query = Query::hybrid(String::new());
	query.mode = SearchMode::TagOnly;
	query.tags = vec![TagAssignment::chain("scene", Some("exterior"), None, None)];
	let cancel = CancellationToken::new();

	let _ = c.bench_function("tag_only_10k", |b| {
		b.iter(|| {
			let hits = search(&snapshot, &query, None, &cancel).unwrap();
			black_box(hits)
		});
	});
}

criterion_group!(benches, bench_hybrid_search, bench_tag_only);
criterion_main!(benches);
