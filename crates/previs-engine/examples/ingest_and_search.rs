//! End-to-end walkthrough with synthetic embedding providers: ingest a
//! few stills, then run hybrid search and beat recall against them.
//!
//! Run with: `cargo run --example ingest_and_search -p previs-engine`
//!
//! Real deployments wire `previs_embed::OrtTextEmbedder` and
//! `previs_embed::ClipEmbedder` instead of the toy providers below; the
//! engine only sees the `TextEmbedder`/`VisualEmbedder` traits.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use previs_core::query::Beat;
use previs_core::TagAssignment;
use previs_embed::{
	EmbeddingService, ImageInput, ServiceConfig, TextEmbedder, VisualEmbedder,
};
use previs_engine::{EngineBuilder, EngineConfig, IngestOptions, RecallOptions};

const TEXT_DIM: usize = 16;
const VISUAL_DIM: usize = 8;

/// Toy text encoder: a bag-of-bytes histogram, L2-normalized.
struct ToyText;

impl TextEmbedder for ToyText {
	fn model_id(&self) -> &str {
		"toy-text"
	}
	fn dim(&self) -> usize {
		TEXT_DIM
	}
	fn embed_batch(&self, texts: &[&str]) -> previs_embed::Result<Vec<Vec<f32>>> {
		Ok(texts.iter().map(|t| histogram(t.as_bytes(), TEXT_DIM)).collect())
	}
}

/// Toy visual encoder: byte histograms for images, text histograms for
/// the cross-modal tower.
struct ToyVisual;

impl VisualEmbedder for ToyVisual {
	fn model_id(&self) -> &str {
		"toy-visual"
	}
	fn dim(&self) -> usize {
		VISUAL_DIM
	}
	fn embed_images(&self, images: &[ImageInput]) -> previs_embed::Result<Vec<Vec<f32>>> {
		images
			.iter()
			.map(|input| Ok(histogram(&input.bytes()?, VISUAL_DIM)))
			.collect()
	}
	fn embed_texts(&self, texts: &[&str]) -> previs_embed::Result<Vec<Vec<f32>>> {
		Ok(texts
			.iter()
			.map(|t| histogram(t.as_bytes(), VISUAL_DIM))
			.collect())
	}
}

fn histogram(bytes: &[u8], dim: usize) -> Vec<f32> {
	let mut v = vec![0.0f32; dim];
	for &b in bytes {
		v[b as usize % dim] += 1.0;
	}
	let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
	if norm > 0.0 {
		for x in &mut v {
			*x /= norm;
		}
	}
	v
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "previs_engine=info,previs_core=info".into()),
		)
		.init();

	let root = tempfile::tempdir()?;

	// Footage library: three stills with production-style names.
	let names = ["EXT_ocean_sunset_01.png", "EXT_city_night_chase_02.png", "INT_office_day_03.png"];
	let mut paths = Vec::new();
	for (i, name) in names.iter().enumerate() {
		let path = root.path().join(name);
		let mut img = image::RgbImage::new(64, 36);
		for (x, y, pixel) in img.enumerate_pixels_mut() {
			*pixel = image::Rgb([i as u8 * 80, x as u8, y as u8]);
		}
		img.save(&path)?;
		paths.push(path);
	}

	let mut config = EngineConfig::default();
	config.store_dir = root.path().join("store");
	config.thumbs_dir = root.path().join("thumbs");
	config.proxies_dir = root.path().join("proxies");
	config.work_dir = root.path().join("work");
	config.text_dim = TEXT_DIM;
	config.visual_dim = VISUAL_DIM;
	config.text_provider = "toy-text".into();
	config.visual_provider = "toy-visual".into();

	let embed = Arc::new(EmbeddingService::new(
		ServiceConfig {
			text_dim: TEXT_DIM,
			visual_dim: VISUAL_DIM,
			..ServiceConfig::default()
		},
		vec![Arc::new(ToyText) as Arc<dyn TextEmbedder>],
		vec![Arc::new(ToyVisual) as Arc<dyn VisualEmbedder>],
	)?);

	let engine = EngineBuilder::new(config, embed).build()?;
	let cancel = CancellationToken::new();

	let results = engine
		.ingest_many(paths, IngestOptions::default(), &cancel)
		.await;
	for result in &results {
		match result {
			Ok(id) => println!("ingested {id}"),
			Err(err) => println!("ingest failed: {err}"),
		}
	}

	// Hybrid search.
	let mut query = engine.default_query("sunset over the ocean");
	query.tags = vec![TagAssignment::chain("scene", Some("exterior"), Some("sunset"), None)];
	let outcome = engine.search(query, &cancel).await?;
	println!("\nhybrid search:");
	for hit in &outcome.results {
		println!("  {}  {:.3}  {}", hit.asset_id, hit.score, hit.reason);
	}

	// Beat recall with a suggested cut window.
	let beat = Beat {
		text: "night city chase".into(),
		emotion_tags: vec!["tense".into()],
		scene_tags: vec![TagAssignment::chain("scene", Some("urban"), None, None)],
		action_tags: vec![TagAssignment::chain("action", Some("motion"), Some("chase"), None)],
		target_duration_s: 6.0,
	};
	let recall = engine
		.recall_for_beat(&beat, RecallOptions::default(), &cancel)
		.await?;
	println!("\nbeat recall:");
	for candidate in &recall.results {
		println!(
			"  {}  [{:.1}s..{:.1}s]  {:.3}  {}",
			candidate.asset_id, candidate.in_s, candidate.out_s, candidate.score, candidate.reason
		);
	}

	Ok(())
}
