//! The ingestion pipeline.
//!
//! Turns one raw media file into a committed, searchable asset record:
//!
//! 1. **Accept** — existence, size bounds, media type sniff; a pending
//!    skeleton row is committed so the asset is observable immediately.
//! 2. **Probe** — duration/dimensions via FFprobe (images skip ahead).
//! 3. **Proxy** — 720p H.264 transcode; failure falls back to the
//!    original and marks `no_proxy`.
//! 4. **Keyframes** — strategy-driven extraction with thumbnails.
//! 5. **Tags** — filename lexicon, then best-effort LLM enrichment, then
//!    keyframe classification; L1 falls back to `unknown`/`needs_review`.
//! 6. **Text embedding** — summary built from filename, tags, caption.
//! 7. **Visual embedding** — one vector per keyframe thumbnail.
//! 8. **Commit** — a single transactional store write.
//!
//! The asset id is the first 16 hex chars of the SHA-256 of the file
//! bytes unless the caller supplies one. Re-ingesting existing content is
//! a no-op without `force`; with it, the row and all children are
//! replaced atomically. Cancellation is checked between stages; partial
//! disk artifacts survive a cancel so a resume can reuse them, but no
//! asset remains in the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use previs_core::tags::enrich::{
	aggregate_frame_tags, parse_enrichment, EnrichmentRequest, FrameTagScore,
};
use previs_core::tags::{merge_assignments, SourcedAssignment, TagAssignment, TagSource};
use previs_core::{
	AssetId, AssetRecord, AssetWrite, CoreError, ExtractionMethod, KeyframeRecord, MediaType,
	ProcessingStatus, Result, SegmentRecord,
};
use previs_embed::ImageInput;
use previs_perception::extractor::KeyframeOutput;
use previs_perception::scene::Strategy;
use previs_perception::{extractor, probe, proxy, ExtractorConfig};

use crate::{map_perception_error, Engine};

/// Confidence floor for keyframe-derived tags.
const FRAME_TAG_THRESHOLD: f32 = 0.5;

/// Video containers the accept stage recognizes.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "m4v", "mts", "mxf"];

/// Image formats the accept stage recognizes.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];

// ============================================================================
// Options
// ============================================================================

/// Options for one ingest call.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
	/// Replace an existing asset with the same id
	pub force: bool,
	/// Override the configured keyframe strategy for this asset
	pub strategy: Option<Strategy>,
	/// Project-scoped id instead of the content hash
	pub asset_id: Option<AssetId>,
}

// ============================================================================
// Public operations
// ============================================================================

impl Engine {
	/// Ingest one media file. Returns the asset id, which is stable for
	/// identical content.
	///
	/// # Errors
	///
	/// `InvalidInput` for unacceptable files, `ProbeFailed` /
	/// `ExtractionFailed` for media failures (the asset is marked
	/// failed), `EmbeddingUnavailable` when providers are down, and
	/// `Cancelled` on cooperative cancellation.
	#[instrument(skip_all, fields(path = %path.as_ref().display()))]
	pub async fn ingest(
		&self,
		path: impl AsRef<Path>,
		options: IngestOptions,
		cancel: &CancellationToken,
	) -> Result<AssetId> {
		let path = path.as_ref().to_path_buf();
		let media_type = self.accept(&path).await?;

		let id = match &options.asset_id {
			Some(id) => id.clone(),
			None => content_id(&path).await?,
		};

		let replacing = self.inner.store.contains(&id);
		if replacing && !options.force {
			debug!(asset = %id, "content already ingested; no-op");
			return Ok(id);
		}

		let _worker = self
			.inner
			.worker_semaphore
			.acquire()
			.await
			.map_err(|_| CoreError::Cancelled)?;

		// A fresh asset becomes observable before the heavy stages run. A
		// force replace keeps the previous record queryable until the new
		// one commits, so a failed replace never loses the old row.
		if !replacing {
			self.commit_skeleton(&id, &path, media_type, ProcessingStatus::Pending)
				.await?;
			self.commit_skeleton(&id, &path, media_type, ProcessingStatus::Processing)
				.await?;
		}

		match self.run_pipeline(&id, &path, media_type, &options, cancel).await {
			Ok(write) => {
				self.commit_write(write).await?;
				info!(asset = %id, replacing, "ingest committed");
				Ok(id)
			}
			Err(CoreError::Cancelled) => {
				// Partial artifacts stay on disk for resume; the store
				// must not keep a half-ingested row.
				if !replacing {
					if let Err(err) = self.delete_row(&id).await {
						warn!(asset = %id, %err, "failed to roll back cancelled ingest");
					}
				}
				Err(CoreError::Cancelled)
			}
			Err(err) => {
				if replacing {
					warn!(asset = %id, %err, "force re-ingest failed; previous record retained");
				} else if let Err(mark_err) = self
					.commit_skeleton(&id, &path, media_type, ProcessingStatus::Failed)
					.await
				{
					warn!(asset = %id, %mark_err, "failed to mark asset failed");
				}
				Err(err)
			}
		}
	}

	/// Ingest many files concurrently, bounded by `ingest.workers`.
	/// Results arrive in input order; one failure never aborts the rest.
	pub async fn ingest_many(
		&self,
		paths: Vec<PathBuf>,
		options: IngestOptions,
		cancel: &CancellationToken,
	) -> Vec<Result<AssetId>> {
		let mut handles = Vec::with_capacity(paths.len());
		for path in paths {
			let engine = self.clone();
			let options = options.clone();
			let cancel = cancel.clone();
			handles.push(tokio::spawn(async move {
				engine.ingest(&path, options, &cancel).await
			}));
		}

		let mut results = Vec::with_capacity(handles.len());
		for handle in handles {
			results.push(match handle.await {
				Ok(result) => result,
				Err(join_err) => Err(CoreError::InvalidInput(join_err.to_string())),
			});
		}
		results
	}

	/// Re-run the full pipeline for an existing asset, replacing it.
	///
	/// # Errors
	///
	/// `NotFound` for an unknown id, then as [`Engine::ingest`].
	pub async fn reingest(&self, id: &AssetId, cancel: &CancellationToken) -> Result<AssetId> {
		let asset = self.inner.store.get_asset(id)?;
		self.ingest(
			&asset.path,
			IngestOptions {
				force: true,
				strategy: None,
				asset_id: Some(id.clone()),
			},
			cancel,
		)
		.await
	}

	/// Delete an asset, its store rows, and its derived artifacts.
	///
	/// # Errors
	///
	/// Returns `NotFound` for an unknown id.
	#[instrument(skip_all, fields(asset = %id))]
	pub async fn delete(&self, id: &AssetId) -> Result<()> {
		self.delete_row(id).await?;

		// Derived artifacts are disposable; removal failures only warn.
		let thumbs = self.inner.config.thumbs_dir.join(&id.0);
		if let Err(err) = tokio::fs::remove_dir_all(&thumbs).await {
			if err.kind() != std::io::ErrorKind::NotFound {
				warn!(asset = %id, %err, "failed to remove thumbnails");
			}
		}
		let proxy = proxy::proxy_path(&self.inner.config.proxies_dir, &id.0);
		if let Err(err) = tokio::fs::remove_file(&proxy).await {
			if err.kind() != std::io::ErrorKind::NotFound {
				warn!(asset = %id, %err, "failed to remove proxy");
			}
		}
		Ok(())
	}

	/// Fetch one asset record.
	///
	/// # Errors
	///
	/// Returns `NotFound` for an unknown id.
	pub fn get_asset(&self, id: &AssetId) -> Result<AssetRecord> {
		self.inner.store.get_asset(id)
	}

	/// Fetch an asset's keyframes, chronological.
	///
	/// # Errors
	///
	/// Returns `NotFound` for an unknown id.
	pub fn list_keyframes(&self, id: &AssetId) -> Result<Vec<KeyframeRecord>> {
		self.inner.store.list_keyframes(id)
	}
}

// ============================================================================
// Pipeline stages
// ============================================================================

impl Engine {
	/// Stage 1: validate the file and sniff its media type.
	async fn accept(&self, path: &Path) -> Result<MediaType> {
		let metadata = tokio::fs::metadata(path)
			.await
			.map_err(|_| CoreError::InvalidInput(format!("file not found: {}", path.display())))?;
		if !metadata.is_file() {
			return Err(CoreError::InvalidInput(format!(
				"not a regular file: {}",
				path.display()
			)));
		}
		if metadata.len() == 0 {
			return Err(CoreError::InvalidInput(format!(
				"empty file: {}",
				path.display()
			)));
		}
		if let Some(cap) = self.inner.config.ingest.max_file_bytes {
			if metadata.len() > cap {
				return Err(CoreError::InvalidInput(format!(
					"file exceeds size bound ({} > {cap} bytes)",
					metadata.len()
				)));
			}
		}
		sniff_media_type(path).ok_or_else(|| {
			CoreError::InvalidInput(format!(
				"unrecognized media extension: {}",
				path.display()
			))
		})
	}

	/// Stages 2-7, producing the complete write for stage 8.
	async fn run_pipeline(
		&self,
		id: &AssetId,
		path: &Path,
		media_type: MediaType,
		options: &IngestOptions,
		cancel: &CancellationToken,
	) -> Result<AssetWrite> {
		ensure_live(cancel)?;

		let (probed, no_proxy, keyframes, partial, caption) = match media_type {
			MediaType::Video => self.video_stages(id, path, options, cancel).await?,
			MediaType::Image => {
				let (width, height) = probe::probe_image(path)
					.map_err(|e| map_perception_error(e, path, false))?;
				let keyframe = self.image_keyframe(id, path).await?;
				(
					Probed {
						duration_s: None,
						width,
						height,
					},
					false,
					vec![keyframe],
					false,
					None,
				)
			}
		};
		ensure_live(cancel)?;

		// Stage 5: tags from all sources, merged in order.
		let filename = path
			.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_default();
		let (tags, frame_tags, needs_review) =
			self.generate_tags(&filename, caption.as_deref(), &keyframes).await;
		ensure_live(cancel)?;

		// Stage 6: summary and its text embedding.
		let summary = build_summary(&filename, &tags, caption.as_deref());
		let text_embedding = self
			.embed_text_guarded(vec![summary.clone()])
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| CoreError::EmbeddingUnavailable("empty embedding batch".into()))?;
		ensure_live(cancel)?;

		// Stage 7: one visual embedding per keyframe thumbnail.
		let thumbs: Vec<ImageInput> = keyframes
			.iter()
			.map(|kf| ImageInput::Path(kf.thumbnail_path.clone()))
			.collect();
		let visual_embeddings = self.embed_images_guarded(thumbs).await?;
		ensure_live(cancel)?;

		// Optional segments between scene-change keyframes.
		let segments = if self.inner.config.segments.enabled && media_type == MediaType::Video {
			self.build_segments(id, &filename, &keyframes, &frame_tags, probed.duration_s)
				.await?
		} else {
			Vec::new()
		};

		let method = strategy_method(options, &self.inner.config);
		Ok(assemble_write(
			id,
			path,
			media_type,
			&probed,
			keyframes,
			visual_embeddings,
			segments,
			AssembleFlags {
				no_proxy,
				partial,
				needs_review,
			},
			tags,
			summary,
			caption,
			text_embedding,
			method,
		))
	}

	/// Stages 2-4 for video: probe, proxy, keyframes (and caption).
	async fn video_stages(
		&self,
		id: &AssetId,
		path: &Path,
		options: &IngestOptions,
		cancel: &CancellationToken,
	) -> Result<(Probed, bool, Vec<KeyframeOutput>, bool, Option<String>)> {
		let info = probe::probe_video(path)
			.await
			.map_err(|e| map_perception_error(e, path, false))?;
		if info.duration_s <= 0.0 {
			return Err(CoreError::ProbeFailed {
				path: path.to_path_buf(),
				reason: "zero duration".into(),
			});
		}
		ensure_live(cancel)?;

		// Stage 3: proxy, falling back to the original on any failure.
		let transcode_timeout =
			Duration::from_secs(self.inner.config.ingest.transcode_timeout_s);
		let proxy_result = tokio::time::timeout(
			transcode_timeout,
			proxy::transcode_proxy(path, &self.inner.config.proxies_dir, &id.0),
		)
		.await;
		let (decode_source, no_proxy) = match proxy_result {
			Ok(Ok(proxy_path)) => (proxy_path, false),
			Ok(Err(err)) => {
				warn!(asset = %id, %err, "proxy transcode failed; using original");
				(path.to_path_buf(), true)
			}
			Err(_elapsed) => {
				warn!(asset = %id, "proxy transcode timed out; using original");
				(path.to_path_buf(), true)
			}
		};
		ensure_live(cancel)?;

		// Stage 4: keyframes. A video must yield at least one.
		let extractor_config = ExtractorConfig {
			params: self.inner.config.keyframe.to_params(options.strategy),
			..ExtractorConfig::default()
		};
		let extract_timeout = Duration::from_secs(self.inner.config.ingest.extract_timeout_s);
		let extraction = tokio::time::timeout(
			extract_timeout,
			extractor::extract_keyframes(
				&decode_source,
				info.duration_s,
				&id.0,
				&self.inner.config.thumbs_dir,
				&self.inner.config.work_dir,
				&extractor_config,
				cancel,
			),
		)
		.await
		.map_err(|_| CoreError::ExtractionFailed {
			path: path.to_path_buf(),
			reason: format!("timed out after {}s", extract_timeout.as_secs()),
		})?
		.map_err(|e| map_perception_error(e, path, true))?;

		let caption = self.transcribe_caption(&decode_source).await;

		Ok((
			Probed {
				duration_s: Some(info.duration_s),
				width: info.width,
				height: info.height,
			},
			no_proxy,
			extraction.keyframes,
			extraction.partial,
			caption,
		))
	}

	#[cfg(feature = "transcription")]
	async fn transcribe_caption(&self, source: &Path) -> Option<String> {
		use previs_perception::transcribe;

		let config = transcribe::TranscriptionConfig::default();
		if !transcribe::is_model_available(&config) {
			return None;
		}
		match transcribe::transcribe_video(source, &config).await {
			Ok(result) if !result.text.is_empty() => Some(result.text),
			Ok(_) => None,
			Err(err) => {
				warn!(%err, "transcription failed; continuing without caption");
				None
			}
		}
	}

	#[cfg(not(feature = "transcription"))]
	#[allow(clippy::unused_async)]
	async fn transcribe_caption(&self, _source: &Path) -> Option<String> {
		None
	}

	/// The single pseudo-keyframe of an image asset.
	async fn image_keyframe(&self, id: &AssetId, path: &Path) -> Result<KeyframeOutput> {
		let source = path.to_path_buf();
		let worker_path = source.clone();
		let thumbs_dir = self.inner.config.thumbs_dir.clone();
		let asset_id = id.0.clone();
		tokio::task::spawn_blocking(move || {
			extractor::extract_image_keyframe(
				&worker_path,
				&asset_id,
				&thumbs_dir,
				previs_perception::thumbs::DEFAULT_MAX_EDGE,
			)
		})
		.await
		.map_err(|e| CoreError::InvalidInput(e.to_string()))?
		.map_err(|e| map_perception_error(e, &source, true))
	}

	/// Stage 5: merge tag sources. Never fails; an empty outcome falls
	/// back to `unknown` with `needs_review`.
	async fn generate_tags(
		&self,
		filename: &str,
		caption: Option<&str>,
		keyframes: &[KeyframeOutput],
	) -> (Vec<SourcedAssignment>, Vec<Vec<FrameTagScore>>, bool) {
		let mut tags = self
			.inner
			.lexicon
			.tag_filename(filename, &self.inner.hierarchy);

		// LLM enrichment, best-effort.
		if let Some(enricher) = &self.inner.enricher {
			let request_filename = filename.to_string();
			let request_caption = caption.map(str::to_string);
			let enricher = Arc::clone(enricher);
			let response = tokio::task::spawn_blocking(move || {
				let request = EnrichmentRequest {
					filename: &request_filename,
					caption: request_caption.as_deref(),
					keyframe_captions: &[],
				};
				enricher.enrich(&request)
			})
			.await;
			match response {
				Ok(Ok(json)) => {
					let outcome = parse_enrichment(&json, &self.inner.hierarchy);
					if outcome.rejected > 0 {
						debug!(rejected = outcome.rejected, "enrichment entries rejected");
					}
					let _ = merge_assignments(&mut tags, outcome.accepted);
				}
				Ok(Err(err)) => warn!(%err, "tag enrichment failed; continuing"),
				Err(join_err) => warn!(%join_err, "tag enrichment task died; continuing"),
			}
		}

		// Keyframe classification, best-effort.
		let mut frame_tags: Vec<Vec<FrameTagScore>> = Vec::new();
		if let Some(tagger) = &self.inner.frame_tagger {
			let tagger = Arc::clone(tagger);
			let thumbs: Vec<PathBuf> =
				keyframes.iter().map(|kf| kf.thumbnail_path.clone()).collect();
			let scored = tokio::task::spawn_blocking(move || {
				thumbs
					.iter()
					.map(|thumb| match tagger.tag_frame(thumb) {
						Ok(scores) => scores,
						Err(err) => {
							warn!(thumb = %thumb.display(), %err, "frame tagging failed");
							Vec::new()
						}
					})
					.collect::<Vec<_>>()
			})
			.await;
			if let Ok(scored) = scored {
				let derived = aggregate_frame_tags(&scored, FRAME_TAG_THRESHOLD)
					.into_iter()
					.filter(|entry| {
						self.inner
							.hierarchy
							.validate(&entry.assignment)
							.map_err(|rejection| {
								warn!(%rejection, "keyframe tag rejected");
							})
							.is_ok()
					});
				let _ = merge_assignments(&mut tags, derived);
				frame_tags = scored;
			}
		}

		let needs_review = tags.is_empty();
		if needs_review {
			tags.push(SourcedAssignment {
				assignment: TagAssignment::l1("unknown"),
				source: TagSource::Manual,
				confidence: 0.0,
			});
		}
		(tags, frame_tags, needs_review)
	}

	/// Derive segment records between scene-change keyframes.
	async fn build_segments(
		&self,
		id: &AssetId,
		filename: &str,
		keyframes: &[KeyframeOutput],
		frame_tags: &[Vec<FrameTagScore>],
		duration_s: Option<f64>,
	) -> Result<Vec<(SegmentRecord, Vec<f32>)>> {
		let Some(duration) = duration_s else {
			return Ok(Vec::new());
		};
		let spans = derive_segment_spans(keyframes, duration, self.inner.config.segments.min_span_s);
		if spans.is_empty() {
			return Ok(Vec::new());
		}

		let mut records = Vec::with_capacity(spans.len());
		let mut descriptions = Vec::with_capacity(spans.len());
		for (ordinal, (start_s, end_s)) in spans.iter().enumerate() {
			// Tags of the keyframes inside the span.
			let inside: Vec<Vec<FrameTagScore>> = keyframes
				.iter()
				.zip(frame_tags.iter().chain(std::iter::repeat(&Vec::new())))
				.filter(|(kf, _)| kf.timestamp_s >= *start_s && kf.timestamp_s < *end_s)
				.map(|(_, scores)| scores.clone())
				.collect();
			let derived: Vec<TagAssignment> = aggregate_frame_tags(&inside, FRAME_TAG_THRESHOLD)
				.into_iter()
				.map(|entry| entry.assignment)
				.collect();

			let description = format!(
				"{filename} segment {ordinal} ({start_s:.1}s-{end_s:.1}s) {}",
				derived
					.iter()
					.map(TagAssignment::display_path)
					.collect::<Vec<_>>()
					.join(" ")
			);
			descriptions.push(description.clone());
			records.push(SegmentRecord {
				id: id.segment(ordinal),
				asset_id: id.clone(),
				start_s: *start_s,
				end_s: *end_s,
				description,
				tags: derived,
			});
		}

		let embeddings = self.embed_text_guarded(descriptions).await?;
		Ok(records.into_iter().zip(embeddings).collect())
	}

	// ------------------------------------------------------------------
	// Store plumbing
	// ------------------------------------------------------------------

	async fn commit_write(&self, write: AssetWrite) -> Result<()> {
		let inner = Arc::clone(&self.inner);
		tokio::task::spawn_blocking(move || inner.store.commit(write))
			.await
			.map_err(|e| CoreError::StoreIo(std::io::Error::other(e.to_string())))?
	}

	async fn delete_row(&self, id: &AssetId) -> Result<()> {
		let inner = Arc::clone(&self.inner);
		let id = id.clone();
		tokio::task::spawn_blocking(move || inner.store.delete(&id))
			.await
			.map_err(|e| CoreError::StoreIo(std::io::Error::other(e.to_string())))?
	}

	/// Commit a minimal status row (pending/processing/failed).
	async fn commit_skeleton(
		&self,
		id: &AssetId,
		path: &Path,
		media_type: MediaType,
		status: ProcessingStatus,
	) -> Result<()> {
		let write = AssetWrite {
			asset: AssetRecord {
				id: id.clone(),
				path: path.to_path_buf(),
				media_type,
				duration_s: None,
				width: 0,
				height: 0,
				created_at: now_epoch_secs(),
				status,
				tags: Vec::new(),
				free_tags: Vec::new(),
				summary: String::new(),
				caption: None,
				keyframes: Vec::new(),
				segments: Vec::new(),
				needs_review: false,
				no_proxy: false,
				keyframes_partial: false,
			},
			text_embedding: vec![0.0; self.inner.config.text_dim],
			keyframes: Vec::new(),
			segments: Vec::new(),
		};
		self.commit_write(write).await
	}
}

// ============================================================================
// Pure helpers
// ============================================================================

struct Probed {
	duration_s: Option<f64>,
	width: u32,
	height: u32,
}

struct AssembleFlags {
	no_proxy: bool,
	partial: bool,
	needs_review: bool,
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
	if cancel.is_cancelled() {
		Err(CoreError::Cancelled)
	} else {
		Ok(())
	}
}

/// Sniff video vs image from the file extension.
fn sniff_media_type(path: &Path) -> Option<MediaType> {
	let ext = path.extension()?.to_string_lossy().to_lowercase();
	if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
		Some(MediaType::Video)
	} else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
		Some(MediaType::Image)
	} else {
		None
	}
}

/// Content-derived asset id: first 16 hex chars of the file's SHA-256.
async fn content_id(path: &Path) -> Result<AssetId> {
	let path = path.to_path_buf();
	tokio::task::spawn_blocking(move || -> Result<AssetId> {
		use std::io::Read;

		let mut file = std::io::BufReader::new(std::fs::File::open(&path)?);
		let mut hasher = Sha256::new();
		let mut buf = vec![0u8; 1 << 20];
		loop {
			let read = file.read(&mut buf)?;
			if read == 0 {
				break;
			}
			hasher.update(&buf[..read]);
		}
		let digest = hasher.finalize();
		let mut id = String::with_capacity(16);
		for byte in digest.iter().take(8) {
			use std::fmt::Write;
			let _ = write!(id, "{byte:02x}");
		}
		Ok(AssetId(id))
	})
	.await
	.map_err(|e| CoreError::StoreIo(std::io::Error::other(e.to_string())))?
}

/// The summary fed to the text embedder: filename, tag paths, caption.
fn build_summary(filename: &str, tags: &[SourcedAssignment], caption: Option<&str>) -> String {
	let mut summary = filename.to_string();
	for tag in tags {
		summary.push(' ');
		summary.push_str(&tag.assignment.display_path().replace('/', " "));
	}
	if let Some(caption) = caption {
		if !caption.is_empty() {
			summary.push(' ');
			summary.push_str(caption);
		}
	}
	summary
}

/// Spans between consecutive scene-change keyframes (plus the tail span
/// to the end of the clip), dropping spans shorter than `min_span_s`.
fn derive_segment_spans(
	keyframes: &[KeyframeOutput],
	duration_s: f64,
	min_span_s: f64,
) -> Vec<(f64, f64)> {
	let boundaries: Vec<f64> = keyframes
		.iter()
		.filter(|kf| kf.scene_score.is_some())
		.map(|kf| kf.timestamp_s)
		.chain(std::iter::once(duration_s))
		.collect();

	boundaries
		.windows(2)
		.filter(|pair| pair[1] - pair[0] >= min_span_s && pair[1] <= duration_s)
		.map(|pair| (pair[0], pair[1]))
		.collect()
}

fn strategy_method(options: &IngestOptions, config: &crate::EngineConfig) -> ExtractionMethod {
	match options.strategy.unwrap_or(config.keyframe.strategy) {
		Strategy::SceneChange => ExtractionMethod::SceneChange,
		Strategy::Interval => ExtractionMethod::Interval,
		Strategy::Hybrid => ExtractionMethod::Hybrid,
	}
}

fn now_epoch_secs() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map_or(0, |d| d.as_secs())
}

#[allow(clippy::too_many_arguments)]
fn assemble_write(
	id: &AssetId,
	path: &Path,
	media_type: MediaType,
	probed: &Probed,
	keyframes: Vec<KeyframeOutput>,
	visual_embeddings: Vec<Vec<f32>>,
	segments: Vec<(SegmentRecord, Vec<f32>)>,
	flags: AssembleFlags,
	tags: Vec<SourcedAssignment>,
	summary: String,
	caption: Option<String>,
	text_embedding: Vec<f32>,
	method: ExtractionMethod,
) -> AssetWrite {
	let keyframe_records: Vec<(KeyframeRecord, Vec<f32>)> = keyframes
		.iter()
		.enumerate()
		.zip(visual_embeddings)
		.map(|((ordinal, kf), embedding)| {
			(
				KeyframeRecord {
					id: id.keyframe(ordinal),
					asset_id: id.clone(),
					timestamp_s: kf.timestamp_s,
					thumbnail_path: kf.thumbnail_path.clone(),
					method,
					scene_score: kf.scene_score,
				},
				embedding,
			)
		})
		.collect();

	let free_tags: Vec<String> = tags
		.iter()
		.filter_map(|t| t.assignment.l4.clone())
		.collect();

	AssetWrite {
		asset: AssetRecord {
			id: id.clone(),
			path: path.to_path_buf(),
			media_type,
			duration_s: probed.duration_s,
			width: probed.width,
			height: probed.height,
			created_at: now_epoch_secs(),
			status: ProcessingStatus::Completed,
			tags,
			free_tags,
			summary,
			caption,
			keyframes: keyframe_records.iter().map(|(kf, _)| kf.id.clone()).collect(),
			segments: segments.iter().map(|(s, _)| s.id.clone()).collect(),
			needs_review: flags.needs_review,
			no_proxy: flags.no_proxy,
			keyframes_partial: flags.partial,
		},
		text_embedding,
		keyframes: keyframe_records,
		segments,
	}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;
	use crate::test_support::test_engine;

	/// Write a small PNG with content derived from `seed` so distinct
	/// seeds produce distinct content hashes.
	fn write_png(dir: &Path, name: &str, seed: u8) -> PathBuf {
		let path = dir.join(name);
		let mut img = image::RgbImage::new(64, 48);
		for (x, y, pixel) in img.enumerate_pixels_mut() {
			*pixel = image::Rgb([seed, x as u8, y as u8]);
		}
		img.save(&path).unwrap();
		path
	}

	fn cancel() -> CancellationToken {
		CancellationToken::new()
	}

	#[test]
	fn test_sniff_media_type() {
		assert_eq!(sniff_media_type(Path::new("a.MP4")), Some(MediaType::Video));
		assert_eq!(sniff_media_type(Path::new("b.jpeg")), Some(MediaType::Image));
		assert_eq!(sniff_media_type(Path::new("c.txt")), None);
		assert_eq!(sniff_media_type(Path::new("noext")), None);
	}

	#[test]
	fn test_build_summary_joins_sources() {
		let tags = vec![SourcedAssignment {
			assignment: TagAssignment::chain("scene", Some("exterior"), Some("night"), None),
			source: TagSource::Filename,
			confidence: 1.0,
		}];
		let summary = build_summary("EXT_night.mp4", &tags, Some("a quiet street"));
		assert!(summary.contains("EXT_night.mp4"));
		assert!(summary.contains("scene exterior night"));
		assert!(summary.contains("a quiet street"));
	}

	#[test]
	fn test_derive_segment_spans() {
		let kf = |ts: f64, score: Option<f32>| KeyframeOutput {
			timestamp_s: ts,
			timestamp_ms: (ts * 1000.0) as u64,
			thumbnail_path: PathBuf::from("/t.jpg"),
			scene_score: score,
		};
		// Scene changes at 0, 5, 6; fill frame at 8; clip ends at 14.
		let frames = vec![
			kf(0.0, Some(1.0)),
			kf(5.0, Some(0.6)),
			kf(6.0, Some(0.5)),
			kf(8.0, None),
		];
		let spans = derive_segment_spans(&frames, 14.0, 2.0);
		// 0-5 kept, 5-6 too short, 6-14 kept (the fill frame is no boundary).
		assert_eq!(spans, vec![(0.0, 5.0), (6.0, 14.0)]);
	}

	#[tokio::test]
	async fn test_ingest_image_completes() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = write_png(dir.path(), "EXT_city_night_01.png", 1);

		let id = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap();
		let asset = engine.get_asset(&id).unwrap();

		assert_eq!(asset.status, ProcessingStatus::Completed);
		assert_eq!(asset.media_type, MediaType::Image);
		assert!(asset.duration_s.is_none());
		assert_eq!(asset.width, 64);
		assert!(!asset.needs_review);
		assert!(!asset.summary.is_empty());

		// Filename lexicon produced exterior/urban/night chains.
		let paths: Vec<String> = asset
			.tags
			.iter()
			.map(|t| t.assignment.display_path())
			.collect();
		assert!(paths.contains(&"scene/exterior".to_string()));
		assert!(paths.contains(&"scene/exterior/night".to_string()));

		// One pseudo-keyframe at t=0 with a visual embedding.
		let keyframes = engine.list_keyframes(&id).unwrap();
		assert_eq!(keyframes.len(), 1);
		assert_eq!(keyframes[0].timestamp_s, 0.0);
		assert!(keyframes[0].thumbnail_path.exists());
	}

	#[tokio::test]
	async fn test_ingest_is_idempotent_without_force() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = write_png(dir.path(), "clip.png", 2);

		let first = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap();
		let created = engine.get_asset(&first).unwrap().created_at;
		let count = engine.store().asset_count();

		let second = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap();
		assert_eq!(first, second);
		assert_eq!(engine.store().asset_count(), count);
		// The record itself is untouched by the no-op.
		assert_eq!(engine.get_asset(&first).unwrap().created_at, created);
	}

	#[tokio::test]
	async fn test_force_replaces_row() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = write_png(dir.path(), "clip.png", 3);

		let id = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap();
		let replaced = engine
			.ingest(
				&path,
				IngestOptions {
					force: true,
					..IngestOptions::default()
				},
				&cancel(),
			)
			.await
			.unwrap();
		assert_eq!(id, replaced);
		assert_eq!(engine.store().asset_count(), 1);
	}

	#[tokio::test]
	async fn test_same_content_same_id() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		// Identical bytes under two names hash to the same asset id.
		let a = write_png(dir.path(), "a.png", 7);
		let b = dir.path().join("b.png");
		std::fs::copy(&a, &b).unwrap();

		let id_a = engine.ingest(&a, IngestOptions::default(), &cancel()).await.unwrap();
		let id_b = engine.ingest(&b, IngestOptions::default(), &cancel()).await.unwrap();
		assert_eq!(id_a, id_b);
		assert_eq!(engine.store().asset_count(), 1);
	}

	#[tokio::test]
	async fn test_delete_then_reingest_same_id() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = write_png(dir.path(), "clip.png", 4);

		let id = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap();
		engine.delete(&id).await.unwrap();
		assert!(engine.get_asset(&id).is_err());

		let again = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap();
		assert_eq!(id, again);
	}

	#[tokio::test]
	async fn test_unknown_filename_needs_review() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = write_png(dir.path(), "zzzz.png", 5);

		let id = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap();
		let asset = engine.get_asset(&id).unwrap();
		assert!(asset.needs_review);
		assert_eq!(asset.tags[0].assignment.l1, "unknown");
	}

	#[tokio::test]
	async fn test_unsupported_extension_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = dir.path().join("notes.txt");
		std::fs::write(&path, b"not media").unwrap();

		let err = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap_err();
		assert_eq!(err.kind(), "invalid_input");
	}

	#[tokio::test]
	async fn test_missing_file_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let err = engine
			.ingest(dir.path().join("gone.png"), IngestOptions::default(), &cancel())
			.await
			.unwrap_err();
		assert_eq!(err.kind(), "invalid_input");
	}

	#[tokio::test]
	async fn test_cancelled_ingest_leaves_no_row() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = write_png(dir.path(), "clip.png", 6);

		let token = CancellationToken::new();
		token.cancel();
		let err = engine
			.ingest(&path, IngestOptions::default(), &token)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), "cancelled");
		assert_eq!(engine.store().asset_count(), 0);
	}

	#[tokio::test]
	async fn test_failed_force_reingest_keeps_previous_record() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = write_png(dir.path(), "clip.png", 11);

		let id = engine
			.ingest(&path, IngestOptions::default(), &cancel())
			.await
			.unwrap();

		// Corrupt the source so the replacement pipeline fails at probe.
		std::fs::write(&path, b"definitely not a png").unwrap();
		let err = engine.reingest(&id, &cancel()).await.unwrap_err();
		assert_eq!(err.kind(), "probe_failed");

		// The previous record survives, intact and queryable.
		let asset = engine.get_asset(&id).unwrap();
		assert_eq!(asset.status, ProcessingStatus::Completed);
		assert_eq!(engine.list_keyframes(&id).unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_reingest_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let err = engine
			.reingest(&AssetId::from("missing0000000000"), &cancel())
			.await
			.unwrap_err();
		assert_eq!(err.kind(), "not_found");
	}

	#[tokio::test]
	async fn test_ingest_many_all_commit() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let paths: Vec<PathBuf> = (0..8)
			.map(|i| write_png(dir.path(), &format!("clip_{i}.png"), 10 + i as u8))
			.collect();

		let results = engine
			.ingest_many(paths, IngestOptions::default(), &cancel())
			.await;
		assert_eq!(results.len(), 8);
		assert!(results.iter().all(Result::is_ok));
		assert_eq!(engine.store().asset_count(), 8);

		// Read-your-writes: a snapshot taken now observes all of them.
		assert_eq!(engine.store().snapshot().asset_count(), 8);
	}

	#[tokio::test]
	async fn test_project_scoped_id_respected() {
		let dir = tempfile::tempdir().unwrap();
		let engine = test_engine(dir.path());
		let path = write_png(dir.path(), "clip.png", 9);

		let custom = AssetId::from("projectscoped001");
		let id = engine
			.ingest(
				&path,
				IngestOptions {
					asset_id: Some(custom.clone()),
					..IngestOptions::default()
				},
				&cancel(),
			)
			.await
			.unwrap();
		assert_eq!(id, custom);
	}
}
