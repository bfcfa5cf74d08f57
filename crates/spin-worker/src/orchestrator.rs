//! Stage orchestration for one spin job.
//!
//! A run walks the job record through
//! `STABILIZING → EXTRACTING → DETECTING → ALIGNING → NORMALIZING →
//! OPTIMIZING → BUILDING → UPLOADING` and ends in `COMPLETED` or `FAILED`.
//! Every transition is persisted before the stage starts. Intermediate files
//! live in a per-run temporary directory that is removed on every exit path,
//! including when the run future is dropped by a timeout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use rayon::prelude::*;
use serde_json::json;
use tracing::{info, warn, Instrument};
use validator::Validate;

use spin_media::{
    align_to_center_mass, blend_loop_transition, detect_sequence, encode_image, map_detections, remove_backgrounds,
    render_viewer, smooth_detections, AlignConfig, AlignmentStrategy, BackgroundRemover, EncodeOptions, ExtractionMode,
    ExtractionRequest, Frame, FrameSelector, FrameSource, HomographyAligner, LoopCloser, MediaResult, Normalizer,
    Primitives, RotationConfig, RotationDirection, RotationEstimator, SpriteAssembler, VehicleDetector, ViewerOptions,
};
use spin_models::{Detection, FrameCount, JobId, JobOptions, JobRecord, JobStatus, OutputFormat, ResultMetadata, Stage};
use spin_queue::JobRecordStore;
use spin_storage::{keys, ObjectStore, StorageResult};

use crate::cache::{cache_key, video_fingerprint, HandleCache, ResultCache};
use crate::config::{PipelineConfig, SelectionStrategy};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Handle cache key of the geometry primitives.
pub const PRIMITIVES_HANDLE: &str = "geometry-primitives";

const ANGLES_CACHE_FUNC: &str = "cumulative_angles";
const VIEWER_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// External collaborators a run talks to.
#[derive(Clone)]
pub struct SpinServices {
    pub store: Arc<dyn ObjectStore>,
    pub records: Arc<dyn JobRecordStore>,
    pub source: Arc<dyn FrameSource>,
    pub detector: Option<Arc<dyn VehicleDetector>>,
    pub remover: Option<Arc<dyn BackgroundRemover>>,
}

/// Runs spin jobs end to end. Cheap to clone; clones share caches.
#[derive(Clone)]
pub struct SpinOrchestrator {
    services: SpinServices,
    config: PipelineConfig,
    work_dir: PathBuf,
    handles: Arc<HandleCache>,
    results: Option<Arc<ResultCache>>,
}

/// Output of the processing stages, before upload.
struct RenderedSpin {
    frames: Vec<Vec<u8>>,
    sprite: Vec<u8>,
    viewer: String,
    format: OutputFormat,
    metadata: ResultMetadata,
}

impl SpinOrchestrator {
    pub fn new(services: SpinServices, config: PipelineConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            services,
            config,
            work_dir: work_dir.into(),
            handles: Arc::new(HandleCache::new()),
            results: None,
        }
    }

    pub fn with_handle_cache(mut self, handles: Arc<HandleCache>) -> Self {
        self.handles = handles;
        self
    }

    pub fn with_result_cache(mut self, results: Arc<ResultCache>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn records(&self) -> &Arc<dyn JobRecordStore> {
        &self.services.records
    }

    fn primitives(&self) -> Arc<Primitives> {
        self.handles.get_or_insert_with(PRIMITIVES_HANDLE, load_primitives)
    }

    /// Process one job to a terminal record.
    ///
    /// Stage failures end up in the returned record as `FAILURE`. `Err` means
    /// the record store itself could not be written.
    pub async fn run(&self, job_id: &JobId, frame_count: FrameCount, options: &JobOptions) -> WorkerResult<JobRecord> {
        let logger = JobLogger::new(job_id, "process_spin");
        let span = logger.create_span();
        self.run_logged(job_id, frame_count, options, &logger)
            .instrument(span)
            .await
    }

    async fn run_logged(
        &self,
        job_id: &JobId,
        frame_count: FrameCount,
        options: &JobOptions,
        logger: &JobLogger,
    ) -> WorkerResult<JobRecord> {
        let started = Instant::now();

        let mut record = match self.services.records.get(job_id).await? {
            Some(existing) if existing.is_terminal() => {
                logger.log_warning(&format!("already {}, not reprocessing", existing.status));
                return Ok(existing);
            }
            // Redelivered after a crash: start over but keep the submission time
            Some(existing) => JobRecord {
                created_at: existing.created_at,
                ..JobRecord::new(job_id.clone(), frame_count, options.clone())
            },
            None => JobRecord::new(job_id.clone(), frame_count, options.clone()),
        };
        self.services.records.set(&record).await?;
        logger.log_start(&format!(
            "{} frames, remove_background={}",
            frame_count.get(),
            options.remove_background
        ));

        let outcome = match self.process(&mut record, logger, started).await {
            Ok(metadata) => {
                let mut done = record.clone();
                done.complete(metadata)?;
                match self.services.records.set(&done).await {
                    Ok(()) => Ok(done),
                    Err(e) => Err(WorkerError::from(e)),
                }
            }
            Err(e) => Err(e),
        };

        let elapsed = started.elapsed().as_secs_f64();
        match outcome {
            Ok(done) => {
                metrics::record_job(JobStatus::Success, elapsed);
                logger.log_completion(&format!("{:.1}s", elapsed));
                Ok(done)
            }
            Err(e) => {
                logger.log_error(&format!("[{}] {}", e.kind().as_str(), e));
                record.fail(e.to_string())?;
                self.services.records.set(&record).await?;
                metrics::record_job(JobStatus::Failure, elapsed);
                Ok(record)
            }
        }
    }

    /// All processing stages. The temporary directory is dropped on return.
    async fn process(&self, record: &mut JobRecord, logger: &JobLogger, started: Instant) -> WorkerResult<ResultMetadata> {
        record
            .options
            .validate()
            .map_err(|e| WorkerError::input_error(format!("invalid job options: {}", e)))?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let tmp = tempfile::Builder::new()
            .prefix(&format!("spin-{}-", record.job_id))
            .tempdir_in(&self.work_dir)?;

        let rendered = self.render(record, tmp.path(), logger, started).await?;

        let stage = self.enter(record, Stage::Uploading, logger).await?;
        if let Err(e) = self.publish(&record.job_id, &rendered).await {
            self.unpublish(&record.job_id, rendered.format).await;
            return Err(e);
        }
        metrics::record_frames_published(rendered.frames.len());
        self.leave(Stage::Uploading, stage);

        Ok(rendered.metadata)
    }

    async fn render(
        &self,
        record: &mut JobRecord,
        work: &Path,
        logger: &JobLogger,
        started: Instant,
    ) -> WorkerResult<RenderedSpin> {
        let job_id = record.job_id.clone();
        let target = record.frame_count.get();
        let options = record.options.clone();
        let parallelism = self.config.parallelism.max(1);

        // Stabilize
        let stage = self.enter(record, Stage::Stabilizing, logger).await?;
        let original = self.download_original(&job_id, work).await?;
        let video = if self.config.stabilize {
            self.services.source.stabilize(&original, work).await?
        } else {
            original.clone()
        };
        self.leave(Stage::Stabilizing, stage);

        // Extract and select
        let stage = self.enter(record, Stage::Extracting, logger).await?;
        let frames = match self.config.selection {
            SelectionStrategy::Angle => self.select_by_angle(&video, &original, work, target).await?,
            SelectionStrategy::LoopClosure => self.select_by_loop(&video, work, target).await?,
        };
        if frames.len() < target {
            logger.log_warning(&format!("only {} of {} frames available", frames.len(), target));
        }
        self.leave(Stage::Extracting, stage);

        // Detect
        let stage = self.enter(record, Stage::Detecting, logger).await?;
        let detections = match &self.services.detector {
            Some(detector) => {
                let raw = detect_sequence(Arc::clone(detector), &frames, parallelism).await;
                let missing = raw.iter().filter(|d| d.is_none()).count();
                metrics::record_degraded_frames(Stage::Detecting, missing);
                smooth_detections(&raw, self.config.smoothing_window)
            }
            None => {
                logger.log_progress("no detector configured, using center crops");
                vec![None; frames.len()]
            }
        };
        self.leave(Stage::Detecting, stage);

        // Align
        let stage = self.enter(record, Stage::Aligning, logger).await?;
        let (frames, detections) = self.align(frames, detections).await?;
        self.leave(Stage::Aligning, stage);

        // Normalize, cut out, blend
        let stage = self.enter(record, Stage::Normalizing, logger).await?;
        let normalizer = Normalizer::new(self.config.normalize);
        let mut frames = blocking(move || normalizer.normalize_sequence(&frames, &detections)).await?;

        let transparent = match (&self.services.remover, options.remove_background) {
            (Some(remover), true) => {
                let (cut, failed) = remove_backgrounds(Arc::clone(remover), &frames, parallelism).await;
                if failed > 0 {
                    logger.log_warning(&format!("background removal failed on {} frames", failed));
                    metrics::record_degraded_frames(Stage::Normalizing, failed);
                }
                frames = cut;
                true
            }
            (None, true) => {
                logger.log_warning("background removal requested but no remover configured");
                false
            }
            (_, false) => false,
        };

        // Blended frames are appended, so the loop diagnostic looks at the
        // first `looped` frames only.
        let looped = frames.len();
        if self.config.loop_blend_frames > 0 {
            let blend = self.config.loop_blend_frames;
            frames = blocking(move || blend_loop_transition(&frames, blend)).await?;
        }
        self.leave(Stage::Normalizing, stage);

        // Loop diagnostic and frame encoding
        let stage = self.enter(record, Stage::Optimizing, logger).await?;
        let threshold = options.loop_threshold.unwrap_or(self.config.loop_threshold);
        let closer = LoopCloser::new(self.primitives().scorer.clone());
        let frames = Arc::new(frames);
        let validation = {
            let frames = frames.clone();
            blocking(move || closer.validate_loop(&frames[..looped], threshold)).await?
        };
        if !validation.valid {
            logger.log_warning(&format!(
                "loop similarity {:.3} below threshold {:.2}",
                validation.similarity, threshold
            ));
        }

        let frame_options = EncodeOptions::for_output(transparent, self.config.frame_quality);
        let encoded = {
            let frames = frames.clone();
            blocking(move || {
                frames
                    .par_iter()
                    .map(|f| encode_image(&f.image, frame_options))
                    .collect::<MediaResult<Vec<_>>>()
            })
            .await??
        };
        self.leave(Stage::Optimizing, stage);

        // Sprite and viewer
        let stage = self.enter(record, Stage::Building, logger).await?;
        let sprite_options = EncodeOptions::for_output(transparent, self.config.sprite_quality);
        let (sprite, layout) = blocking(move || -> MediaResult<_> {
            let (sheet, layout) = SpriteAssembler::new(transparent).build(&frames, None)?;
            Ok((encode_image(&sheet, sprite_options)?, layout))
        })
        .await??;
        let viewer = render_viewer(&ViewerOptions {
            layout,
            format: sprite_options.format,
            transparent,
        });
        self.leave(Stage::Building, stage);

        info!(
            job_id = %job_id,
            frames = layout.frame_count,
            columns = layout.columns,
            rows = layout.rows,
            loop_valid = validation.valid,
            "Spin rendered"
        );

        Ok(RenderedSpin {
            frames: encoded,
            sprite,
            viewer,
            format: sprite_options.format,
            metadata: ResultMetadata {
                total_frames: layout.frame_count,
                frame_width: layout.frame_width,
                frame_height: layout.frame_height,
                processing_time_seconds: started.elapsed().as_secs_f64(),
                format: sprite_options.format,
                transparent,
                sprite_columns: layout.columns,
                sprite_rows: layout.rows,
                loop_valid: validation.valid,
                loop_similarity: validation.similarity,
            },
        })
    }

    /// Advance and persist the record, then start the stage clock.
    async fn enter(&self, record: &mut JobRecord, stage: Stage, logger: &JobLogger) -> WorkerResult<Instant> {
        record.advance(stage)?;
        self.services.records.set(record).await?;
        logger.log_stage(stage);
        Ok(Instant::now())
    }

    fn leave(&self, stage: Stage, entered: Instant) {
        metrics::record_stage(stage, entered.elapsed().as_secs_f64());
    }

    async fn download_original(&self, job_id: &JobId, work: &Path) -> WorkerResult<PathBuf> {
        let key = keys::find_original(self.services.store.as_ref(), job_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    WorkerError::input_error(format!("no uploaded video for job {}", job_id))
                } else {
                    e.into()
                }
            })?;
        let extension = keys::extension_of(&key).unwrap_or("mp4");
        let path = work.join(format!("original.{}", extension));
        self.services.store.get_to_path(&key, &path).await?;
        Ok(path)
    }

    /// Dense fixed-rate extraction, then frames at equidistant angles.
    ///
    /// Cumulative angles are cached by source fingerprint so a resubmitted
    /// video skips feature matching.
    async fn select_by_angle(&self, video: &Path, original: &Path, work: &Path, target: usize) -> WorkerResult<Vec<Frame>> {
        let request = ExtractionRequest {
            mode: ExtractionMode::FixedRate(self.config.extraction_fps),
            width: Some(self.config.extraction_width),
            ..Default::default()
        };
        let frames = self.services.source.extract(video, work, &request).await?;
        ensure_frames(&frames, video)?;
        if frames.len() <= target {
            return Ok(frames);
        }

        let primitives = self.primitives();
        let estimator = RotationEstimator::new(
            primitives.matcher.clone(),
            RotationConfig {
                full_rotation_span: self.config.full_rotation_span,
                sample_stride: self.config.rotation_stride,
                ..Default::default()
            },
        );
        let results = self.results.clone();
        let original = original.to_path_buf();
        let key_args = vec![
            json!(primitives.matcher.name()),
            json!(self.config.stabilize),
            json!(self.config.extraction_fps),
            json!(self.config.extraction_width),
            json!(self.config.rotation_stride),
            json!(self.config.full_rotation_span),
        ];
        let expected_total = self.config.expected_total_rotation;

        let (selected, total, cache_hit) = blocking(move || {
            let key = results.as_ref().and_then(|_| match video_fingerprint(&original) {
                Ok(fingerprint) => {
                    let mut args = vec![json!(fingerprint)];
                    args.extend(key_args);
                    Some(cache_key(ANGLES_CACHE_FUNC, &args))
                }
                Err(e) => {
                    warn!(error = %e, "Could not fingerprint source video");
                    None
                }
            });

            let cached = match (&results, &key) {
                (Some(cache), Some(key)) => cache
                    .get::<Vec<f64>>(key)
                    .filter(|angles| angles.len() == frames.len()),
                _ => None,
            };
            let cache_hit = cached.is_some();
            let cumulative = match cached {
                Some(angles) => angles,
                None => {
                    let angles = estimator.cumulative_angles(&frames);
                    if let (Some(cache), Some(key)) = (&results, &key) {
                        if let Err(e) = cache.set(key, &angles, None) {
                            warn!(error = %e, "Failed to cache rotation angles");
                        }
                    }
                    angles
                }
            };

            let total = cumulative.last().copied().unwrap_or(0.0);
            let selected = FrameSelector::new(estimator).select_with_angles(&frames, &cumulative, target, expected_total);
            (selected, total, cache_hit)
        })
        .await?;

        info!(
            selected = selected.len(),
            direction = RotationDirection::from_total(total).as_str(),
            coverage = total.abs(),
            cache_hit,
            "Frames selected by angle"
        );
        Ok(selected)
    }

    /// Oversampled fixed-count extraction, then loop-point truncation.
    async fn select_by_loop(&self, video: &Path, work: &Path, target: usize) -> WorkerResult<Vec<Frame>> {
        let request = ExtractionRequest {
            mode: ExtractionMode::FixedCount(self.config.oversampled_count(target)),
            width: Some(self.config.extraction_width),
            ..Default::default()
        };
        let frames = self.services.source.extract(video, work, &request).await?;
        ensure_frames(&frames, video)?;

        let closer = LoopCloser::new(self.primitives().scorer.clone());
        let selection = blocking(move || closer.find_best_loop_point(&frames, target)).await?;
        Ok(selection.frames)
    }

    async fn align(
        &self,
        frames: Vec<Frame>,
        detections: Vec<Option<Detection>>,
    ) -> WorkerResult<(Vec<Frame>, Vec<Option<Detection>>)> {
        match self.config.alignment {
            AlignmentStrategy::Homography { reference_index } => {
                let primitives = self.primitives();
                let aligner = HomographyAligner::new(
                    primitives.matcher.clone(),
                    primitives.solver.clone(),
                    AlignConfig::default(),
                );
                let (aligned, detections) = blocking(move || {
                    let aligned = aligner.align_sequence(&frames, reference_index);
                    let detections = map_detections(&aligned, &detections);
                    (aligned, detections)
                })
                .await?;

                let passed_through = aligned
                    .iter()
                    .filter(|a| a.transform.is_none())
                    .count()
                    .saturating_sub(1);
                metrics::record_degraded_frames(Stage::Aligning, passed_through);
                Ok((aligned.into_iter().map(|a| a.frame).collect(), detections))
            }
            AlignmentStrategy::CenterOfMass => {
                Ok(blocking(move || align_to_center_mass(&frames, &detections)).await?)
            }
            AlignmentStrategy::None => Ok((frames, detections)),
        }
    }

    async fn publish(&self, job_id: &JobId, rendered: &RenderedSpin) -> WorkerResult<()> {
        let format = rendered.format;

        let uploads: Vec<BoxFuture<'static, StorageResult<()>>> = rendered
            .frames
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                let store = Arc::clone(&self.services.store);
                let key = keys::frame_key(job_id, i, format);
                let bytes = bytes.clone();
                async move { store.put(&key, bytes, format.content_type()).await }.boxed()
            })
            .collect();
        stream::iter(uploads)
            .buffer_unordered(self.config.parallelism.max(1))
            .try_collect::<Vec<()>>()
            .await?;

        let store = self.services.store.as_ref();
        store
            .put(&keys::sprite_key(job_id, format), rendered.sprite.clone(), format.content_type())
            .await?;
        store
            .put(
                &keys::viewer_key(job_id),
                rendered.viewer.clone().into_bytes(),
                VIEWER_CONTENT_TYPE,
            )
            .await?;
        Ok(())
    }

    /// Best-effort removal of whatever a failed `publish` left behind.
    async fn unpublish(&self, job_id: &JobId, format: OutputFormat) {
        let store = self.services.store.as_ref();
        match store.delete_prefix(&keys::frames_prefix(job_id)).await {
            Ok(removed) if removed > 0 => info!(job_id = %job_id, removed, "Removed partially uploaded frames"),
            Ok(_) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to remove partial frames"),
        }
        for key in [keys::sprite_key(job_id, format), keys::viewer_key(job_id)] {
            if let Err(e) = store.delete(&key).await {
                if !e.is_not_found() {
                    warn!(job_id = %job_id, key = %key, error = %e, "Failed to remove partial output");
                }
            }
        }
    }

    /// Remove every stored object of a job and its record.
    pub async fn delete_job(&self, job_id: &JobId) -> WorkerResult<usize> {
        let logger = JobLogger::new(job_id, "delete_spin");
        logger.log_start("deleting outputs");
        let removed = self.services.store.delete_prefix(&keys::job_prefix(job_id)).await?;
        self.services.records.delete(job_id).await?;
        logger.log_completion(&format!("{} objects removed", removed));
        Ok(removed)
    }

    /// Fail a job whose run was abandoned, e.g. after a timeout.
    ///
    /// Terminal and unknown jobs are left alone.
    pub async fn mark_failed(&self, job_id: &JobId, error: &str) -> WorkerResult<Option<JobRecord>> {
        let Some(mut record) = self.services.records.get(job_id).await? else {
            return Ok(None);
        };
        if record.is_terminal() {
            return Ok(Some(record));
        }
        record.fail(error)?;
        self.services.records.set(&record).await?;
        metrics::record_job(JobStatus::Failure, 0.0);
        Ok(Some(record))
    }
}

#[cfg(feature = "opencv")]
fn load_primitives() -> Primitives {
    Primitives::opencv()
}

#[cfg(not(feature = "opencv"))]
fn load_primitives() -> Primitives {
    Primitives::native()
}

fn ensure_frames(frames: &[Frame], video: &Path) -> WorkerResult<()> {
    if frames.is_empty() {
        return Err(WorkerError::input_error(format!(
            "no frames could be extracted from {}",
            video.display()
        )));
    }
    Ok(())
}

/// Run CPU-bound work off the async runtime.
async fn blocking<T, F>(f: F) -> WorkerResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkerError::processing_failed(format!("Blocking task failed: {}", e)))
}
