//! Wiring of the worker's external collaborators.

use std::sync::Arc;

use tracing::{info, warn};

use spin_media::{BackgroundRemover, FfmpegFrameSource, FfmpegRunner, Stabilizer, StabilizerConfig, VehicleDetector};
use spin_ml_client::MlClient;
use spin_queue::{JobQueue, RedisRecordStore};
use spin_storage::S3Store;

use crate::cache::{HandleCache, ResultCache};
use crate::config::{PipelineConfig, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::orchestrator::{SpinOrchestrator, SpinServices};

/// Everything a worker process needs to run jobs.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub queue: Arc<JobQueue>,
    pub orchestrator: SpinOrchestrator,
}

impl WorkerContext {
    /// Build the context from environment variables.
    ///
    /// The ML service is optional; without `ML_SERVICE_URL` frames are
    /// center-cropped and background removal is skipped.
    pub async fn from_env(config: WorkerConfig) -> WorkerResult<Self> {
        let pipeline = PipelineConfig::from_env()?;

        let store = S3Store::from_env()?;
        store.ensure_bucket().await?;

        let queue = JobQueue::from_env()?;

        let redis_url = queue.config().redis_url.clone();
        let mut records = RedisRecordStore::new(&redis_url)?;
        if let Some(ttl) = config.record_ttl_secs {
            records = records.with_ttl(ttl);
        }

        let runner = FfmpegRunner::new().with_timeout(config.job_timeout.as_secs());
        let source = FfmpegFrameSource::new(runner.clone(), Stabilizer::new(StabilizerConfig::default(), runner));

        let ml = match std::env::var("ML_SERVICE_URL") {
            Ok(_) => {
                let client = MlClient::from_env()
                    .map_err(|e| WorkerError::config_error(format!("ML service client: {}", e)))?;
                if let Err(e) = client.health().await {
                    warn!(error = %e, "ML service health check failed; continuing");
                }
                Some(Arc::new(client))
            }
            Err(_) => {
                warn!("ML_SERVICE_URL not set; detection and background removal disabled");
                None
            }
        };

        let services = SpinServices {
            store: Arc::new(store),
            records: Arc::new(records),
            source: Arc::new(source),
            detector: ml.clone().map(|c| c as Arc<dyn VehicleDetector>),
            remover: ml.map(|c| c as Arc<dyn BackgroundRemover>),
        };

        let results = ResultCache::new(&config.cache_dir, pipeline.result_cache_ttl)?;
        match results.sweep_expired() {
            Ok(removed) if removed > 0 => info!(removed, "Swept expired result cache entries"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Result cache sweep failed"),
        }

        let orchestrator = SpinOrchestrator::new(services, pipeline, config.work_dir.clone())
            .with_handle_cache(Arc::new(HandleCache::new()))
            .with_result_cache(Arc::new(results));

        Ok(Self {
            config,
            queue: Arc::new(queue),
            orchestrator,
        })
    }
}
