//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use spin_models::JobStatus;
use spin_queue::QueueJob;

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::orchestrator::SpinOrchestrator;

/// Pulls jobs off the queue and runs them with bounded concurrency.
pub struct JobExecutor {
    ctx: Arc<WorkerContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(ctx: WorkerContext) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            ctx: Arc::new(ctx),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Consume until shutdown, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_jobs = self.ctx.config.max_concurrent_jobs,
            "Starting job executor"
        );

        self.ctx.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Reclaim jobs left pending by crashed workers
        let ctx = Arc::clone(&self.ctx);
        let consumer_name = self.consumer_name.clone();
        let semaphore = Arc::clone(&self.job_semaphore);
        let mut shutdown_rx_claim = self.shutdown.subscribe();

        let claim_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ctx.config.claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_claim.changed() => {
                        if *shutdown_rx_claim.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match ctx.queue.claim_pending(&consumer_name, 5).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!(count = jobs.len(), "Claimed pending jobs");
                                for (message_id, job) in jobs {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(ctx, message_id, job).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "Failed to claim pending jobs"),
                        }
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!(error = %e, "Error consuming jobs");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached with jobs still running");
        }

        info!("Job executor stopped");
        Ok(())
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .ctx
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;
        if jobs.is_empty() {
            return Ok(());
        }
        debug!(count = jobs.len(), "Consumed jobs from queue");

        for (message_id, job) in jobs {
            let ctx = Arc::clone(&self.ctx);
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(ctx, message_id, job).await;
            });
        }
        Ok(())
    }

    /// Run one job under the wall-clock cap. Failures are dead-lettered, never retried.
    async fn execute_job(ctx: Arc<WorkerContext>, message_id: String, job: QueueJob) {
        let job_id = job.job_id().clone();
        info!(job_id = %job_id, kind = job.kind(), "Executing job");

        let result = match tokio::time::timeout(ctx.config.job_timeout, run_job(&ctx.orchestrator, &job)).await {
            Ok(result) => result,
            Err(_) => {
                let message = format!("timed out after {}s", ctx.config.job_timeout.as_secs());
                if let Err(e) = ctx.orchestrator.mark_failed(&job_id, &message).await {
                    error!(job_id = %job_id, error = %e, "Failed to record timeout");
                }
                Err(WorkerError::cancelled(message))
            }
        };

        match result {
            Ok(()) => {
                if let Err(e) = ctx.queue.ack(&message_id).await {
                    error!(job_id = %job_id, error = %e, "Failed to ack job");
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Job failed, moving to DLQ");
                if let Err(dlq_err) = ctx.queue.dlq(&message_id, &job, &e.to_string()).await {
                    error!(job_id = %job_id, error = %dlq_err, "Failed to move job to DLQ");
                }
            }
        }
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.ctx.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Dispatch a queue job. A process job that ends in `FAILURE` is an error here.
pub async fn run_job(orchestrator: &SpinOrchestrator, job: &QueueJob) -> WorkerResult<()> {
    match job {
        QueueJob::ProcessSpin(j) => {
            let record = orchestrator.run(&j.job_id, j.frame_count, &j.options).await?;
            match record.status {
                JobStatus::Success => Ok(()),
                _ => Err(WorkerError::job_failed(
                    record.error.unwrap_or_else(|| format!("job ended as {}", record.status)),
                )),
            }
        }
        QueueJob::DeleteSpin(j) => orchestrator.delete_job(&j.job_id).await.map(|_| ()),
    }
}
