use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::models::job::{Job, JobStatus};
use crate::services::broker::{Delivery, MessageBroker, PrefetchLimit};
use crate::services::status_store::StatusStore;
use crate::workers::{HandleError, StageError};

/// Processes one job for a stage.
///
/// Returning `Ok` means every effect of the stage (downstream publish or
/// terminal status write) is durable, so the message may be acknowledged.
/// Handlers must be idempotent on their output: a redelivered message re-runs
/// the whole stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> &'static str;

    async fn handle(&self, job: Job) -> Result<(), HandleError>;
}

/// What one poll of the queue did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Queue was empty for the whole poll window.
    Idle,
    /// Message handled and acknowledged.
    Acked,
    /// Job failed permanently; marked `failed` and acknowledged.
    Failed,
    /// Payload was not a job; acknowledged and dropped.
    Discarded,
}

/// `worker_count` independent consume → process → ack loops over one queue.
pub struct WorkerPool {
    queue: &'static str,
    consumer_name: String,
    worker_count: usize,
    poll_timeout: Duration,
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn StatusStore>,
    handler: Arc<dyn StageHandler>,
    prefetch: Arc<PrefetchLimit>,
}

impl WorkerPool {
    pub fn new(
        queue: &'static str,
        consumer_name: impl Into<String>,
        worker_count: usize,
        broker: Arc<dyn MessageBroker>,
        store: Arc<dyn StatusStore>,
        handler: Arc<dyn StageHandler>,
    ) -> Self {
        Self {
            queue,
            consumer_name: consumer_name.into(),
            worker_count: worker_count.max(1),
            poll_timeout: Duration::from_secs(1),
            broker,
            store,
            handler,
            prefetch: Arc::new(PrefetchLimit::new(5)),
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn queue(&self) -> &'static str {
        self.queue
    }

    pub fn prefetch(&self) -> Arc<PrefetchLimit> {
        self.prefetch.clone()
    }

    /// Consumer identity of worker `index`; stable across restarts.
    pub fn consumer(&self, index: usize) -> String {
        format!("{}-{}-{}", self.consumer_name, self.handler.stage(), index)
    }

    /// Run all workers until `shutdown` fires, then wait for in-flight jobs.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            queue = self.queue,
            stage = self.handler.stage(),
            workers = self.worker_count,
            "Starting worker pool"
        );

        let mut workers = JoinSet::new();
        for index in 0..self.worker_count {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { pool.worker_loop(index, shutdown).await });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(queue = self.queue, error = %e, "Worker task panicked");
            }
        }

        tracing::info!(queue = self.queue, "Worker pool stopped");
    }

    async fn worker_loop(&self, index: usize, shutdown: CancellationToken) {
        let consumer = self.consumer(index);

        // Anything this consumer held when it last died goes back on the queue.
        match self.broker.recover(self.queue, &consumer).await {
            Ok(0) => {}
            Ok(recovered) => tracing::warn!(
                queue = self.queue,
                worker = %consumer,
                recovered,
                "Requeued messages left in flight by a previous run"
            ),
            Err(e) => tracing::error!(queue = self.queue, worker = %consumer, error = %e, "Recovery failed"),
        }

        // A job already taken runs to completion; shutdown is observed between polls.
        while !shutdown.is_cancelled() {
            match self.process_next(&consumer).await {
                Ok(Processed::Idle) => {
                    tracing::trace!(worker = %consumer, "No jobs available");
                }
                Ok(processed) => {
                    tracing::debug!(worker = %consumer, ?processed, "Message handled");
                }
                Err(e) => {
                    tracing::error!(worker = %consumer, error = %e, "Error processing message, will retry");
                    sleep(self.poll_timeout).await;
                }
            }
        }

        tracing::info!(worker = %consumer, "Worker received shutdown signal");
    }

    /// Take one message, run the stage, and settle the message.
    ///
    /// The ack happens only after the handler's effects are durable. Transient
    /// failures hand the message back and surface as `Err`.
    pub async fn process_next(&self, consumer: &str) -> Result<Processed, HandleError> {
        let _slot = self.prefetch.acquire().await;

        let Some(delivery) = self
            .broker
            .consume(self.queue, consumer, self.poll_timeout)
            .await?
        else {
            return Ok(Processed::Idle);
        };

        let job = match Job::from_payload(delivery.payload.as_bytes()) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(queue = self.queue, worker = consumer, error = %e, "Discarding malformed message");
                self.broker.ack(&delivery).await?;
                return Ok(Processed::Discarded);
            }
        };
        let job_id = job.job_id.clone();
        let stage = self.handler.stage();

        tracing::info!(job_id = %job_id, stage, worker = consumer, "Processing job");
        let started = Instant::now();
        // A panicking handler fails its job, not the worker.
        let result = AssertUnwindSafe(self.handler.handle(job))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(StageError::Task("stage handler panicked".into()).into()));
        metrics::histogram!("stage_duration_seconds", "stage" => stage)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                if let Err(e) = self.broker.ack(&delivery).await {
                    self.requeue(&delivery, &job_id).await;
                    return Err(e.into());
                }
                Ok(Processed::Acked)
            }
            Err(e) if e.is_permanent() => {
                tracing::error!(job_id = %job_id, stage, error = %e, "Job failed");
                if let Err(settle_err) = self.fail(&delivery, &job_id).await {
                    tracing::warn!(job_id = %job_id, error = %settle_err, "Could not record failure, requeueing");
                    self.requeue(&delivery, &job_id).await;
                    return Err(settle_err);
                }
                Ok(Processed::Failed)
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, stage, error = %e, "Transient failure, requeueing");
                self.requeue(&delivery, &job_id).await;
                Err(e)
            }
        }
    }

    /// Hand an unsettled message back to the queue for another worker.
    async fn requeue(&self, delivery: &Delivery, job_id: &str) {
        if let Err(e) = self.broker.requeue(delivery).await {
            // Still in the consumer's in-flight list; recovered on restart.
            tracing::error!(job_id = %job_id, error = %e, "Requeue failed");
        }
    }

    async fn fail(&self, delivery: &Delivery, job_id: &str) -> Result<(), HandleError> {
        if self.store.set_status(job_id, JobStatus::Failed).await? {
            metrics::counter!("jobs_failed_total").increment(1);
        }
        self.broker.ack(delivery).await?;
        Ok(())
    }
}
