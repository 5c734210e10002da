//! Background execution: a bounded queue drained by one supervised task.
//!
//! [`PipelineWorker::submit`] creates the job run and returns as soon as it
//! is queued. The worker runs queued jobs one at a time, each in its own
//! task, so a panicking run is caught and its job run failed instead of
//! taking the worker down.

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use postforge_shared::{PostForgeError, Result};

use crate::pipeline::{Pipeline, PipelineResult, RunRequest, SilentProgress};

struct QueuedRun {
    job_id: String,
    request: RunRequest,
}

/// Handle for submitting background runs.
pub struct PipelineWorker {
    pipeline: Pipeline,
    sender: mpsc::Sender<QueuedRun>,
    handle: JoinHandle<()>,
}

impl PipelineWorker {
    /// Start the worker task. `capacity` bounds the queue; `submit` waits
    /// when it is full.
    pub fn spawn(pipeline: Pipeline, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(supervise(pipeline.clone(), receiver));
        Self {
            pipeline,
            sender,
            handle,
        }
    }

    /// Create a pending job run and queue it.
    ///
    /// Returns `success: true` with the job id once queued; the outcome is
    /// recorded on the job run.
    pub async fn submit(&self, mut request: RunRequest) -> Result<PipelineResult> {
        let jobs = self.pipeline.jobs();
        let job = jobs
            .create(
                &self.pipeline.settings().job_type,
                request.keyword_id.as_deref(),
                request.topic_id.as_deref(),
            )
            .await?;
        jobs.append_log(&job.id, "queued for background run").await?;

        request.job_id = Some(job.id.clone());
        let queued = QueuedRun {
            job_id: job.id.clone(),
            request,
        };
        if self.sender.send(queued).await.is_err() {
            let message = "background worker is not running";
            jobs.fail(&job.id, message).await?;
            return Err(PostForgeError::validation(message));
        }

        info!(job_id = %job.id, "background run queued");
        Ok(PipelineResult::accepted(job.id))
    }

    /// Stop accepting work and wait for queued runs to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            error!(error = %e, "pipeline worker task ended abnormally");
        }
    }
}

async fn supervise(pipeline: Pipeline, mut receiver: mpsc::Receiver<QueuedRun>) {
    while let Some(queued) = receiver.recv().await {
        let job_id = queued.job_id.clone();
        let run = pipeline.clone();
        let task = tokio::spawn(async move {
            run.execute(&queued.job_id, &queued.request, &SilentProgress)
                .await
        });

        match task.await {
            Ok(Ok(result)) => {
                info!(job_id, success = result.success, "background run finished");
            }
            Ok(Err(e)) => record_failure(&pipeline, &job_id, &e.to_string()).await,
            Err(join_error) => {
                let message = format!("run aborted: {}", describe(join_error));
                record_failure(&pipeline, &job_id, &message).await;
            }
        }
    }
    info!("pipeline worker stopped");
}

/// Fail the job if the run could not record its own outcome.
async fn record_failure(pipeline: &Pipeline, job_id: &str, message: &str) {
    warn!(job_id, error = message, "background run did not finish cleanly");
    if let Err(e) = pipeline.jobs().fail(job_id, message).await {
        error!(job_id, error = %e, "could not mark background run failed");
    }
}

fn describe(join_error: JoinError) -> String {
    if join_error.is_cancelled() {
        return "cancelled".to_string();
    }
    let payload = join_error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
