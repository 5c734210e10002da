//! Durable job run lifecycle: `pending → running → {completed | failed}`.
//!
//! Every transition is a conditional update in the store. When it does not
//! apply, the tracker reads the row back and reports
//! [`PostForgeError::InvalidTransition`] (or `NotFound`), so a terminal row
//! is never rewritten.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use postforge_shared::{
    JobLogLine, JobRun, JobStatus, PostForgeError, Result, TokenUsage, new_id,
};
use postforge_storage::Storage;
use tracing::{error, info, warn};

/// What a successful run produced.
#[derive(Debug, Clone, Default)]
pub struct JobCompletion {
    pub post_id: Option<String>,
    pub token_usage: TokenUsage,
    pub image_generated: bool,
}

/// Creates, advances, and reads job runs.
#[derive(Clone)]
pub struct JobTracker {
    storage: Arc<Storage>,
}

impl JobTracker {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Create a `pending` job run.
    pub async fn create(
        &self,
        job_type: &str,
        keyword_id: Option<&str>,
        topic_id: Option<&str>,
    ) -> Result<JobRun> {
        let job = JobRun {
            id: new_id(),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            keyword_id: keyword_id.map(String::from),
            topic_id: topic_id.map(String::from),
            post_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
            token_usage: TokenUsage::default(),
            image_generated: false,
        };
        self.storage.insert_job_run(&job).await?;
        info!(job_id = %job.id, job_type, "job run created");
        Ok(job)
    }

    /// `pending → running`.
    pub async fn mark_running(&self, id: &str) -> Result<JobRun> {
        let now = Utc::now();
        if !self.storage.mark_job_running(id, &now).await? {
            return Err(self.rejected(id, JobStatus::Running).await);
        }
        info!(job_id = id, "job run started");
        self.get(id).await
    }

    /// Append a progress line. Rejected once the run is terminal.
    pub async fn append_log(&self, id: &str, line: &str) -> Result<()> {
        if self.storage.append_job_log(id, line, &Utc::now()).await? {
            info!(job_id = id, "{line}");
            return Ok(());
        }

        let job = self.get(id).await?;
        Err(PostForgeError::validation(format!(
            "job {id} is {}; its log is closed",
            job.status
        )))
    }

    /// `running → completed`.
    pub async fn complete(&self, id: &str, completion: JobCompletion) -> Result<JobRun> {
        let job = self.get(id).await?;
        let finished_at = Utc::now();
        let duration_ms = elapsed_ms(&job, &finished_at);

        let applied = self
            .storage
            .complete_job_run(
                id,
                completion.post_id.as_deref(),
                &completion.token_usage,
                completion.image_generated,
                &finished_at,
                duration_ms,
            )
            .await?;
        if !applied {
            return Err(self.rejected(id, JobStatus::Completed).await);
        }

        info!(
            job_id = id,
            duration_ms,
            post_id = completion.post_id.as_deref().unwrap_or(""),
            total_tokens = completion.token_usage.total(),
            "job run completed"
        );
        self.get(id).await
    }

    /// `pending | running → failed`.
    pub async fn fail(&self, id: &str, message: &str) -> Result<JobRun> {
        self.fail_with_usage(id, message, TokenUsage::default()).await
    }

    /// Like [`fail`](Self::fail), recording tokens spent before the failure.
    pub async fn fail_with_usage(
        &self,
        id: &str,
        message: &str,
        token_usage: TokenUsage,
    ) -> Result<JobRun> {
        let job = self.get(id).await?;
        let finished_at = Utc::now();
        let duration_ms = elapsed_ms(&job, &finished_at);

        let applied = self
            .storage
            .fail_job_run(id, message, &token_usage, &finished_at, duration_ms)
            .await?;
        if !applied {
            return Err(self.rejected(id, JobStatus::Failed).await);
        }

        warn!(job_id = id, duration_ms, error = message, "job run failed");
        self.get(id).await
    }

    /// Record keyword/topic resolved while running. `None` keeps the current value.
    pub async fn link(
        &self,
        id: &str,
        keyword_id: Option<&str>,
        topic_id: Option<&str>,
    ) -> Result<()> {
        if self.storage.link_job_run(id, keyword_id, topic_id).await? {
            return Ok(());
        }
        let job = self.get(id).await?;
        Err(PostForgeError::validation(format!(
            "job {id} is {}; only running jobs can be linked",
            job.status
        )))
    }

    /// The running job of `job_type`, if any. This is the single-flight guard.
    pub async fn find_running(&self, job_type: &str) -> Result<Option<JobRun>> {
        self.storage.find_running_job(job_type).await
    }

    pub async fn get(&self, id: &str) -> Result<JobRun> {
        self.storage
            .get_job_run(id)
            .await?
            .ok_or_else(|| PostForgeError::not_found("job run", id))
    }

    pub async fn logs(&self, id: &str) -> Result<Vec<JobLogLine>> {
        // Distinguish "no lines yet" from "no such job".
        self.get(id).await?;
        self.storage.list_job_logs(id).await
    }

    pub async fn list_recent(&self, limit: u32) -> Result<Vec<JobRun>> {
        self.storage.list_job_runs(limit).await
    }

    /// Fail every non-terminal job that has not moved for longer than `ttl`.
    ///
    /// Returns the ids actually reaped.
    pub async fn reap_stale(&self, ttl: Duration) -> Result<Vec<String>> {
        let ttl_chrono = chrono::Duration::from_std(ttl)
            .map_err(|e| PostForgeError::validation(format!("invalid stale-job ttl: {e}")))?;
        let cutoff = Utc::now() - ttl_chrono;

        let mut reaped = Vec::new();
        for job in self.storage.list_stale_jobs(&cutoff).await? {
            let message = format!(
                "reaped: {} for longer than {}s",
                job.status,
                ttl.as_secs()
            );
            match self.fail_with_usage(&job.id, &message, job.token_usage).await {
                Ok(_) => {
                    warn!(job_id = %job.id, status = %job.status, "stale job reaped");
                    reaped.push(job.id);
                }
                // Finished between the listing and the update.
                Err(PostForgeError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    /// Build the error for a conditional update that did not apply.
    async fn rejected(&self, id: &str, to: JobStatus) -> PostForgeError {
        match self.get(id).await {
            Ok(job) => {
                error!(job_id = id, from = %job.status, to = %to, "invalid job run transition");
                PostForgeError::InvalidTransition {
                    job_id: id.to_string(),
                    from: job.status.to_string(),
                    to: to.to_string(),
                }
            }
            Err(e) => e,
        }
    }
}

/// Milliseconds since the run started (or was created, if it never started).
fn elapsed_ms(job: &JobRun, finished_at: &DateTime<Utc>) -> i64 {
    let start = job.started_at.unwrap_or(job.created_at);
    (*finished_at - start).num_milliseconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_storage;
    use postforge_shared::FULL_GENERATION_JOB;

    async fn tracker() -> JobTracker {
        JobTracker::new(test_storage().await)
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let jobs = tracker().await;
        let job = jobs.create(FULL_GENERATION_JOB, None, None).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let running = jobs.mark_running(&job.id).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        jobs.append_log(&job.id, "resolving keyword").await.unwrap();
        jobs.link(&job.id, Some("kw-1"), Some("tp-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let done = jobs
            .complete(
                &job.id,
                JobCompletion {
                    post_id: Some("post-1".into()),
                    token_usage: TokenUsage {
                        prompt_tokens: 3,
                        completion_tokens: 4,
                    },
                    image_generated: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.keyword_id.as_deref(), Some("kw-1"));
        assert_eq!(done.post_id.as_deref(), Some("post-1"));
        assert!(done.duration_ms.unwrap() > 0);
        assert!(done.finished_at.is_some());
        assert_eq!(jobs.logs(&job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_jobs_reject_further_changes() {
        let jobs = tracker().await;
        let job = jobs.create(FULL_GENERATION_JOB, None, None).await.unwrap();
        jobs.fail(&job.id, "no keyword").await.unwrap();

        let err = jobs.mark_running(&job.id).await.unwrap_err();
        assert!(matches!(
            err,
            PostForgeError::InvalidTransition { ref from, ref to, .. }
                if from == "failed" && to == "running"
        ));
        assert!(jobs.append_log(&job.id, "late").await.is_err());
        assert!(jobs.fail(&job.id, "again").await.is_err());

        let stored = jobs.get(&job.id).await.unwrap();
        assert_eq!(stored.error.as_deref(), Some("no keyword"));
    }

    #[tokio::test]
    async fn complete_requires_running() {
        let jobs = tracker().await;
        let job = jobs.create(FULL_GENERATION_JOB, None, None).await.unwrap();
        let err = jobs
            .complete(&job.id, JobCompletion::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PostForgeError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let jobs = tracker().await;
        assert!(matches!(
            jobs.mark_running("missing").await.unwrap_err(),
            PostForgeError::NotFound { .. }
        ));
        assert!(matches!(
            jobs.logs("missing").await.unwrap_err(),
            PostForgeError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn find_running_is_scoped_by_type() {
        let jobs = tracker().await;
        let job = jobs.create(FULL_GENERATION_JOB, None, None).await.unwrap();
        jobs.mark_running(&job.id).await.unwrap();

        assert!(jobs.find_running(FULL_GENERATION_JOB).await.unwrap().is_some());
        assert!(jobs.find_running("image-refresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reap_stale_fails_only_old_jobs() {
        let storage = test_storage().await;
        let jobs = JobTracker::new(storage.clone());

        let old = jobs.create(FULL_GENERATION_JOB, None, None).await.unwrap();
        storage
            .mark_job_running(&old.id, &(Utc::now() - chrono::Duration::hours(1)))
            .await
            .unwrap();
        let fresh = jobs.create(FULL_GENERATION_JOB, None, None).await.unwrap();
        jobs.mark_running(&fresh.id).await.unwrap();

        let reaped = jobs.reap_stale(Duration::from_secs(30 * 60)).await.unwrap();
        assert_eq!(reaped, vec![old.id.clone()]);

        let old = jobs.get(&old.id).await.unwrap();
        assert_eq!(old.status, JobStatus::Failed);
        assert!(old.error.unwrap().starts_with("reaped"));
        assert!(old.duration_ms.unwrap() >= 3_600_000);
        assert_eq!(jobs.get(&fresh.id).await.unwrap().status, JobStatus::Running);
    }
}
