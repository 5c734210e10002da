//! Scheduler trigger: one `tick` decides whether to generate and runs the
//! pipeline synchronously; `run_forever` repeats it on an interval.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use postforge_shared::Result;

use crate::pipeline::{Pipeline, RunRequest};

/// What one tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickOutcome {
    /// Posts successfully generated.
    pub generated: u32,
    pub message: String,
    /// Job runs started by this tick, in order.
    pub job_run_ids: Vec<String>,
    /// Stale job runs failed before deciding.
    pub reaped: Vec<String>,
}

impl TickOutcome {
    fn skipped(message: impl Into<String>, reaped: Vec<String>) -> Self {
        Self {
            message: message.into(),
            reaped,
            ..Default::default()
        }
    }
}

pub struct Scheduler {
    pipeline: Pipeline,
}

impl Scheduler {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Reap stale jobs, then generate up to `posts_per_run` posts unless the
    /// schedule is off, a run is in progress, or no keyword is pending.
    ///
    /// Stops at the first failed run, keeping the partial outcome.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<TickOutcome> {
        let jobs = self.pipeline.jobs();
        let storage = self.pipeline.storage();
        let settings = self.pipeline.settings();

        let reaped = jobs.reap_stale(settings.stale_job_ttl).await?;

        let schedule = storage.get_schedule_config().await?;
        if !schedule.enabled {
            return Ok(TickOutcome::skipped("scheduler is disabled", reaped));
        }

        if let Some(running) = jobs.find_running(&settings.job_type).await? {
            info!(job_id = %running.id, "tick skipped, job already running");
            return Ok(TickOutcome::skipped(
                format!("job {} is already running", running.id),
                reaped,
            ));
        }

        let pending = storage.count_pending_keywords().await?;
        if pending == 0 {
            return Ok(TickOutcome::skipped("no pending keywords", reaped));
        }

        let planned = u64::from(schedule.posts_per_run).min(pending) as u32;
        let mut outcome = TickOutcome {
            reaped,
            ..Default::default()
        };
        let mut stopped = None;

        for _ in 0..planned {
            let result = match self.pipeline.run(RunRequest::default()).await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "pipeline run could not be recorded");
                    stopped = Some(e.to_string());
                    break;
                }
            };
            outcome.job_run_ids.push(result.job_run_id.clone());
            if !result.success {
                stopped = Some(result.errors.join("; "));
                break;
            }
            outcome.generated += 1;
        }

        outcome.message = match stopped {
            Some(reason) => format!(
                "generated {} of {planned} post(s); stopped: {reason}",
                outcome.generated
            ),
            None => format!("generated {} post(s)", outcome.generated),
        };
        info!(
            generated = outcome.generated,
            planned,
            reaped = outcome.reaped.len(),
            "scheduler tick finished"
        );
        Ok(outcome)
    }

    /// Tick every `interval` until `shutdown` resolves. Tick errors are
    /// logged and the loop continues.
    pub async fn run_forever<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(outcome) => info!(generated = outcome.generated, message = %outcome.message, "tick"),
                        Err(e) => error!(error = %e, "scheduler tick failed"),
                    }
                }
            }
        }
    }
}
