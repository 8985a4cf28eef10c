use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::automation::{AutomationError, AutomationResult, SessionConnector, SiteSession};
use crate::config::{QueueSection, TimeoutsSection};
use crate::jobs::{JobRecord, JobStore, JobStoreError};

use super::base::{WorkerContext, WorkerLifecycle};
use super::events::WorkerEvent;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Automation(#[from] AutomationError),
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Restrict the run to these job ids (still pending-only). None means
    /// the whole pending queue.
    pub job_ids: Option<Vec<i64>>,
    /// Zero means unlimited.
    pub max_jobs_per_run: usize,
    pub delay_between_jobs: Duration,
    pub login_wait: Duration,
    pub completion_wait: Duration,
}

impl UploadOptions {
    pub fn from_config(timeouts: &TimeoutsSection, queue: &QueueSection) -> Self {
        Self {
            job_ids: None,
            max_jobs_per_run: queue.max_jobs_per_run,
            delay_between_jobs: Duration::from_secs(queue.delay_between_jobs_s),
            login_wait: timeouts.login_wait(),
            completion_wait: timeouts.generation_poll(),
        }
    }

    pub fn with_job_ids(mut self, ids: Vec<i64>) -> Self {
        self.job_ids = Some(ids);
        self
    }
}

/// Sequences pending jobs through a site session, one at a time, with
/// per-job error isolation. Stop requests are honoured between jobs and at
/// the driver's own checkpoints during a job; a job already in flight is
/// never abandoned silently.
pub struct UploadWorker<C: SessionConnector> {
    store: JobStore,
    connector: C,
    options: UploadOptions,
}

impl<C: SessionConnector> UploadWorker<C> {
    pub fn new(store: JobStore, connector: C, options: UploadOptions) -> Self {
        Self {
            store,
            connector,
            options,
        }
    }
}

#[async_trait]
impl<C> WorkerLifecycle for UploadWorker<C>
where
    C: SessionConnector,
{
    type Resource = C::Session;
    type Error = UploadError;

    async fn acquire(&mut self, ctx: &WorkerContext) -> Result<Self::Resource, UploadError> {
        ctx.events.progress("Starting browser session...");
        Ok(self.connector.connect().await?)
    }

    async fn execute(
        &mut self,
        session: &mut Self::Resource,
        ctx: &WorkerContext,
    ) -> Result<(), UploadError> {
        let mut jobs = match &self.options.job_ids {
            Some(ids) => self.store.fetch_pending_in(ids)?,
            None => self.store.fetch_pending(None)?,
        };
        if self.options.max_jobs_per_run > 0 {
            jobs.truncate(self.options.max_jobs_per_run);
        }

        if jobs.is_empty() {
            ctx.events.progress("No pending jobs to process");
            return Ok(());
        }
        let total = jobs.len();
        ctx.events
            .progress(format!("Starting queue: {total} job(s) to process"));

        if !session.is_authenticated().await? {
            ctx.events.send(WorkerEvent::LoginRequired(
                "Please sign in to the site in the browser window. \
                 The queue will continue automatically once you are logged in."
                    .to_string(),
            ));
            session.begin_login().await?;
            session
                .await_login(self.options.login_wait, &ctx.stop)
                .await?;
        }
        ctx.events.progress("Session authenticated");

        for (index, job) in jobs.iter().enumerate() {
            if ctx.stop.is_requested() {
                ctx.events.progress("Stopped by user");
                break;
            }

            ctx.events.send(WorkerEvent::JobStarted {
                id: job.id,
                title: job.title.clone(),
            });
            ctx.events.progress(format!(
                "Submitting '{}' ({}/{})",
                job.title,
                index + 1,
                total
            ));
            // Persist the claim before touching the browser, so a crash
            // mid-job leaves visible partial state instead of silent loss.
            self.store.mark_in_progress(job.id)?;

            match process_job(session, job, &self.options, ctx).await {
                Ok(artifact) => {
                    self.store
                        .mark_succeeded(job.id, &artifact.to_string_lossy())?;
                    ctx.events.send(WorkerEvent::JobSucceeded {
                        id: job.id,
                        artifact: Some(artifact),
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    self.store.mark_failed(job.id, &message)?;
                    ctx.events.send(WorkerEvent::JobFailed {
                        id: job.id,
                        message: message.clone(),
                    });
                    warn!(job_id = job.id, error = %message, "job failed");
                    if matches!(err, AutomationError::Cancelled(_)) {
                        // The stop flag is set; the loop head would break
                        // anyway. Keep the exit quiet, it is not a fault.
                        break;
                    }
                    if err.aborts_run() {
                        return Err(err.into());
                    }
                }
            }

            if index + 1 < total
                && !ctx.stop.is_requested()
                && !self.options.delay_between_jobs.is_zero()
            {
                ctx.events.progress(format!(
                    "Waiting {}s before next job...",
                    self.options.delay_between_jobs.as_secs()
                ));
                ctx.stop.pause(self.options.delay_between_jobs).await;
            }
        }

        ctx.events.progress("Queue processing complete");
        Ok(())
    }

    async fn release(&mut self, mut session: Self::Resource, _ctx: &WorkerContext) {
        session.close().await;
    }
}

async fn process_job<S: SiteSession>(
    session: &mut S,
    job: &JobRecord,
    options: &UploadOptions,
    ctx: &WorkerContext,
) -> AutomationResult<PathBuf> {
    let ticket = session.submit(job).await?;
    ctx.events.progress(format!(
        "'{}' submitted, waiting for generation to finish",
        job.title
    ));
    session
        .await_completion(&ticket, options.completion_wait, &ctx.stop)
        .await?;
    session.collect_artifact(&ticket, job).await
}
