// Use case: run_worker_once.

use crate::application::buffer::result_queue::ResultQueue;
use crate::application::context::AppContext;
use crate::config::Worker;
use crate::domain::entities::job::Job;
use crate::domain::entities::metajob::Metajob;
use crate::domain::services::error_notifier::{ErrorReport, ErrorSource, notify_async};
use crate::domain::services::job_handler::{ErrorHandling, JobError, JobHandler, Resolution};
use crate::domain::value_objects::ids::JobId;
use crate::domain::workflows::retry_policy::RetryPolicy;
use crate::domain::workflows::state_machine::{ExecutionState, JobStateMachine};
use crate::infrastructure::db::stores::job_store::{FailureRecord, JobRepositoryError};
use metrics::{counter, histogram};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Configuration for worker execution and retries.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub retry_policy: RetryPolicy,
    /// Keep finished rows (stamping `finished_at`) instead of deleting them.
    pub retain_finished_jobs: bool,
    /// Attempts per resolution write before the outcome is fatal.
    pub store_retry_attempts: u32,
    pub store_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            retain_finished_jobs: true,
            store_retry_attempts: 5,
            store_retry_delay: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &Worker) -> Self {
        Self {
            retry_policy: RetryPolicy {
                maximum_retry_count: settings.maximum_retry_count,
                ..RetryPolicy::default()
            },
            retain_finished_jobs: settings.retain_finished_jobs,
            store_retry_attempts: settings.store_retry_attempts,
            store_retry_delay: Duration::from_millis(settings.store_retry_delay_ms),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retry_policy.maximum_retry_count < 0 {
            return Err("maximum_retry_count must not be negative".to_string());
        }
        if self.store_retry_attempts == 0 {
            return Err("store_retry_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Record of one job execution, emitted whatever happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub job_class: Option<String>,
    pub state: ExecutionState,
    /// Error count the row was left with.
    pub error_count: i32,
    pub duration: Duration,
}

#[derive(Debug)]
pub enum RunWorkerOnceError {
    Storage(JobRepositoryError),
}

/// Works one locked job to a terminal state and hands its id back for unlocking.
pub struct RunWorkerOnceUseCase;

impl RunWorkerOnceUseCase {
    /// Execute the job behind `metajob`. Never fails: every error becomes a
    /// persisted outcome plus an error report.
    #[instrument(skip(ctx, config, metajob, results), fields(job_id = metajob.id.0))]
    pub async fn execute(
        ctx: &AppContext,
        config: &WorkerConfig,
        metajob: Metajob,
        results: &ResultQueue,
    ) -> JobOutcome {
        let started = Instant::now();
        let job_id = metajob.id;

        // Step 1: Resolve the job row, fetching it when only the sort key arrived.
        let (state, error_count, job) = match Self::load(ctx, config, metajob).await {
            Ok(Some(job)) => {
                let (state, error_count) = Self::work(ctx, config, &job).await;
                (state, error_count, Some(job))
            }
            Ok(None) => {
                info!(job_id = job_id.0, "job_race_condition");
                (ExecutionState::Vanished, 0, None)
            }
            Err(RunWorkerOnceError::Storage(err)) => {
                report(
                    ctx,
                    ErrorReport::for_job(
                        ErrorSource::Worker,
                        format!("could not load job: {err}"),
                        job_id,
                    ),
                );
                (ExecutionState::Fatal, 0, None)
            }
        };

        // Step 2: Hand the lock back to the locker in every case.
        results.push(job_id);

        // Step 3: Emit execution metrics and logs.
        let duration = started.elapsed();
        counter!("jobs_worked_total", "outcome" => state.as_str()).increment(1);
        histogram!("job_duration_ms").record(duration.as_secs_f64() * 1000.0);
        info!(
            job_id = job_id.0,
            job_class = job.as_ref().map(|j| j.job_class.as_str()).unwrap_or(""),
            state = state.as_str(),
            error_count,
            duration_ms = duration.as_millis() as u64,
            "job_worked"
        );

        JobOutcome {
            job_id,
            job_class: job.map(|j| j.job_class),
            state,
            error_count,
            duration,
        }
    }

    async fn load(
        ctx: &AppContext,
        config: &WorkerConfig,
        metajob: Metajob,
    ) -> Result<Option<Job>, RunWorkerOnceError> {
        let job_id = metajob.id;
        if let Some(job) = metajob.into_job() {
            return Ok(Some(job));
        }
        with_store_retry(config, || ctx.repos.job.get_unfinished(job_id))
            .await
            .map_err(RunWorkerOnceError::Storage)
    }

    /// Run the job and persist its resolution. Returns the terminal state and
    /// the error count the row was left with.
    async fn work(ctx: &AppContext, config: &WorkerConfig, job: &Job) -> (ExecutionState, i32) {
        // Step 1: Dispatched -> running.
        let running = JobStateMachine::transition(ExecutionState::Dispatched, ExecutionState::Running)
            .unwrap_or(ExecutionState::Running);

        // Step 2: Resolve the handler; an unknown class is an ordinary failure.
        let handler = ctx.handlers.resolve(&job.job_class);

        // Step 3: Run the job logic in its own task so a panic stays contained.
        let result = match &handler {
            Ok(handler) => run_contained(handler.clone(), job.clone()).await,
            Err(err) => Err(err.clone()),
        };

        // Step 4: Turn the result into a resolution plus optional failure record.
        let (resolution, failure) = match result {
            Ok(Resolution::Unresolved) => {
                let fallback = handler
                    .as_ref()
                    .map(|h| h.default_resolution())
                    .unwrap_or(Resolution::Finish);
                (Self::settled(fallback), None)
            }
            Ok(resolution) => (resolution, None),
            Err(error) => {
                warn!(job_id = job.id.0, error = %error, "job_failed");
                let resolution = Self::handle_failure(ctx, config, job, handler.ok(), &error);
                let failure = FailureRecord {
                    message: error.stored_message(),
                    backtrace: error.stored_backtrace(),
                };
                (resolution, Some(failure))
            }
        };

        // Step 5: Persist the resolution.
        let target = match Self::resolve(ctx, config, job, resolution, failure.as_ref()).await {
            Ok(state) => state,
            Err(RunWorkerOnceError::Storage(err)) => {
                report(
                    ctx,
                    ErrorReport::for_job(
                        ErrorSource::Worker,
                        format!("could not resolve job as {resolution:?}: {err}"),
                        job.id,
                    ),
                );
                ExecutionState::Fatal
            }
        };

        let counted = failure.is_some()
            && matches!(target, ExecutionState::RetryScheduled | ExecutionState::Expired);
        let error_count = job.error_count + i32::from(counted);

        let state = JobStateMachine::transition(running, target).unwrap_or(ExecutionState::Fatal);
        (state, error_count)
    }

    fn settled(resolution: Resolution) -> Resolution {
        match resolution {
            Resolution::Unresolved => Resolution::Finish,
            other => other,
        }
    }

    /// Ask the handler what to do about a failure; fall back to the retry policy.
    fn handle_failure(
        ctx: &AppContext,
        config: &WorkerConfig,
        job: &Job,
        handler: Option<Arc<dyn JobHandler>>,
        error: &JobError,
    ) -> Resolution {
        let error_count = job.error_count.saturating_add(1);
        let policy = handler
            .as_ref()
            .map(|h| h.retry_policy(&config.retry_policy))
            .unwrap_or_else(|| config.retry_policy.clone());
        let default = ErrorHandling::from_policy(&policy, error_count);

        let handling = match handler {
            Some(handler) => match handler.handle_error(job, error, error_count, &policy) {
                Ok(handling) => handling,
                Err(handler_error) => {
                    report(
                        ctx,
                        ErrorReport::for_job(ErrorSource::Handler, handler_error.stored_message(), job.id),
                    );
                    default
                }
            },
            None => default,
        };

        if handling.notify {
            report(
                ctx,
                ErrorReport::for_job(ErrorSource::Job, error.stored_message(), job.id),
            );
        }

        match handling.resolution {
            Resolution::Unresolved => default.resolution,
            resolution => resolution,
        }
    }

    async fn resolve(
        ctx: &AppContext,
        config: &WorkerConfig,
        job: &Job,
        resolution: Resolution,
        failure: Option<&FailureRecord>,
    ) -> Result<ExecutionState, RunWorkerOnceError> {
        let repo = &ctx.repos.job;
        let id = job.id;
        let (state, written) = match Self::settled(resolution) {
            Resolution::Finish if config.retain_finished_jobs => (
                ExecutionState::Finished,
                with_store_retry(config, || repo.finish(id)).await,
            ),
            Resolution::Finish => (
                ExecutionState::Finished,
                with_store_retry(config, || repo.destroy(id)).await,
            ),
            Resolution::Destroy => (
                ExecutionState::Destroyed,
                with_store_retry(config, || repo.destroy(id)).await,
            ),
            Resolution::RetryIn(delay) => (
                ExecutionState::RetryScheduled,
                with_store_retry(config, || repo.retry_in(id, delay, failure)).await,
            ),
            Resolution::Expire | Resolution::Unresolved => (
                ExecutionState::Expired,
                with_store_retry(config, || repo.expire(id, failure)).await,
            ),
        };
        written.map_err(RunWorkerOnceError::Storage)?;
        Ok(state)
    }
}

/// Retry a store call on transient failures, pausing between attempts.
async fn with_store_retry<T, F, Fut>(config: &WorkerConfig, mut call: F) -> Result<T, JobRepositoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, JobRepositoryError>>,
{
    let attempts = config.store_retry_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(JobRepositoryError::NotFound) => return Err(JobRepositoryError::NotFound),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                warn!(attempt, error = %err, "job_store_retry");
                tokio::time::sleep(config.store_retry_delay).await;
                attempt += 1;
            }
        }
    }
}

async fn run_contained(handler: Arc<dyn JobHandler>, job: Job) -> Result<Resolution, JobError> {
    match tokio::spawn(async move { handler.run(&job).await }).await {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            Err(JobError::Panicked(panic_message(join_error.into_panic())))
        }
        Err(_) => Err(JobError::Panicked("job task was cancelled".to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

fn report(ctx: &AppContext, report: ErrorReport) {
    notify_async(&ctx.notifier, report);
}
