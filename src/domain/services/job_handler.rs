use crate::domain::entities::job::Job;
use crate::domain::workflows::retry_policy::{RetryDecision, RetryPolicy};
use async_trait::async_trait;
use std::error::Error as StdError;
use time::Duration;

/// Longest error message persisted on a job row.
pub const ERROR_MESSAGE_LIMIT: usize = 500;
/// Longest backtrace persisted on a job row.
pub const ERROR_BACKTRACE_LIMIT: usize = 10_000;

/// How job logic (or its error handler) wants the job resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The job returned without choosing; the handler's default resolution applies.
    Unresolved,
    Finish,
    Destroy,
    RetryIn(Duration),
    Expire,
}

impl From<RetryDecision> for Resolution {
    fn from(decision: RetryDecision) -> Self {
        match decision {
            RetryDecision::RetryIn(delay) => Resolution::RetryIn(delay),
            RetryDecision::Expire => Resolution::Expire,
        }
    }
}

/// A failure raised by job logic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("{message}")]
    Failed {
        kind: String,
        message: String,
        trace: Option<String>,
    },
    #[error("no handler registered for job class {0:?}")]
    UnknownJobClass(String),
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        JobError::Failed {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Capture any error, recording its source chain in place of a backtrace.
    pub fn from_error(kind: impl Into<String>, error: &(dyn StdError + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        JobError::Failed {
            kind: kind.into(),
            message: error.to_string(),
            trace: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            JobError::Failed { kind, .. } => kind,
            JobError::UnknownJobClass(_) => "UnknownJobClass",
            JobError::Panicked(_) => "Panic",
        }
    }

    /// `Kind: message`, truncated for the `last_error_message` column.
    pub fn stored_message(&self) -> String {
        truncate(&format!("{}: {}", self.kind(), self), ERROR_MESSAGE_LIMIT)
    }

    /// Backtrace text truncated for the `last_error_backtrace` column.
    pub fn stored_backtrace(&self) -> Option<String> {
        match self {
            JobError::Failed {
                trace: Some(trace),
                ..
            } => Some(truncate(trace, ERROR_BACKTRACE_LIMIT)),
            _ => None,
        }
    }
}

fn truncate(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

/// Outcome of an error handler: how to resolve the job and whether to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorHandling {
    pub resolution: Resolution,
    pub notify: bool,
}

impl ErrorHandling {
    /// Default handling: back off per `policy`, expire once past the limit, report.
    pub fn from_policy(policy: &RetryPolicy, error_count: i32) -> Self {
        Self {
            resolution: policy.decide(error_count).into(),
            notify: true,
        }
    }
}

/// Logic for one `job_class`.
///
/// Only `run` is required; the remaining hooks carry the per-class overrides
/// of resolution and retry behaviour.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job) -> Result<Resolution, JobError>;

    /// Applied when `run` returns `Resolution::Unresolved`.
    fn default_resolution(&self) -> Resolution {
        Resolution::Finish
    }

    /// Class-level retry settings; `defaults` come from the worker configuration.
    fn retry_policy(&self, defaults: &RetryPolicy) -> RetryPolicy {
        defaults.clone()
    }

    /// Called after `run` failed for the `error_count`-th time.
    ///
    /// Returning `Unresolved` falls back to the policy decision; returning an
    /// error reports both errors and also falls back.
    fn handle_error(
        &self,
        _job: &Job,
        _error: &JobError,
        error_count: i32,
        policy: &RetryPolicy,
    ) -> Result<ErrorHandling, JobError> {
        Ok(ErrorHandling::from_policy(policy, error_count))
    }
}
