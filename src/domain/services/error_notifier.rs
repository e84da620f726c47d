use crate::domain::value_objects::ids::JobId;
use std::sync::Arc;
use tracing::error;

/// Which part of the system produced a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Job,
    Handler,
    Listener,
    Worker,
    Locker,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::Job => "job",
            ErrorSource::Handler => "handler",
            ErrorSource::Listener => "listener",
            ErrorSource::Worker => "worker",
            ErrorSource::Locker => "locker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub source: ErrorSource,
    pub message: String,
    pub job_id: Option<JobId>,
}

impl ErrorReport {
    pub fn new(source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            job_id: None,
        }
    }

    pub fn for_job(source: ErrorSource, message: impl Into<String>, job_id: JobId) -> Self {
        Self {
            source,
            message: message.into(),
            job_id: Some(job_id),
        }
    }
}

/// Side channel for errors that are recovered from but should reach a human.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, report: &ErrorReport);
}

/// Default notifier: one structured `error!` event per report.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorNotifier;

impl ErrorNotifier for TracingErrorNotifier {
    fn notify(&self, report: &ErrorReport) {
        error!(
            source = report.source.as_str(),
            job_id = report.job_id.map(|id| id.0),
            message = %report.message,
            "error_reported"
        );
    }
}

/// Deliver a report on a short-lived thread so the caller's loop never waits on
/// the notifier.
pub fn notify_async(notifier: &Arc<dyn ErrorNotifier>, report: ErrorReport) {
    let background = notifier.clone();
    let pending = report.clone();
    let spawned = std::thread::Builder::new()
        .name("forge-lock-notifier".to_string())
        .spawn(move || background.notify(&pending));

    if spawned.is_err() {
        notifier.notify(&report);
    }
}
