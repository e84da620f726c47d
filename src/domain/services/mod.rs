pub mod error_notifier;
pub mod job_handler;
