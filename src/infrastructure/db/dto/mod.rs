pub mod job;

pub use job::{JOB_COLUMNS, JobRow};
