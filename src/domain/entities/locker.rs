use crate::domain::entities::job::JOB_SCHEMA_VERSION;
use crate::domain::value_objects::priority::PriorityThreshold;

/// Registration row a running locker keeps in the `lockers` table.
///
/// The backend pid is not part of the value: the store fills it in from the
/// session that inserts the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerRegistration {
    pub worker_count: i32,
    pub worker_priorities: Vec<PriorityThreshold>,
    pub process_id: i32,
    pub hostname: String,
    pub listening: bool,
    pub queues: Vec<String>,
    pub job_schema_version: i32,
}

impl LockerRegistration {
    /// Describe the current process running workers at `worker_priorities`.
    pub fn for_current_process(
        worker_priorities: &[PriorityThreshold],
        queues: &[String],
        listening: bool,
    ) -> Self {
        Self {
            worker_count: worker_priorities.len() as i32,
            worker_priorities: worker_priorities.to_vec(),
            process_id: std::process::id() as i32,
            hostname: hostname(),
            listening,
            queues: queues.to_vec(),
            job_schema_version: JOB_SCHEMA_VERSION,
        }
    }
}

/// Get the system hostname, or "unknown" if it can't be determined.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".into())
}
