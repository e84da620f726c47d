use crate::domain::entities::job::Job;
use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::priority::PriorityThreshold;
use crate::domain::value_objects::timestamps::Timestamp;
use std::cmp::Ordering;

/// Sort key of a job plus, once the job is locked and fetched, its full row.
///
/// Ordering and equality only look at `(priority, run_at, id)`; the attached
/// row never influences placement.
#[derive(Debug, Clone)]
pub struct Metajob {
    pub priority: i16,
    pub run_at: Timestamp,
    pub id: JobId,
    pub queue: String,
    job: Option<Job>,
}

impl Metajob {
    pub fn new(priority: i16, run_at: Timestamp, id: JobId, queue: impl Into<String>) -> Self {
        Self {
            priority,
            run_at,
            id,
            queue: queue.into(),
            job: None,
        }
    }

    /// Build a metajob from a full row, keeping the row attached.
    pub fn from_job(job: Job) -> Self {
        Self {
            priority: job.priority,
            run_at: job.run_at,
            id: job.id,
            queue: job.queue.clone(),
            job: Some(job),
        }
    }

    pub fn sort_key(&self) -> (i16, Timestamp, JobId) {
        (self.priority, self.run_at, self.id)
    }

    pub fn priority_sufficient(&self, threshold: PriorityThreshold) -> bool {
        threshold.accepts(self.priority)
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    pub fn set_job(&mut self, job: Job) {
        self.job = Some(job);
    }

    pub fn into_job(self) -> Option<Job> {
        self.job
    }
}

impl PartialEq for Metajob {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Metajob {}

impl Ord for Metajob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Metajob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn at(seconds: i64) -> Timestamp {
        Timestamp::from(time::OffsetDateTime::UNIX_EPOCH + Duration::seconds(seconds))
    }

    #[test]
    fn given_metajobs_when_sorted_should_order_by_priority_then_run_at_then_id() {
        let mut jobs = vec![
            Metajob::new(10, at(5), JobId(3), "default"),
            Metajob::new(10, at(5), JobId(1), "default"),
            Metajob::new(5, at(100), JobId(9), "default"),
            Metajob::new(10, at(1), JobId(7), "default"),
        ];
        jobs.sort();

        let ids: Vec<i64> = jobs.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![9, 7, 1, 3]);
    }

    #[test]
    fn given_attached_row_when_compared_should_ignore_payload() {
        let bare = Metajob::new(1, at(0), JobId(1), "default");
        let full = Metajob::from_job(Job::new(JobId(1), "other", 1, at(0), "Anything"));
        assert_eq!(bare, full);
        assert!(bare.job().is_none());
        assert!(full.job().is_some());
    }

    #[test]
    fn given_threshold_when_checking_priority_should_delegate_to_threshold() {
        let job = Metajob::new(40, at(0), JobId(1), "default");
        assert!(job.priority_sufficient(PriorityThreshold::Any));
        assert!(job.priority_sufficient(PriorityThreshold::AtMost(40)));
        assert!(!job.priority_sufficient(PriorityThreshold::AtMost(30)));
    }

    #[test]
    fn given_bare_metajob_when_job_set_should_expose_row() {
        let mut job = Metajob::new(1, at(0), JobId(8), "default");
        job.set_job(Job::new(JobId(8), "default", 1, at(0), "Report"));
        assert_eq!(job.into_job().map(|j| j.job_class), Some("Report".to_string()));
    }
}
