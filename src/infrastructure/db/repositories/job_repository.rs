use crate::domain::entities::job::Job;
use crate::domain::value_objects::ids::JobId;
use crate::infrastructure::db::stores::job_store::{FailureRecord, JobRepositoryError, JobStore};
use std::sync::Arc;
use time::Duration;

pub struct JobRepository<S: JobStore + ?Sized> {
    store: Arc<S>,
}

impl<S: JobStore + ?Sized> JobRepository<S> {
    /// Build a repository that uses the given store implementation.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fetch a job that is still neither finished nor expired.
    pub async fn get_unfinished(&self, job_id: JobId) -> Result<Option<Job>, JobRepositoryError> {
        let row = self.store.get_unfinished(job_id.0).await?;
        Ok(row.map(|dto| dto.into_job()))
    }

    pub async fn finish(&self, job_id: JobId) -> Result<(), JobRepositoryError> {
        self.store.finish(job_id.0).await
    }

    pub async fn destroy(&self, job_id: JobId) -> Result<(), JobRepositoryError> {
        self.store.destroy(job_id.0).await
    }

    /// Reschedule a job `delay` from now, recording `failure` when the retry
    /// follows an error.
    pub async fn retry_in(
        &self,
        job_id: JobId,
        delay: Duration,
        failure: Option<&FailureRecord>,
    ) -> Result<(), JobRepositoryError> {
        self.store.retry_in(job_id.0, delay, failure).await
    }

    pub async fn expire(
        &self,
        job_id: JobId,
        failure: Option<&FailureRecord>,
    ) -> Result<(), JobRepositoryError> {
        self.store.expire(job_id.0, failure).await
    }
}

#[cfg(test)]
mod tests {
    use super::JobRepository;
    use crate::domain::value_objects::ids::JobId;
    use crate::infrastructure::db::dto::JobRow;
    use crate::infrastructure::db::stores::job_store::{FailureRecord, JobRepositoryError, JobStore};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use time::{Duration, OffsetDateTime};

    #[derive(Default)]
    struct DummyStore {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobStore for DummyStore {
        async fn get_unfinished(&self, job_id: i64) -> Result<Option<JobRow>, JobRepositoryError> {
            if job_id != 1 {
                return Ok(None);
            }
            Ok(Some(JobRow {
                id: 1,
                queue: "default".to_string(),
                priority: 5,
                run_at: OffsetDateTime::now_utc(),
                job_class: "Noop".to_string(),
                args: serde_json::json!([]),
                kwargs: serde_json::json!({}),
                data: serde_json::json!({}),
                error_count: 0,
                last_error_message: None,
                last_error_backtrace: None,
                finished_at: None,
                expired_at: None,
                job_schema_version: 1,
            }))
        }

        async fn finish(&self, job_id: i64) -> Result<(), JobRepositoryError> {
            self.calls.lock().unwrap().push(format!("finish {job_id}"));
            Ok(())
        }

        async fn destroy(&self, _job_id: i64) -> Result<(), JobRepositoryError> {
            Err(JobRepositoryError::NotFound)
        }

        async fn retry_in(
            &self,
            job_id: i64,
            delay: Duration,
            failure: Option<&FailureRecord>,
        ) -> Result<(), JobRepositoryError> {
            self.calls.lock().unwrap().push(format!(
                "retry {job_id} {} {}",
                delay.whole_seconds(),
                failure.map(|f| f.message.as_str()).unwrap_or("-")
            ));
            Ok(())
        }

        async fn expire(
            &self,
            _job_id: i64,
            _failure: Option<&FailureRecord>,
        ) -> Result<(), JobRepositoryError> {
            Err(JobRepositoryError::StorageUnavailable)
        }
    }

    #[tokio::test]
    async fn given_stored_row_when_get_unfinished_should_map_to_job() {
        let repo = JobRepository::new(Arc::new(DummyStore::default()));

        let job = repo.get_unfinished(JobId(1)).await.unwrap().unwrap();

        assert_eq!(job.id, JobId(1));
        assert_eq!(job.job_class, "Noop");
        assert!(repo.get_unfinished(JobId(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn given_writes_when_called_should_forward_ids_and_failures() {
        let store = Arc::new(DummyStore::default());
        let repo = JobRepository::new(store.clone());
        let failure = FailureRecord {
            message: "Boom: no".to_string(),
            backtrace: None,
        };

        repo.finish(JobId(3)).await.unwrap();
        repo.retry_in(JobId(4), Duration::seconds(19), Some(&failure))
            .await
            .unwrap();

        assert_eq!(
            *store.calls.lock().unwrap(),
            vec!["finish 3".to_string(), "retry 4 19 Boom: no".to_string()]
        );
    }

    #[tokio::test]
    async fn given_store_error_when_writing_should_propagate_it() {
        let repo = JobRepository::new(Arc::new(DummyStore::default()));

        assert_eq!(repo.destroy(JobId(1)).await, Err(JobRepositoryError::NotFound));
        assert_eq!(
            repo.expire(JobId(1), None).await,
            Err(JobRepositoryError::StorageUnavailable)
        );
    }
}
