use crate::domain::entities::job::JOB_SCHEMA_VERSION;
use crate::domain::entities::locker::LockerRegistration;
use crate::domain::value_objects::ids::BackendPid;
use crate::infrastructure::db::database::DatabaseError;
use crate::infrastructure::db::dto::{JOB_COLUMNS, JobRow};
use crate::infrastructure::db::postgres::queries;
use crate::infrastructure::db::stores::locker_store::{LockerConnection, LockerStoreError};
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// A locker's dedicated session.
///
/// One `PgListener` carries both the LISTEN subscription and every query the
/// locker issues, so advisory locks and notifications share a backend pid.
pub struct LockerConnectionPostgres {
    listener: PgListener,
    backend_pid: BackendPid,
    channel: String,
    poll_sql: String,
    fetch_live_sql: String,
}

impl LockerConnectionPostgres {
    /// Open the session and install the `pg_temp` helpers used by polling.
    pub async fn connect(database_url: &str) -> Result<Self, LockerStoreError> {
        let mut listener = PgListener::connect(database_url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let pid = sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
            .fetch_one(&mut listener)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        for statement in [
            queries::CREATE_HIGHEST_REMAINING_PRIORITY,
            queries::CREATE_LOCK_AND_UPDATE_PRIORITIES,
        ] {
            sqlx::query(statement)
                .execute(&mut listener)
                .await
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
        }

        let backend_pid = BackendPid(pid);
        debug!(backend_pid = pid, "locker_connection_opened");

        Ok(Self {
            listener,
            backend_pid,
            channel: backend_pid.channel(),
            poll_sql: queries::poll_jobs(JOB_COLUMNS),
            fetch_live_sql: queries::fetch_live_jobs(JOB_COLUMNS),
        })
    }
}

/// Demand per ceiling in the jsonb shape the poll helpers read: `{"10": 2, ...}`.
pub(crate) fn priorities_json(priorities: &BTreeMap<i16, usize>) -> serde_json::Value {
    let map = priorities
        .iter()
        .map(|(ceiling, count)| (ceiling.to_string(), serde_json::Value::from(*count)))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

fn query_error(err: sqlx::Error) -> LockerStoreError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            LockerStoreError::ConnectionLost
        }
        _ => LockerStoreError::StorageUnavailable,
    }
}

#[async_trait]
impl LockerConnection for LockerConnectionPostgres {
    fn backend_pid(&self) -> BackendPid {
        self.backend_pid
    }

    async fn clean_lockers(&mut self) -> Result<u64, LockerStoreError> {
        let result = sqlx::query(queries::CLEAN_LOCKERS)
            .execute(&mut self.listener)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn register_locker(
        &mut self,
        registration: &LockerRegistration,
    ) -> Result<(), LockerStoreError> {
        let priorities: Vec<Option<i16>> = registration
            .worker_priorities
            .iter()
            .map(|threshold| threshold.as_option())
            .collect();

        sqlx::query(queries::REGISTER_LOCKER)
            .bind(registration.worker_count)
            .bind(priorities)
            .bind(registration.process_id)
            .bind(&registration.hostname)
            .bind(registration.listening)
            .bind(&registration.queues)
            .bind(registration.job_schema_version)
            .execute(&mut self.listener)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn unregister_locker(&mut self) -> Result<(), LockerStoreError> {
        sqlx::query(queries::UNREGISTER_LOCKER)
            .execute(&mut self.listener)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn listen(&mut self) -> Result<(), LockerStoreError> {
        self.listener
            .listen(&self.channel)
            .await
            .map_err(query_error)
    }

    async fn unlisten(&mut self) -> Result<(), LockerStoreError> {
        self.listener
            .unlisten(&self.channel)
            .await
            .map_err(query_error)?;
        while self.listener.next_buffered().is_some() {}
        Ok(())
    }

    async fn wait_for_notifications(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<String>, LockerStoreError> {
        let mut payloads = Vec::new();

        // Step 1: Wait for the first notification, if any arrives in time.
        match tokio::time::timeout(timeout, self.listener.try_recv()).await {
            Err(_) => return Ok(payloads),
            Ok(Ok(Some(notification))) => payloads.push(notification.payload().to_string()),
            Ok(Ok(None)) => return Err(LockerStoreError::ConnectionLost),
            Ok(Err(err)) => return Err(query_error(err)),
        }

        // Step 2: Drain what is already buffered without waiting again.
        while let Some(notification) = self.listener.next_buffered() {
            payloads.push(notification.payload().to_string());
        }

        Ok(payloads)
    }

    async fn poll_jobs(
        &mut self,
        queue: &str,
        excluded_ids: &[i64],
        priorities: &BTreeMap<i16, usize>,
    ) -> Result<Vec<JobRow>, LockerStoreError> {
        sqlx::query_as::<_, JobRow>(&self.poll_sql)
            .bind(queue)
            .bind(excluded_ids)
            .bind(priorities_json(priorities))
            .bind(JOB_SCHEMA_VERSION)
            .fetch_all(&mut self.listener)
            .await
            .map_err(query_error)
    }

    async fn try_advisory_lock(&mut self, job_id: i64) -> Result<bool, LockerStoreError> {
        sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(job_id)
            .fetch_one(&mut self.listener)
            .await
            .map_err(query_error)
    }

    async fn advisory_unlock(&mut self, job_id: i64) -> Result<bool, LockerStoreError> {
        sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(job_id)
            .fetch_one(&mut self.listener)
            .await
            .map_err(query_error)
    }

    async fn fetch_live_jobs(&mut self, job_ids: &[i64]) -> Result<Vec<JobRow>, LockerStoreError> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, JobRow>(&self.fetch_live_sql)
            .bind(job_ids)
            .fetch_all(&mut self.listener)
            .await
            .map_err(query_error)
    }

    async fn close(&mut self) -> Result<(), LockerStoreError> {
        self.listener.unlisten_all().await.map_err(query_error)?;
        sqlx::query("SELECT pg_advisory_unlock_all()")
            .execute(&mut self.listener)
            .await
            .map_err(query_error)?;
        debug!(backend_pid = self.backend_pid.0, "locker_connection_closed");
        Ok(())
    }
}
