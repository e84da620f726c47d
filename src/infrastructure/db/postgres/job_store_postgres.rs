use crate::infrastructure::db::dto::{JOB_COLUMNS, JobRow};
use crate::infrastructure::db::postgres::PostgresDatabase;
use crate::infrastructure::db::stores::job_store::{FailureRecord, JobRepositoryError, JobStore};
use async_trait::async_trait;
use sqlx::PgConnection;
use time::Duration;

#[derive(Clone)]
pub struct JobStorePostgres {
    db: std::sync::Arc<PostgresDatabase>,
}

impl JobStorePostgres {
    /// Build a Postgres-backed job store.
    pub fn new(db: std::sync::Arc<PostgresDatabase>) -> Self {
        Self { db }
    }

    async fn get_unfinished_impl_conn(
        conn: &mut PgConnection,
        job_id: i64,
    ) -> Result<Option<JobRow>, JobRepositoryError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE id = $1
              AND finished_at IS NULL
              AND expired_at IS NULL"
        ))
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|_| JobRepositoryError::StorageUnavailable)?;

        Ok(row)
    }

    async fn finish_impl_conn(conn: &mut PgConnection, job_id: i64) -> Result<(), JobRepositoryError> {
        let result = sqlx::query("UPDATE jobs SET finished_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&mut *conn)
            .await
            .map_err(|_| JobRepositoryError::StorageUnavailable)?;

        expect_one_row(result.rows_affected())
    }

    async fn destroy_impl_conn(conn: &mut PgConnection, job_id: i64) -> Result<(), JobRepositoryError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&mut *conn)
            .await
            .map_err(|_| JobRepositoryError::StorageUnavailable)?;

        expect_one_row(result.rows_affected())
    }

    async fn retry_in_impl_conn(
        conn: &mut PgConnection,
        job_id: i64,
        delay: Duration,
        failure: Option<FailureRecord>,
    ) -> Result<(), JobRepositoryError> {
        let seconds = delay.as_seconds_f64();
        let result = match failure {
            Some(failure) => {
                sqlx::query(
                    "UPDATE jobs SET
                        error_count = error_count + 1,
                        run_at = now() + $2::float8 * '1 second'::interval,
                        last_error_message = $3,
                        last_error_backtrace = $4
                    WHERE id = $1",
                )
                .bind(job_id)
                .bind(seconds)
                .bind(&failure.message)
                .bind(&failure.backtrace)
                .execute(&mut *conn)
                .await
            }
            None => {
                sqlx::query(
                    "UPDATE jobs SET
                        run_at = now() + $2::float8 * '1 second'::interval
                    WHERE id = $1",
                )
                .bind(job_id)
                .bind(seconds)
                .execute(&mut *conn)
                .await
            }
        }
        .map_err(|_| JobRepositoryError::StorageUnavailable)?;

        expect_one_row(result.rows_affected())
    }

    async fn expire_impl_conn(
        conn: &mut PgConnection,
        job_id: i64,
        failure: Option<FailureRecord>,
    ) -> Result<(), JobRepositoryError> {
        let result = match failure {
            Some(failure) => {
                sqlx::query(
                    "UPDATE jobs SET
                        error_count = error_count + 1,
                        expired_at = now(),
                        last_error_message = $2,
                        last_error_backtrace = $3
                    WHERE id = $1",
                )
                .bind(job_id)
                .bind(&failure.message)
                .bind(&failure.backtrace)
                .execute(&mut *conn)
                .await
            }
            None => {
                sqlx::query("UPDATE jobs SET expired_at = now() WHERE id = $1")
                    .bind(job_id)
                    .execute(&mut *conn)
                    .await
            }
        }
        .map_err(|_| JobRepositoryError::StorageUnavailable)?;

        expect_one_row(result.rows_affected())
    }
}

fn expect_one_row(rows_affected: u64) -> Result<(), JobRepositoryError> {
    if rows_affected == 0 {
        return Err(JobRepositoryError::NotFound);
    }
    Ok(())
}

#[async_trait]
impl JobStore for JobStorePostgres {
    async fn get_unfinished(&self, job_id: i64) -> Result<Option<JobRow>, JobRepositoryError> {
        self.db
            .with_conn(move |conn| Box::pin(Self::get_unfinished_impl_conn(conn, job_id)))
            .await
    }

    async fn finish(&self, job_id: i64) -> Result<(), JobRepositoryError> {
        self.db
            .with_conn(move |conn| Box::pin(Self::finish_impl_conn(conn, job_id)))
            .await
    }

    async fn destroy(&self, job_id: i64) -> Result<(), JobRepositoryError> {
        self.db
            .with_conn(move |conn| Box::pin(Self::destroy_impl_conn(conn, job_id)))
            .await
    }

    async fn retry_in(
        &self,
        job_id: i64,
        delay: Duration,
        failure: Option<&FailureRecord>,
    ) -> Result<(), JobRepositoryError> {
        let failure = failure.cloned();
        self.db
            .with_conn(move |conn| Box::pin(Self::retry_in_impl_conn(conn, job_id, delay, failure)))
            .await
    }

    async fn expire(
        &self,
        job_id: i64,
        failure: Option<&FailureRecord>,
    ) -> Result<(), JobRepositoryError> {
        let failure = failure.cloned();
        self.db
            .with_conn(move |conn| Box::pin(Self::expire_impl_conn(conn, job_id, failure)))
            .await
    }
}
