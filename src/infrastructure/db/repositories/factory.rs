use std::sync::Arc;

use crate::infrastructure::db::postgres::PostgresDatabase;
use crate::infrastructure::db::postgres::job_store_postgres::JobStorePostgres;
use crate::infrastructure::db::repositories::job_repository::JobRepository;
use crate::infrastructure::db::stores::job_store::JobStore;

#[derive(Clone)]
pub struct Repositories {
    pub job: Arc<JobRepository<dyn JobStore>>,
}

impl Repositories {
    /// Build repositories over any job store implementation.
    pub fn new(job_store: Arc<dyn JobStore>) -> Self {
        Self {
            job: Arc::new(JobRepository::new(job_store)),
        }
    }

    /// Build all repositories backed by Postgres stores.
    pub fn postgres(db: Arc<PostgresDatabase>) -> Self {
        Self::new(Arc::new(JobStorePostgres::new(db)))
    }
}
