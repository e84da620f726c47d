use crate::config::Db;
use crate::infrastructure::db::database::{Database, DatabaseError};
use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl PostgresConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Db> for PostgresConfig {
    fn from(db: &Db) -> Self {
        Self {
            database_url: db.url.clone(),
            max_connections: db.max_connections,
            ..Self::default()
        }
    }
}

/// Connection pool used by workers for their resolution writes.
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn with_conn<T, E, F>(&self, f: F) -> Result<T, E>
    where
        for<'c> F: FnOnce(
            &'c mut sqlx::PgConnection,
        ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>,
        E: From<DatabaseError>,
    {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        f(&mut conn).await
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn execute(&self, query: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::{PostgresConfig, PostgresDatabase};
    use crate::config::Db;
    use crate::infrastructure::db::database::{Database, DatabaseError};

    fn test_config() -> Option<PostgresConfig> {
        std::env::var("DATABASE_URL").ok().map(PostgresConfig::new)
    }

    #[test]
    fn given_url_when_config_built_should_keep_pool_defaults() {
        let config = PostgresConfig::new("postgres://localhost/forge_lock");

        assert_eq!(config.database_url, "postgres://localhost/forge_lock");
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn given_db_settings_when_converted_should_use_url_and_pool_size() {
        let db = Db {
            url: "postgres://app@db:5432/jobs".to_string(),
            max_connections: 3,
        };

        let config = PostgresConfig::from(&db);

        assert_eq!(config.database_url, "postgres://app@db:5432/jobs");
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.connect_timeout, std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn given_unreachable_database_when_connect_should_return_connection_error() {
        let mut config = PostgresConfig::new("postgres://nobody@127.0.0.1:1/none");
        config.connect_timeout = std::time::Duration::from_millis(200);

        let result = PostgresDatabase::connect(&config).await;

        assert!(matches!(result, Err(DatabaseError::Connection(_))));
    }

    #[tokio::test]
    async fn given_valid_database_url_when_execute_should_return_rows_affected() {
        let Some(config) = test_config() else {
            return;
        };
        let db = PostgresDatabase::connect(&config).await.unwrap();

        let rows = db.execute("SELECT 1 WHERE false").await.unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn given_connection_when_with_conn_should_run_query_and_return_value() {
        let Some(config) = test_config() else {
            return;
        };
        let db = PostgresDatabase::connect(&config).await.unwrap();

        let value: i64 = db
            .with_conn(|conn| {
                Box::pin(async move {
                    let v = sqlx::query_scalar::<_, i64>("SELECT 1::bigint")
                        .fetch_one(conn)
                        .await
                        .map_err(|e| DatabaseError::Query(e.to_string()))?;
                    Ok::<i64, DatabaseError>(v)
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
    }
}
