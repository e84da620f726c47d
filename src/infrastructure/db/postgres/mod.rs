mod database;
pub mod job_store_postgres;
pub mod locker_connection_postgres;
mod queries;

pub use database::{PostgresConfig, PostgresDatabase};
pub use locker_connection_postgres::LockerConnectionPostgres;
