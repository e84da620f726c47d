use crate::domain::entities::locker::LockerRegistration;
use crate::domain::value_objects::ids::BackendPid;
use crate::infrastructure::db::database::DatabaseError;
use crate::infrastructure::db::dto::JobRow;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LockerStoreError {
    #[error("locker connection lost")]
    ConnectionLost,
    #[error("storage unavailable")]
    StorageUnavailable,
}

impl From<DatabaseError> for LockerStoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Connection(_) => LockerStoreError::ConnectionLost,
            DatabaseError::Query(_) => LockerStoreError::StorageUnavailable,
        }
    }
}

/// The single session a locker owns for its whole life.
///
/// Advisory locks taken here are session scoped: they stay held until released
/// through the same connection, or until the session ends. Locks are reentrant,
/// so callers must never lock an id they already hold.
#[async_trait]
pub trait LockerConnection: Send {
    /// Session id of the connection; also names the notification channel.
    fn backend_pid(&self) -> BackendPid;

    /// Purge registrations left by this session id or by sessions that no longer exist.
    async fn clean_lockers(&mut self) -> Result<u64, LockerStoreError>;
    async fn register_locker(
        &mut self,
        registration: &LockerRegistration,
    ) -> Result<(), LockerStoreError>;
    async fn unregister_locker(&mut self) -> Result<(), LockerStoreError>;

    /// Subscribe to this session's channel.
    async fn listen(&mut self) -> Result<(), LockerStoreError>;
    /// Stop subscribing and discard notifications already received.
    async fn unlisten(&mut self) -> Result<(), LockerStoreError>;
    /// Wait up to `timeout` for a first payload, then drain whatever else has
    /// already arrived without waiting again.
    async fn wait_for_notifications(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<String>, LockerStoreError>;

    /// Lock and return, per priority ceiling, up to the requested number of the
    /// most urgent workable jobs of `queue`, skipping `excluded_ids`.
    async fn poll_jobs(
        &mut self,
        queue: &str,
        excluded_ids: &[i64],
        priorities: &BTreeMap<i16, usize>,
    ) -> Result<Vec<JobRow>, LockerStoreError>;
    async fn try_advisory_lock(&mut self, job_id: i64) -> Result<bool, LockerStoreError>;
    async fn advisory_unlock(&mut self, job_id: i64) -> Result<bool, LockerStoreError>;
    /// Rows among `job_ids` that are still neither finished nor expired.
    async fn fetch_live_jobs(&mut self, job_ids: &[i64]) -> Result<Vec<JobRow>, LockerStoreError>;

    /// Reset session state before the connection is dropped.
    async fn close(&mut self) -> Result<(), LockerStoreError>;
}
