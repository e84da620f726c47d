// Use case: poller.

use crate::domain::entities::metajob::Metajob;
use crate::domain::value_objects::ids::JobId;
use crate::infrastructure::db::stores::locker_store::{LockerConnection, LockerStoreError};
use metrics::counter;
use rand::Rng;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Batch-claims due jobs of one queue as a backstop to notifications.
#[derive(Debug)]
pub struct Poller {
    queue: String,
    poll_interval: Duration,
    poll_jitter: Duration,
    last_polled_at: Option<Instant>,
    last_poll_satisfied: bool,
    next_interval: Duration,
}

impl Poller {
    pub fn new(queue: impl Into<String>, poll_interval: Duration, poll_jitter: Duration) -> Self {
        Self {
            queue: queue.into(),
            poll_interval,
            poll_jitter,
            last_polled_at: None,
            last_poll_satisfied: false,
            next_interval: poll_interval,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn should_poll(&self) -> bool {
        self.should_poll_at(Instant::now())
    }

    /// True before the first poll, after a poll that filled its request, or
    /// once the (jittered) interval has passed since the last poll.
    pub fn should_poll_at(&self, now: Instant) -> bool {
        let Some(last_polled_at) = self.last_polled_at else {
            return true;
        };
        if self.last_poll_satisfied {
            return true;
        }
        now.saturating_duration_since(last_polled_at) >= self.next_interval
    }

    /// Lock and fetch up to the requested number of jobs per priority ceiling.
    ///
    /// Returned metajobs are advisory-locked on `conn` and carry their rows.
    #[instrument(skip(self, conn, priorities, held_ids), fields(queue = %self.queue))]
    pub async fn poll(
        &mut self,
        conn: &mut dyn LockerConnection,
        priorities: &BTreeMap<i16, usize>,
        held_ids: &[JobId],
    ) -> Result<Vec<Metajob>, LockerStoreError> {
        // Step 1: Ask the store for locked rows, skipping what this session holds.
        let excluded: Vec<i64> = held_ids.iter().map(|id| id.0).collect();
        let rows = conn.poll_jobs(&self.queue, &excluded, priorities).await?;

        // Step 2: Remember whether the least restrictive request was filled.
        self.last_polled_at = Some(Instant::now());
        self.last_poll_satisfied = Self::poll_satisfied(priorities, rows.len());
        self.next_interval = self.jittered_interval();

        counter!("poller_jobs_polled_total", "queue" => self.queue.clone())
            .increment(rows.len() as u64);
        debug!(
            polled = rows.len(),
            satisfied = self.last_poll_satisfied,
            "poller_polled"
        );

        // Step 3: Wrap rows as metajobs with the row attached.
        Ok(rows
            .into_iter()
            .map(|row| Metajob::from_job(row.into_job()))
            .collect())
    }

    fn poll_satisfied(priorities: &BTreeMap<i16, usize>, returned: usize) -> bool {
        priorities
            .last_key_value()
            .is_some_and(|(_, requested)| returned >= *requested)
    }

    fn jittered_interval(&self) -> Duration {
        let jitter_ms = self.poll_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.poll_interval;
        }
        self.poll_interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}
