// Use case: locker.

use crate::application::buffer::job_buffer::JobBuffer;
use crate::application::buffer::result_queue::ResultQueue;
use crate::application::context::AppContext;
use crate::application::usecases::listener::Listener;
use crate::application::usecases::poller::Poller;
use crate::application::usecases::run_worker_once::WorkerConfig;
use crate::application::usecases::worker_manager::{WorkerInfo, WorkerManager, WorkerManagerError};
use crate::config::Settings;
use crate::domain::entities::locker::LockerRegistration;
use crate::domain::entities::message::JobAvailable;
use crate::domain::entities::metajob::Metajob;
use crate::domain::services::error_notifier::{ErrorReport, ErrorSource, notify_async};
use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::priority::PriorityThreshold;
use crate::infrastructure::db::postgres::LockerConnectionPostgres;
use crate::infrastructure::db::stores::locker_store::{LockerConnection, LockerStoreError};
use metrics::counter;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Everything a locker needs, assembled once before it starts.
#[derive(Debug, Clone)]
pub struct LockerOptions {
    pub queues: Vec<String>,
    pub listen: bool,
    pub poll: bool,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    /// Longest single wait for notifications before the loop turns over.
    pub wait_period: Duration,
    pub maximum_buffer_size: usize,
    /// One worker thread per entry.
    pub worker_priorities: Vec<PriorityThreshold>,
    pub worker: WorkerConfig,
}

impl Default for LockerOptions {
    fn default() -> Self {
        Self {
            queues: vec!["default".to_string()],
            listen: true,
            poll: true,
            poll_interval: Duration::from_secs(5),
            poll_jitter: Duration::ZERO,
            wait_period: Duration::from_millis(50),
            maximum_buffer_size: 8,
            worker_priorities: vec![
                PriorityThreshold::AtMost(10),
                PriorityThreshold::AtMost(30),
                PriorityThreshold::AtMost(50),
                PriorityThreshold::Any,
                PriorityThreshold::Any,
                PriorityThreshold::Any,
            ],
            worker: WorkerConfig::default(),
        }
    }
}

impl LockerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let locker = &settings.locker;
        Self {
            queues: locker.queues.clone(),
            listen: locker.listen,
            poll: locker.poll,
            poll_interval: Duration::from_millis(locker.poll_interval_ms),
            poll_jitter: Duration::from_millis(locker.poll_jitter_ms),
            wait_period: Duration::from_millis(locker.wait_period_ms),
            maximum_buffer_size: locker.maximum_buffer_size,
            worker_priorities: locker.worker_priorities.clone(),
            worker: WorkerConfig::from_settings(&settings.worker),
        }
    }

    pub fn validate(&self) -> Result<(), LockerError> {
        let invalid = |reason: &str| Err(LockerError::Configuration(reason.to_string()));

        if self.queues.is_empty() {
            return invalid("at least one queue is required");
        }
        if self.queues.iter().any(|queue| queue.trim().is_empty()) {
            return invalid("queue names must not be blank");
        }
        let mut distinct = HashSet::new();
        for queue in &self.queues {
            if !distinct.insert(queue.as_str()) {
                return Err(LockerError::Configuration(format!(
                    "queue {queue:?} is listed more than once"
                )));
            }
        }
        if self.worker_priorities.is_empty() {
            return invalid("at least one worker priority is required");
        }
        if self.wait_period.is_zero() {
            return invalid("wait_period must be positive");
        }
        if self.poll && self.poll_interval.is_zero() {
            return invalid("poll_interval must be positive when polling");
        }
        self.worker.validate().map_err(LockerError::Configuration)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockerError {
    #[error("invalid locker configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] LockerStoreError),
    #[error("lock accounting mismatch: {0}")]
    Protocol(String),
    #[error(transparent)]
    Workers(#[from] WorkerManagerError),
    #[error("locker control task failed: {0}")]
    Crashed(String),
}

/// Job ids whose advisory lock this locker's session currently holds.
#[derive(Debug, Clone, Default)]
struct LockTable(Arc<Mutex<HashSet<JobId>>>);

impl LockTable {
    fn guard(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> HashSet<JobId> {
        self.guard().clone()
    }

    fn insert(&self, id: JobId) -> Result<(), LockerError> {
        if !self.guard().insert(id) {
            return Err(LockerError::Protocol(format!("job {} locked twice", id.0)));
        }
        counter!("locker_jobs_locked_total").increment(1);
        Ok(())
    }

    fn remove(&self, id: JobId) -> Result<(), LockerError> {
        if !self.guard().remove(&id) {
            return Err(LockerError::Protocol(format!(
                "job {} released but never locked",
                id.0
            )));
        }
        Ok(())
    }
}

/// Release one advisory lock, keeping the lock table in step with the session.
async fn release(
    conn: &mut dyn LockerConnection,
    locks: &LockTable,
    id: JobId,
) -> Result<(), LockerError> {
    locks.remove(id)?;
    if !conn.advisory_unlock(id.0).await? {
        return Err(LockerError::Protocol(format!(
            "job {} was not locked by this session",
            id.0
        )));
    }
    counter!("locker_jobs_unlocked_total").increment(1);
    Ok(())
}

/// Take one unit of demand for a job of `priority` from the most restrictive
/// ceiling that still accepts it.
fn consume_demand(demand: &mut BTreeMap<i16, usize>, priority: i16) {
    let Some(ceiling) = demand
        .range(priority..)
        .find(|(_, count)| **count > 0)
        .map(|(ceiling, _)| *ceiling)
    else {
        return;
    };
    if let Some(count) = demand.get_mut(&ceiling) {
        *count -= 1;
        if *count == 0 {
            demand.remove(&ceiling);
        }
    }
}

/// Worker threads block on the control task's runtime, which a
/// current-thread runtime cannot serve.
fn require_multi_thread_runtime() -> Result<(), LockerError> {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => Ok(()),
        _ => Err(LockerError::Configuration(
            "a multi-threaded tokio runtime is required".to_string(),
        )),
    }
}

/// Keep the first error seen while still running every cleanup step.
fn keep_first(outcome: &mut Result<(), LockerError>, step: Result<(), LockerError>) {
    if let Err(err) = step {
        warn!(error = %err, "locker_shutdown_step_failed");
        if outcome.is_ok() {
            *outcome = Err(err);
        }
    }
}

/// State owned by the control task. It alone touches the connection.
struct ControlLoop {
    ctx: Arc<AppContext>,
    conn: Box<dyn LockerConnection>,
    options: LockerOptions,
    buffer: Arc<JobBuffer>,
    results: Arc<ResultQueue>,
    listener: Listener,
    pollers: Vec<Poller>,
    workers: Option<WorkerManager>,
    locks: LockTable,
    stop_requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ControlLoop {
    fn new(ctx: Arc<AppContext>, conn: Box<dyn LockerConnection>, options: LockerOptions) -> Self {
        let buffer = Arc::new(JobBuffer::new(
            options.maximum_buffer_size,
            &options.worker_priorities,
        ));
        let pollers = options
            .queues
            .iter()
            .map(|queue| Poller::new(queue.clone(), options.poll_interval, options.poll_jitter))
            .collect();

        Self {
            listener: Listener::new(ctx.notifier.clone()),
            ctx,
            conn,
            options,
            buffer,
            results: Arc::new(ResultQueue::new()),
            pollers,
            workers: None,
            locks: LockTable::default(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    async fn startup(&mut self) -> Result<(), LockerError> {
        // Step 1: Replace any registration left by a dead predecessor.
        let cleaned = self.conn.clean_lockers().await?;
        let registration = LockerRegistration::for_current_process(
            &self.options.worker_priorities,
            &self.options.queues,
            self.options.listen,
        );
        self.conn.register_locker(&registration).await?;

        // Step 2: Subscribe before polling so no insert slips between the two.
        if self.options.listen {
            self.listener.listen(self.conn.as_mut()).await?;
        }

        // Step 3: Start the worker pool.
        self.workers = Some(WorkerManager::spawn(
            self.ctx.clone(),
            self.options.worker.clone(),
            self.buffer.clone(),
            self.results.clone(),
            &self.options.worker_priorities,
            Handle::current(),
        )?);

        // Step 4: Fill the buffer with whatever is already due.
        if self.options.poll {
            self.poll_due_queues().await?;
        }

        info!(
            backend_pid = self.conn.backend_pid().0,
            queues = ?self.options.queues,
            workers = self.options.worker_priorities.len(),
            stale_lockers_cleaned = cleaned,
            "locker_started"
        );
        Ok(())
    }

    async fn run(mut self) -> Result<(), LockerError> {
        let mut outcome = Ok(());

        while !self.stop_requested.load(Ordering::SeqCst) {
            if let Err(err) = self.step().await {
                self.stop_requested.store(true, Ordering::SeqCst);
                error!(error = %err, "locker_failed");
                notify_async(
                    &self.ctx.notifier,
                    ErrorReport::new(ErrorSource::Locker, err.to_string()),
                );
                outcome = Err(err);
            }
        }

        let closed = self.shutdown().await;
        outcome.and(closed)
    }

    /// One turn of the steady-state loop.
    async fn step(&mut self) -> Result<(), LockerError> {
        // Step 1: Wait for notifications, or just for the period when not listening.
        if self.options.listen {
            let batch = tokio::select! {
                batch = self.listener.wait_for_messages(self.conn.as_mut(), self.options.wait_period) => batch?,
                _ = self.wake.notified() => return Ok(()),
            };
            self.lock_available(batch.job_available).await?;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(self.options.wait_period) => {}
                _ = self.wake.notified() => return Ok(()),
            }
        }

        // Step 2: Release jobs the workers are done with.
        self.release_finished().await?;

        // Step 3: Backstop the channel with a poll when one is due.
        if self.options.poll {
            self.poll_due_queues().await?;
        }
        Ok(())
    }

    #[instrument(skip(self, messages), fields(notified = messages.len()))]
    async fn lock_available(&mut self, messages: Vec<JobAvailable>) -> Result<(), LockerError> {
        if messages.is_empty() {
            return Ok(());
        }

        // Step 1: Drop ids this session already holds and queues it does not serve.
        let held = self.locks.snapshot();
        let mut seen = HashSet::new();
        let mut candidates: Vec<Metajob> = messages
            .iter()
            .filter(|message| self.options.queues.contains(&message.queue))
            .filter(|message| !held.contains(&message.id) && seen.insert(message.id))
            .map(JobAvailable::to_metajob)
            .collect();
        candidates.sort();

        // Step 2: Only lock what the buffer would keep.
        let mut locked = Vec::new();
        for metajob in self.buffer.accept(&candidates) {
            if self.conn.try_advisory_lock(metajob.id.0).await? {
                self.locks.insert(metajob.id)?;
                locked.push(metajob.id);
            } else {
                debug!(job_id = metajob.id.0, "locker_job_taken_elsewhere");
            }
        }
        if locked.is_empty() {
            return Ok(());
        }

        // Step 3: A job may have been worked between notify and lock.
        let ids: Vec<i64> = locked.iter().map(|id| id.0).collect();
        let mut live: HashMap<JobId, Metajob> = self
            .conn
            .fetch_live_jobs(&ids)
            .await?
            .into_iter()
            .map(|row| {
                let job = row.into_job();
                (job.id, Metajob::from_job(job))
            })
            .collect();

        let mut verified = Vec::with_capacity(live.len());
        for id in locked {
            match live.remove(&id) {
                Some(metajob) => verified.push(metajob),
                None => {
                    debug!(job_id = id.0, "locker_job_no_longer_live");
                    release(self.conn.as_mut(), &self.locks, id).await?;
                }
            }
        }

        // Step 4: Buffer them, releasing anything pushed out.
        self.push(verified).await
    }

    async fn push(&mut self, jobs: Vec<Metajob>) -> Result<(), LockerError> {
        for evicted in self.buffer.push(jobs) {
            debug!(job_id = evicted.id.0, "locker_job_evicted");
            release(self.conn.as_mut(), &self.locks, evicted.id).await?;
        }
        Ok(())
    }

    async fn release_finished(&mut self) -> Result<(), LockerError> {
        for id in self.results.drain() {
            release(self.conn.as_mut(), &self.locks, id).await?;
        }
        Ok(())
    }

    async fn poll_due_queues(&mut self) -> Result<(), LockerError> {
        let mut demand = self.buffer.available_priorities();
        let held: Vec<JobId> = self.locks.snapshot().into_iter().collect();

        for index in 0..self.pollers.len() {
            if demand.is_empty() {
                break;
            }
            let poller = &mut self.pollers[index];
            if !poller.should_poll() {
                continue;
            }

            let polled = poller.poll(self.conn.as_mut(), &demand, &held).await?;
            for metajob in &polled {
                self.locks.insert(metajob.id)?;
                consume_demand(&mut demand, metajob.priority);
            }
            self.push(polled).await?;
        }
        Ok(())
    }

    /// Drain, release and deregister. Every step runs even after a failure.
    async fn shutdown(&mut self) -> Result<(), LockerError> {
        let mut outcome = Ok(());

        // Step 1: Refuse new work and wake idle workers.
        self.buffer.stop();

        // Step 2: Jobs that were locked but never handed to a worker.
        for metajob in self.buffer.clear() {
            let step = release(self.conn.as_mut(), &self.locks, metajob.id).await;
            keep_first(&mut outcome, step);
        }

        // Step 3: Let in-flight jobs finish.
        if let Some(mut workers) = self.workers.take() {
            let joined = tokio::task::spawn_blocking(move || workers.join())
                .await
                .map_err(|err| LockerError::Crashed(err.to_string()));
            keep_first(&mut outcome, joined);
        }

        // Step 4: Their results.
        for id in self.results.drain() {
            let step = release(self.conn.as_mut(), &self.locks, id).await;
            keep_first(&mut outcome, step);
        }

        // Step 5: Leave the channel and the registry, then reset the session.
        if self.options.listen {
            let step = self.listener.unlisten(self.conn.as_mut()).await;
            keep_first(&mut outcome, step.map_err(LockerError::from));
        }
        let step = self.conn.unregister_locker().await;
        keep_first(&mut outcome, step.map_err(LockerError::from));
        let step = self.conn.close().await;
        keep_first(&mut outcome, step.map_err(LockerError::from));

        let leaked = self.locks.snapshot();
        if !leaked.is_empty() {
            keep_first(
                &mut outcome,
                Err(LockerError::Protocol(format!(
                    "{} job locks still held at shutdown",
                    leaked.len()
                ))),
            );
        }

        info!(backend_pid = self.conn.backend_pid().0, "locker_stopped");
        outcome
    }
}

/// A running locker: one dedicated connection, a buffer, and its workers.
pub struct Locker {
    buffer: Arc<JobBuffer>,
    workers: Vec<WorkerInfo>,
    locks: LockTable,
    stop_requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
    control: Option<JoinHandle<Result<(), LockerError>>>,
}

impl Locker {
    /// Register, subscribe, start workers, run the first poll, then hand the
    /// connection to the control task. Fails on a current-thread runtime.
    pub async fn start(
        ctx: Arc<AppContext>,
        conn: Box<dyn LockerConnection>,
        options: LockerOptions,
    ) -> Result<Self, LockerError> {
        options.validate()?;
        require_multi_thread_runtime()?;

        let mut control = ControlLoop::new(ctx, conn, options);
        if let Err(err) = control.startup().await {
            if let Err(cleanup) = control.shutdown().await {
                warn!(error = %cleanup, "locker_startup_cleanup_failed");
            }
            return Err(err);
        }

        let buffer = control.buffer.clone();
        let workers = control
            .workers
            .as_ref()
            .map(WorkerManager::workers)
            .unwrap_or_default();
        let locks = control.locks.clone();
        let stop_requested = control.stop_requested.clone();
        let wake = control.wake.clone();

        Ok(Self {
            buffer,
            workers,
            locks,
            stop_requested,
            wake,
            control: Some(tokio::spawn(control.run())),
        })
    }

    /// Open a dedicated Postgres session at `database_url` and start on it.
    pub async fn connect(
        ctx: Arc<AppContext>,
        database_url: &str,
        options: LockerOptions,
    ) -> Result<Self, LockerError> {
        options.validate()?;
        require_multi_thread_runtime()?;
        let conn = LockerConnectionPostgres::connect(database_url).await?;
        Self::start(ctx, Box::new(conn), options).await
    }

    /// Ask the locker to shut down and return at once.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Shut down and wait until workers exited and every lock was released.
    pub async fn stop_and_wait(mut self) -> Result<(), LockerError> {
        self.stop();
        let Some(control) = self.control.take() else {
            return Ok(());
        };
        control
            .await
            .map_err(|err| LockerError::Crashed(err.to_string()))?
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> &[WorkerInfo] {
        &self.workers
    }

    pub fn job_buffer(&self) -> &JobBuffer {
        &self.buffer
    }

    /// Ids currently advisory-locked by this locker.
    pub fn locks(&self) -> HashSet<JobId> {
        self.locks.snapshot()
    }
}

impl Drop for Locker {
    fn drop(&mut self) {
        if self.control.is_some() {
            self.stop();
        }
    }
}
