// Use case: worker_manager.

use crate::application::buffer::job_buffer::JobBuffer;
use crate::application::buffer::result_queue::ResultQueue;
use crate::application::context::AppContext;
use crate::application::usecases::run_worker_once::WorkerConfig;
use crate::application::usecases::worker_loop::WorkerLoopUseCase;
use crate::domain::services::error_notifier::{ErrorReport, ErrorSource};
use crate::domain::value_objects::priority::PriorityThreshold;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum WorkerManagerError {
    #[error("could not spawn worker thread: {0}")]
    Spawn(String),
}

/// Read-only view of one worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: String,
    pub priority: PriorityThreshold,
}

struct WorkerHandle {
    info: WorkerInfo,
    join: JoinHandle<()>,
}

/// One OS thread per configured worker priority, all fed from the same buffer.
pub struct WorkerManager {
    handles: Vec<WorkerHandle>,
}

impl WorkerManager {
    /// Spawn a worker thread for each entry of `priorities`.
    pub fn spawn(
        ctx: Arc<AppContext>,
        config: WorkerConfig,
        buffer: Arc<JobBuffer>,
        results: Arc<ResultQueue>,
        priorities: &[PriorityThreshold],
        runtime: Handle,
    ) -> Result<Self, WorkerManagerError> {
        let mut manager = Self {
            handles: Vec::with_capacity(priorities.len()),
        };

        for (index, priority) in priorities.iter().copied().enumerate() {
            // Step 1: Allocate a worker id and clone the shared resources.
            let info = WorkerInfo {
                id: format!("worker-{}", index + 1),
                priority,
            };
            let worker_ctx = ctx.clone();
            let worker_config = config.clone();
            let worker_buffer = buffer.clone();
            let worker_results = results.clone();
            let worker_runtime = runtime.clone();

            // Step 2: Spawn the worker loop thread.
            let spawned = std::thread::Builder::new()
                .name(format!("forge-lock-{}", info.id))
                .spawn(move || {
                    let outcome = WorkerLoopUseCase::run(
                        &worker_ctx,
                        &worker_config,
                        &worker_buffer,
                        &worker_results,
                        priority,
                        &worker_runtime,
                    );
                    if let Err(err) = outcome {
                        worker_ctx
                            .notifier
                            .notify(&ErrorReport::new(ErrorSource::Worker, err.to_string()));
                    }
                });

            match spawned {
                Ok(join) => manager.handles.push(WorkerHandle { info, join }),
                Err(err) => {
                    // Step 3: Never leave half a pool running.
                    buffer.stop();
                    manager.join();
                    return Err(WorkerManagerError::Spawn(err.to_string()));
                }
            }
        }

        info!(workers = manager.handles.len(), "workers_started");
        Ok(manager)
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.handles.iter().map(|handle| handle.info.clone()).collect()
    }

    /// Wait for every worker thread to exit. Blocks; call after stopping the
    /// buffer.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join.join().is_err() {
                tracing::error!(worker = %handle.info.id, "worker_thread_panicked");
            }
        }
    }
}
