// Use case: worker_loop.

use crate::application::buffer::job_buffer::{JobBuffer, JobBufferError};
use crate::application::buffer::result_queue::ResultQueue;
use crate::application::context::AppContext;
use crate::application::usecases::run_worker_once::{RunWorkerOnceUseCase, WorkerConfig};
use crate::domain::value_objects::priority::PriorityThreshold;
use tokio::runtime::Handle;
use tracing::debug;

/// Pulls jobs off one buffer lane until the buffer stops.
pub struct WorkerLoopUseCase;

#[derive(Debug, thiserror::Error)]
pub enum WorkerLoopError {
    #[error(transparent)]
    Buffer(#[from] JobBufferError),
}

impl WorkerLoopUseCase {
    /// Run on a dedicated OS thread; job logic is driven on `runtime`.
    ///
    /// Returns the number of jobs worked once the buffer reports it stopped.
    pub fn run(
        ctx: &AppContext,
        config: &WorkerConfig,
        buffer: &JobBuffer,
        results: &ResultQueue,
        priority: PriorityThreshold,
        runtime: &Handle,
    ) -> Result<usize, WorkerLoopError> {
        let mut worked = 0;

        // Step 1: Block on the lane until a job arrives or the buffer stops.
        while let Some(metajob) = buffer.shift(priority)? {
            // Step 2: Work it to a terminal state; failures never escape.
            runtime.block_on(RunWorkerOnceUseCase::execute(ctx, config, metajob, results));
            worked += 1;
        }

        // Step 3: Exit cleanly once the buffer is stopped.
        debug!(priority = %priority, worked, "worker_stopped");
        Ok(worked)
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerLoopUseCase;
    use crate::application::buffer::job_buffer::JobBuffer;
    use crate::application::buffer::result_queue::ResultQueue;
    use crate::application::context::test_support::{
        MemoryDatabase, Returns, fast_worker_config, ready_job, test_context,
    };
    use crate::domain::entities::metajob::Metajob;
    use crate::domain::services::job_handler::Resolution;
    use crate::domain::value_objects::ids::JobId;
    use crate::domain::value_objects::priority::PriorityThreshold;
    use crate::domain::workflows::handler_registry::HandlerRegistry;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn given_stopped_buffer_when_run_should_exit_cleanly() {
        let db = MemoryDatabase::new();
        let (ctx, _) = test_context(&db, HandlerRegistry::new());
        let buffer = JobBuffer::new(4, &[PriorityThreshold::Any]);
        let results = ResultQueue::new();
        buffer.stop();
        let runtime = tokio::runtime::Handle::current();

        let worked = tokio::task::spawn_blocking(move || {
            WorkerLoopUseCase::run(
                &ctx,
                &fast_worker_config(),
                &buffer,
                &results,
                PriorityThreshold::Any,
                &runtime,
            )
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(worked, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn given_buffered_jobs_when_run_should_work_them_before_stopping() {
        let db = MemoryDatabase::new();
        let handlers = HandlerRegistry::new().register("Noop", Returns(Resolution::Finish));
        let (ctx, _) = test_context(&db, handlers);
        let buffer = std::sync::Arc::new(JobBuffer::new(4, &[PriorityThreshold::AtMost(10)]));
        let results = std::sync::Arc::new(ResultQueue::new());
        for id in [1, 2] {
            let job = ready_job(id, 5, "Noop");
            db.insert(job.clone());
            buffer.push(vec![Metajob::from_job(job)]);
        }
        let runtime = tokio::runtime::Handle::current();

        let worker = {
            let (buffer, results) = (buffer.clone(), results.clone());
            std::thread::spawn(move || {
                WorkerLoopUseCase::run(
                    &ctx,
                    &fast_worker_config(),
                    &buffer,
                    &results,
                    PriorityThreshold::AtMost(10),
                    &runtime,
                )
            })
        };
        while results.len() < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        buffer.stop();

        let worked = tokio::task::spawn_blocking(move || worker.join().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worked, 2);
        assert_eq!(results.drain(), vec![JobId(1), JobId(2)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn given_unknown_lane_when_run_should_fail() {
        let db = MemoryDatabase::new();
        let (ctx, _) = test_context(&db, HandlerRegistry::new());
        let buffer = JobBuffer::new(4, &[PriorityThreshold::AtMost(10)]);
        let results = ResultQueue::new();
        let runtime = tokio::runtime::Handle::current();

        let result = tokio::task::spawn_blocking(move || {
            WorkerLoopUseCase::run(
                &ctx,
                &fast_worker_config(),
                &buffer,
                &results,
                PriorityThreshold::Any,
                &runtime,
            )
        })
        .await
        .unwrap();

        assert!(result.is_err());
    }
}
