pub mod listener;
pub mod locker;
pub mod poller;
pub mod run_worker_once;
pub mod worker_loop;
pub mod worker_manager;
