pub mod job_store;
pub mod locker_store;
