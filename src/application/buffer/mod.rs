pub mod job_buffer;
pub mod result_queue;
