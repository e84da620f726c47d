pub mod job;
pub mod locker;
pub mod message;
pub mod metajob;
