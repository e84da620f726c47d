pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::context::AppContext;
pub use application::usecases::locker::{Locker, LockerError, LockerOptions};
pub use domain::services::job_handler::{JobError, JobHandler, Resolution};
pub use domain::workflows::handler_registry::HandlerRegistry;
