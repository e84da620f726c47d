use crate::domain::services::job_handler::{JobError, JobHandler};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Table of job logic keyed by the `job_class` column, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_class`, replacing any earlier registration.
    pub fn register<H>(mut self, job_class: impl Into<String>, handler: H) -> Self
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(job_class.into(), Arc::new(handler));
        self
    }

    /// Resolve the handler for a job class.
    pub fn resolve(&self, job_class: &str) -> Result<Arc<dyn JobHandler>, JobError> {
        self.handlers
            .get(job_class)
            .cloned()
            .ok_or_else(|| JobError::UnknownJobClass(job_class.to_string()))
    }

    pub fn job_classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_classes", &self.job_classes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::HandlerRegistry;
    use crate::domain::entities::job::Job;
    use crate::domain::services::job_handler::{JobError, JobHandler, Resolution};
    use crate::domain::value_objects::ids::JobId;
    use crate::domain::value_objects::timestamps::Timestamp;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn run(&self, _job: &Job) -> Result<Resolution, JobError> {
            Ok(Resolution::Unresolved)
        }
    }

    struct Cleanup;

    #[async_trait]
    impl JobHandler for Cleanup {
        async fn run(&self, _job: &Job) -> Result<Resolution, JobError> {
            Ok(Resolution::Destroy)
        }
    }

    #[tokio::test]
    async fn given_registered_class_when_resolved_should_return_its_handler() {
        let registry = HandlerRegistry::new()
            .register("Noop", Noop)
            .register("Cleanup", Cleanup);
        let job = Job::new(JobId(1), "default", 1, Timestamp::now_utc(), "Cleanup");

        let handler = registry.resolve("Cleanup").expect("handler should exist");

        assert_eq!(handler.run(&job).await, Ok(Resolution::Destroy));
        assert_eq!(registry.job_classes(), vec!["Cleanup", "Noop"]);
    }

    #[test]
    fn given_unknown_class_when_resolved_should_return_unknown_job_class() {
        let registry = HandlerRegistry::new().register("Noop", Noop);

        let result = registry.resolve("Missing");

        assert!(matches!(result, Err(JobError::UnknownJobClass(class)) if class == "Missing"));
    }

    #[test]
    fn given_registry_when_debug_formatted_should_list_classes() {
        let registry = HandlerRegistry::new().register("Noop", Noop);
        assert_eq!(
            format!("{registry:?}"),
            "HandlerRegistry { job_classes: [\"Noop\"] }"
        );
    }
}
