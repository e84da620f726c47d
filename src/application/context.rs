use std::sync::Arc;

use crate::domain::services::error_notifier::{ErrorNotifier, TracingErrorNotifier};
use crate::domain::workflows::handler_registry::HandlerRegistry;
use crate::infrastructure::db::repositories::Repositories;

/// Shared application resources used by use cases and services.
pub struct AppContext {
    pub repos: Repositories,
    pub handlers: HandlerRegistry,
    pub notifier: Arc<dyn ErrorNotifier>,
}

impl AppContext {
    /// Build a new application context with shared repositories and services.
    pub fn new(
        repos: Repositories,
        handlers: HandlerRegistry,
        notifier: Arc<dyn ErrorNotifier>,
    ) -> Self {
        Self {
            repos,
            handlers,
            notifier,
        }
    }

    /// Context whose error reports go to `tracing`.
    pub fn with_tracing_notifier(repos: Repositories, handlers: HandlerRegistry) -> Self {
        Self::new(repos, handlers, Arc::new(TracingErrorNotifier))
    }
}
