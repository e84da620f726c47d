pub mod handler_registry;
pub mod retry_policy;
pub mod state_machine;
