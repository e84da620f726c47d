use crate::domain::value_objects::priority::PriorityThreshold;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub db: Db,
    pub locker: Locker,
    pub worker: Worker,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Db {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Locker {
    pub queues: Vec<String>,
    pub listen: bool,
    pub poll: bool,
    pub poll_interval_ms: u64,
    pub poll_jitter_ms: u64,
    pub wait_period_ms: u64,
    pub maximum_buffer_size: usize,
    pub worker_priorities: Vec<PriorityThreshold>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Worker {
    pub maximum_retry_count: i32,
    pub retain_finished_jobs: bool,
    pub store_retry_attempts: u32,
    pub store_retry_delay_ms: u64,
}

/// Load settings from `config/default.toml`, `config/<env>.toml`, and env overrides.
///
/// Environment overrides use the `FORGELOCK` prefix and `__` as the section
/// separator, e.g. `FORGELOCK__LOCKER__MAXIMUM_BUFFER_SIZE=16`.
pub fn load() -> Result<Settings, config::ConfigError> {
    let env_name = std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
    config::Config::builder()
        .add_source(config::File::with_name("config/default"))
        .add_source(config::File::with_name(&format!("config/{env_name}")).required(false))
        .add_source(
            config::Environment::with_prefix("FORGELOCK")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("locker.queues"),
        )
        .build()?
        .try_deserialize()
}
