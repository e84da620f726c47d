// Use case: listener.

use crate::domain::entities::message::{JobAvailable, Message, MessageBatch, MessageType};
use crate::domain::services::error_notifier::{
    ErrorNotifier, ErrorReport, ErrorSource, notify_async,
};
use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::timestamps::Timestamp;
use crate::infrastructure::db::stores::locker_store::{LockerConnection, LockerStoreError};
use metrics::counter;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const JOB_AVAILABLE_KEYS: [&str; 5] = ["message_type", "queue", "id", "run_at", "priority"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageFormatError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no message_type")]
    MissingMessageType,
    #[error("unknown message_type {0:?}")]
    UnknownMessageType(String),
    #[error("{message_type} message is missing {key}")]
    MissingKey {
        message_type: &'static str,
        key: &'static str,
    },
    #[error("{message_type} message has unexpected key {key:?}")]
    UnexpectedKey {
        message_type: &'static str,
        key: String,
    },
    #[error("{message_type} message has an invalid {key}")]
    InvalidField {
        message_type: &'static str,
        key: &'static str,
    },
}

/// Decode one notification payload into a validated message.
pub fn parse_message(payload: &str) -> Result<Message, MessageFormatError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|err| MessageFormatError::InvalidJson(err.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(MessageFormatError::NotAnObject);
    };

    let message_type = match fields.get("message_type") {
        Some(Value::String(name)) => name.as_str(),
        _ => return Err(MessageFormatError::MissingMessageType),
    };
    match MessageType::parse(message_type) {
        Some(MessageType::JobAvailable) => parse_job_available(&fields).map(Message::JobAvailable),
        None => Err(MessageFormatError::UnknownMessageType(message_type.to_string())),
    }
}

fn parse_job_available(fields: &Map<String, Value>) -> Result<JobAvailable, MessageFormatError> {
    let message_type = MessageType::JobAvailable.as_str();
    let invalid = |key| MessageFormatError::InvalidField { message_type, key };

    // Step 1: Exact key set, no more and no less.
    for key in JOB_AVAILABLE_KEYS {
        if !fields.contains_key(key) {
            return Err(MessageFormatError::MissingKey { message_type, key });
        }
    }
    if let Some(extra) = fields.keys().find(|key| !JOB_AVAILABLE_KEYS.contains(&key.as_str())) {
        return Err(MessageFormatError::UnexpectedKey {
            message_type,
            key: extra.clone(),
        });
    }

    // Step 2: Field types.
    let queue = fields["queue"].as_str().ok_or_else(|| invalid("queue"))?;
    let id = fields["id"].as_i64().ok_or_else(|| invalid("id"))?;
    let run_at = fields["run_at"]
        .as_str()
        .and_then(|raw| Timestamp::parse(raw).ok())
        .ok_or_else(|| invalid("run_at"))?;
    let priority = fields["priority"]
        .as_i64()
        .and_then(|raw| i16::try_from(raw).ok())
        .ok_or_else(|| invalid("priority"))?;

    Ok(JobAvailable {
        queue: queue.to_string(),
        id: JobId(id),
        run_at,
        priority,
    })
}

/// Turns raw channel payloads into validated messages.
pub struct Listener {
    notifier: Arc<dyn ErrorNotifier>,
}

impl Listener {
    pub fn new(notifier: Arc<dyn ErrorNotifier>) -> Self {
        Self { notifier }
    }

    pub async fn listen(&self, conn: &mut dyn LockerConnection) -> Result<(), LockerStoreError> {
        conn.listen().await?;
        debug!(channel = %conn.backend_pid().channel(), "listener_subscribed");
        Ok(())
    }

    /// Wait up to `timeout` for notifications and return the valid ones grouped
    /// by type. Malformed payloads are dropped and each reported once.
    pub async fn wait_for_messages(
        &self,
        conn: &mut dyn LockerConnection,
        timeout: Duration,
    ) -> Result<MessageBatch, LockerStoreError> {
        let payloads = conn.wait_for_notifications(timeout).await?;
        let mut batch = MessageBatch::default();

        for payload in payloads {
            match parse_message(&payload) {
                Ok(message) => batch.push(message),
                Err(err) => {
                    counter!("listener_messages_dropped_total").increment(1);
                    warn!(error = %err, "listener_message_dropped");
                    notify_async(
                        &self.notifier,
                        ErrorReport::new(
                            ErrorSource::Listener,
                            format!("{err}; payload: {payload}"),
                        ),
                    );
                }
            }
        }

        Ok(batch)
    }

    /// Stop subscribing and throw away anything already received.
    pub async fn unlisten(&self, conn: &mut dyn LockerConnection) -> Result<(), LockerStoreError> {
        conn.unlisten().await
    }
}
