use crate::domain::entities::metajob::Metajob;
use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::timestamps::Timestamp;

/// Discriminator carried in the `message_type` field of every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    JobAvailable,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::JobAvailable => "job_available",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "job_available" => Some(MessageType::JobAvailable),
            _ => None,
        }
    }
}

/// A newly due job announced on a locker's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobAvailable {
    pub queue: String,
    pub id: JobId,
    pub run_at: Timestamp,
    pub priority: i16,
}

impl JobAvailable {
    pub fn to_metajob(&self) -> Metajob {
        Metajob::new(self.priority, self.run_at, self.id, self.queue.clone())
    }
}

/// A validated notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    JobAvailable(JobAvailable),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::JobAvailable(_) => MessageType::JobAvailable,
        }
    }
}

/// Valid messages from one wait, grouped by type in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBatch {
    pub job_available: Vec<JobAvailable>,
}

impl MessageBatch {
    pub fn push(&mut self, message: Message) {
        match message {
            Message::JobAvailable(job) => self.job_available.push(job),
        }
    }

    pub fn len(&self) -> usize {
        self.job_available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.job_available.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_known_discriminator_when_parsed_should_round_trip_name() {
        let parsed = MessageType::parse("job_available").expect("known type");
        assert_eq!(parsed.as_str(), "job_available");
        assert_eq!(MessageType::parse("job_finished"), None);
    }

    #[test]
    fn given_job_available_messages_when_batched_should_group_in_order() {
        let now = Timestamp::now_utc();
        let mut batch = MessageBatch::default();
        assert!(batch.is_empty());

        for id in [3, 1] {
            batch.push(Message::JobAvailable(JobAvailable {
                queue: "default".to_string(),
                id: JobId(id),
                run_at: now,
                priority: 5,
            }));
        }

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.job_available[0].id, JobId(3));
        let metajob = batch.job_available[1].to_metajob();
        assert_eq!(metajob.sort_key(), (5, now, JobId(1)));
        assert!(metajob.job().is_none());
    }
}
