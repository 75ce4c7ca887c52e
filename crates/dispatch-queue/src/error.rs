use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker connect failed: {0}")]
    Connect(String),
    #[error("queue declare failed: queue={queue}, error={reason}")]
    Declare { queue: String, reason: String },
    #[error("publish failed: queue={queue}, error={reason}")]
    Publish { queue: String, reason: String },
    #[error("consume failed: queue={queue}, error={reason}")]
    Consume { queue: String, reason: String },
    #[error("delivery settle failed: queue={queue}, error={reason}")]
    Settle { queue: String, reason: String },
    #[error("queue not declared: {0}")]
    UnknownQueue(String),
    #[error("queue already declared with different arguments: {0}")]
    TopologyMismatch(String),
    #[error("cancelled by shutdown")]
    Cancelled,
}

impl QueueError {
    pub fn publish(queue: &str, reason: impl ToString) -> Self {
        Self::Publish { queue: queue.to_string(), reason: reason.to_string() }
    }

    pub fn declare(queue: &str, reason: impl ToString) -> Self {
        Self::Declare { queue: queue.to_string(), reason: reason.to_string() }
    }

    pub fn consume(queue: &str, reason: impl ToString) -> Self {
        Self::Consume { queue: queue.to_string(), reason: reason.to_string() }
    }

    pub fn settle(queue: &str, reason: impl ToString) -> Self {
        Self::Settle { queue: queue.to_string(), reason: reason.to_string() }
    }
}
