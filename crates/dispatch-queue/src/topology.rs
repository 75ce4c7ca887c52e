pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

/// The work queue plus the dead-letter queue it routes rejected messages to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub work_queue: String,
    pub dead_letter_queue: String,
}

/// One durable queue declaration, optionally dead-lettering through the
/// default exchange to another queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    pub dead_letter_to: Option<String>,
}

impl QueueTopology {
    pub fn new(
        work_queue: impl Into<String>,
        dead_letter_queue: impl Into<String>,
    ) -> Self {
        Self {
            work_queue: work_queue.into(),
            dead_letter_queue: dead_letter_queue.into(),
        }
    }

    /// Declarations in the order they must be applied: the dead-letter queue
    /// first, so the work queue never points at a missing target.
    pub fn declarations(&self) -> [QueueDeclaration; 2] {
        [
            QueueDeclaration {
                name: self.dead_letter_queue.clone(),
                durable: true,
                dead_letter_to: None,
            },
            QueueDeclaration {
                name: self.work_queue.clone(),
                durable: true,
                dead_letter_to: Some(self.dead_letter_queue.clone()),
            },
        ]
    }
}

impl QueueDeclaration {
    /// Queue arguments as broker-level key/value pairs.
    pub fn arguments(&self) -> Vec<(&'static str, String)> {
        match &self.dead_letter_to {
            Some(target) => vec![
                (DEAD_LETTER_EXCHANGE_ARG, String::new()),
                (DEAD_LETTER_ROUTING_KEY_ARG, target.clone()),
            ],
            None => Vec::new(),
        }
    }
}
