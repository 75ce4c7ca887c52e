//! Durable queue plumbing for the email dispatch pipeline.
//!
//! [`Broker`] is the publish/consume seam. [`AmqpBroker`] talks to RabbitMQ;
//! [`MemoryBroker`] reproduces the same dead-letter semantics in process for
//! tests and local runs. [`Ingress`] is the enqueue side used by front doors.

mod amqp;
mod backoff;
mod broker;
mod error;
mod ingress;
mod memory;
mod topology;

pub use amqp::{AmqpBroker, redact_url};
pub use backoff::{Backoff, retry_connect};
pub use broker::{Broker, Disposition, MessageHandler};
pub use error::QueueError;
pub use ingress::Ingress;
pub use memory::{MemoryBroker, QueueStats};
pub use topology::{
    DEAD_LETTER_EXCHANGE_ARG, DEAD_LETTER_ROUTING_KEY_ARG, QueueDeclaration,
    QueueTopology,
};
