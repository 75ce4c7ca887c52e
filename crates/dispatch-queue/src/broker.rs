use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::topology::QueueTopology;

/// What to do with a delivered message once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// `requeue: false` lets the broker dead-letter the message.
    Reject { requeue: bool },
}

/// Per-message processing capability injected into [`Broker::consume`].
///
/// The handler gets the broker that delivered the message so any follow-up
/// publish (a dead-letter record, say) goes over the consumer's own channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8], broker: &dyn Broker) -> Disposition;
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares the dead-letter queue and the work queue. Safe to repeat with
    /// the same topology.
    async fn declare_topology(
        &self,
        topology: &QueueTopology,
    ) -> Result<(), QueueError>;

    /// Persists `payload` on `queue`. The message survives a broker restart
    /// once this returns `Ok`.
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Result<(), QueueError>;

    /// Delivers messages from `queue` to `handler` one at a time, settling
    /// each before the next is fetched, until `shutdown` is cancelled.
    async fn consume(
        &self,
        queue: &str,
        handler: &dyn MessageHandler,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueError>;
}
