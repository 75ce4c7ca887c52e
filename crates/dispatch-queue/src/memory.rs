use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::{Broker, Disposition, MessageHandler};
use crate::error::QueueError;
use crate::topology::{QueueDeclaration, QueueTopology};

/// In-process [`Broker`] for tests and local runs.
///
/// Mirrors the broker behaviour the dispatch pipeline relies on: durable
/// declarations must match on redeclare, publishing to an undeclared queue
/// fails, and a message rejected without requeue is routed to the queue's
/// dead-letter target. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, MemoryQueue>>>,
    published: Arc<Notify>,
}

/// Settlement counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub acked: usize,
    pub rejected: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

struct MemoryQueue {
    declaration: QueueDeclaration,
    messages: VecDeque<Vec<u8>>,
    stats: QueueStats,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn declare(
        &self,
        declaration: &QueueDeclaration,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        match queues.get(&declaration.name) {
            Some(existing) if existing.declaration == *declaration => Ok(()),
            Some(_) => Err(QueueError::TopologyMismatch(declaration.name.clone())),
            None => {
                queues.insert(
                    declaration.name.clone(),
                    MemoryQueue {
                        declaration: declaration.clone(),
                        messages: VecDeque::new(),
                        stats: QueueStats::default(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Number of declared queues.
    pub async fn queue_count(&self) -> usize {
        self.queues.lock().await.len()
    }

    /// Snapshot of the messages waiting on `queue`, oldest first.
    pub async fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn stats(&self, queue: &str) -> QueueStats {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.stats)
            .unwrap_or_default()
    }

    async fn next_message(&self, queue: &str) -> Result<Option<Vec<u8>>, QueueError> {
        let mut queues = self.queues.lock().await;
        let entry = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        Ok(entry.messages.pop_front())
    }

    async fn settle(
        &self,
        queue: &str,
        payload: Vec<u8>,
        disposition: Disposition,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let entry = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let dead_letter_to = match disposition {
            Disposition::Ack => {
                entry.stats.acked += 1;
                return Ok(());
            }
            Disposition::Reject { requeue: true } => {
                entry.stats.rejected += 1;
                entry.stats.requeued += 1;
                entry.messages.push_front(payload);
                return Ok(());
            }
            Disposition::Reject { requeue: false } => {
                entry.stats.rejected += 1;
                entry.declaration.dead_letter_to.clone()
            }
        };

        // An absent or undeclared target drops the message, as a broker would.
        let target = match dead_letter_to {
            Some(name) => queues.get_mut(&name),
            None => None,
        };
        if let Some(target) = target {
            target.messages.push_back(payload);
            target.stats.dead_lettered += 1;
            self.published.notify_waiters();
        } else {
            debug!("rejected message dropped: queue={queue}");
        }

        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_topology(
        &self,
        topology: &QueueTopology,
    ) -> Result<(), QueueError> {
        for declaration in topology.declarations() {
            self.declare(&declaration).await?;
        }
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let entry = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        entry.messages.push_back(payload.to_vec());
        self.published.notify_waiters();
        Ok(())
    }

    /// Unlike a network broker, returns only once shutdown is requested *and*
    /// the queue is empty, so tests can publish, cancel, and then drain.
    async fn consume(
        &self,
        queue: &str,
        handler: &dyn MessageHandler,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueError> {
        loop {
            let published = self.published.notified();

            match self.next_message(queue).await? {
                Some(payload) => {
                    let disposition = handler.handle(&payload, self).await;
                    self.settle(queue, payload, disposition).await?;
                }
                None => {
                    if shutdown.is_cancelled() {
                        return Ok(());
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = published => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedHandler {
        disposition: Disposition,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for FixedHandler {
        async fn handle(&self, _payload: &[u8], _broker: &dyn Broker) -> Disposition {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.disposition
        }
    }

    fn topology() -> QueueTopology {
        QueueTopology::new("email.queue", "failed.queue")
    }

    async fn drain(broker: &MemoryBroker, handler: &FixedHandler) {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        broker.consume("email.queue", handler, &shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn redeclaring_identical_topology_is_a_no_op() {
        let broker = MemoryBroker::new();
        broker.declare_topology(&topology()).await.unwrap();
        broker.publish("email.queue", b"{}").await.unwrap();
        broker.declare_topology(&topology()).await.unwrap();
        broker.declare_topology(&topology()).await.unwrap();

        assert_eq!(broker.queue_count().await, 2);
        assert_eq!(broker.messages("email.queue").await.len(), 1);
    }

    #[tokio::test]
    async fn redeclaring_with_other_dead_letter_target_fails() {
        let broker = MemoryBroker::new();
        broker.declare_topology(&topology()).await.unwrap();

        let err = broker
            .declare_topology(&QueueTopology::new("email.queue", "other.dlq"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::TopologyMismatch(name) if name == "email.queue"));
    }

    #[tokio::test]
    async fn publish_to_undeclared_queue_fails() {
        let broker = MemoryBroker::new();
        let err = broker.publish("nowhere", b"{}").await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownQueue(_)));
    }

    #[tokio::test]
    async fn reject_without_requeue_routes_to_dead_letter_queue() {
        let broker = MemoryBroker::new();
        broker.declare_topology(&topology()).await.unwrap();
        broker.publish("email.queue", b"first").await.unwrap();
        broker.publish("email.queue", b"second").await.unwrap();

        let handler = FixedHandler {
            disposition: Disposition::Reject { requeue: false },
            seen: AtomicUsize::new(0),
        };
        drain(&broker, &handler).await;

        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
        assert!(broker.messages("email.queue").await.is_empty());
        assert_eq!(
            broker.messages("failed.queue").await,
            vec![b"first".to_vec(), b"second".to_vec()]
        );
        assert_eq!(broker.stats("email.queue").await.rejected, 2);
        assert_eq!(broker.stats("failed.queue").await.dead_lettered, 2);
    }

    #[tokio::test]
    async fn ack_removes_message() {
        let broker = MemoryBroker::new();
        broker.declare_topology(&topology()).await.unwrap();
        broker.publish("email.queue", b"job").await.unwrap();

        let handler = FixedHandler {
            disposition: Disposition::Ack,
            seen: AtomicUsize::new(0),
        };
        drain(&broker, &handler).await;

        assert!(broker.messages("email.queue").await.is_empty());
        assert!(broker.messages("failed.queue").await.is_empty());
        assert_eq!(broker.stats("email.queue").await.acked, 1);
    }

    #[tokio::test]
    async fn consume_wakes_on_publish_and_stops_on_shutdown() {
        let broker = MemoryBroker::new();
        broker.declare_topology(&topology()).await.unwrap();

        let handler = Arc::new(FixedHandler {
            disposition: Disposition::Ack,
            seen: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();

        let task = {
            let broker = broker.clone();
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                broker.consume("email.queue", handler.as_ref(), &shutdown).await
            })
        };

        tokio::task::yield_now().await;
        broker.publish("email.queue", b"late").await.unwrap();

        for _ in 0..100 {
            if broker.stats("email.queue").await.acked == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }
}
