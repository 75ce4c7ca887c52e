use async_trait::async_trait;
use dispatch_proto::CONTENT_TYPE_JSON;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, retry_connect};
use crate::broker::{Broker, Disposition, MessageHandler};
use crate::error::QueueError;
use crate::topology::{QueueDeclaration, QueueTopology};

const PERSISTENT: u8 = 2;
const PREFETCH: u16 = 1;
const REPLY_SUCCESS: u16 = 200;

/// RabbitMQ-backed [`Broker`]: one connection, one confirm-mode channel.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    consumer_tag: String,
}

impl AmqpBroker {
    /// Single connection attempt.
    pub async fn connect(url: &str, consumer_tag: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|err| QueueError::Connect(err.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|err| QueueError::Connect(err.to_string()))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|err| QueueError::Connect(err.to_string()))?;

        info!("broker connected: url={}", redact_url(url));

        Ok(Self {
            connection,
            channel,
            consumer_tag: consumer_tag.to_string(),
        })
    }

    /// Connects with exponential backoff, for startup next to a broker that
    /// may not be accepting connections yet.
    pub async fn connect_with_backoff(
        url: &str,
        consumer_tag: &str,
        backoff: &Backoff,
        shutdown: &CancellationToken,
    ) -> Result<Self, QueueError> {
        let target = redact_url(url);
        retry_connect(backoff, shutdown, &target, || Self::connect(url, consumer_tag)).await
    }

    /// Closes the channel, then the connection. Errors are logged only.
    pub async fn close(&self) {
        if let Err(err) = self.channel.close(REPLY_SUCCESS, "shutdown").await {
            debug!("channel close failed: error={err}");
        }
        if let Err(err) = self.connection.close(REPLY_SUCCESS, "shutdown").await {
            debug!("connection close failed: error={err}");
        }
    }

    async fn declare(&self, declaration: &QueueDeclaration) -> Result<(), QueueError> {
        let mut arguments = FieldTable::default();
        for (key, value) in declaration.arguments() {
            arguments.insert(
                ShortString::from(key),
                AMQPValue::LongString(LongString::from(value)),
            );
        }

        let options = QueueDeclareOptions {
            durable: declaration.durable,
            ..QueueDeclareOptions::default()
        };

        self.channel
            .queue_declare(&declaration.name, options, arguments)
            .await
            .map_err(|err| QueueError::declare(&declaration.name, err))?;

        debug!(
            "queue declared: queue={}, dead_letter_to={:?}",
            declaration.name, declaration.dead_letter_to
        );
        Ok(())
    }

    async fn settle(
        &self,
        queue: &str,
        delivery: &lapin::message::Delivery,
        disposition: Disposition,
    ) -> Result<(), QueueError> {
        let result = match disposition {
            Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
            Disposition::Reject { requeue } => {
                delivery
                    .nack(BasicNackOptions { requeue, multiple: false })
                    .await
            }
        };
        result.map_err(|err| QueueError::settle(queue, err))
    }
}

#[async_trait]
impl Broker for AmqpBroker {
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
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(ShortString::from(CONTENT_TYPE_JSON));

        let confirm = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
            .await
            .map_err(|err| QueueError::publish(queue, err))?;

        match confirm.await.map_err(|err| QueueError::publish(queue, err))? {
            Confirmation::Nack(_) => Err(QueueError::publish(queue, "broker nacked publish")),
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        }
    }

    async fn consume(
        &self,
        queue: &str,
        handler: &dyn MessageHandler,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueError> {
        self.channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await
            .map_err(|err| QueueError::consume(queue, err))?;

        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| QueueError::consume(queue, err))?;

        info!("consuming: queue={}, consumer_tag={}", queue, self.consumer_tag);

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                next = consumer.next() => Some(next),
            };

            let delivery = match next {
                None => {
                    info!("consumer stopping: queue={queue}");
                    if let Err(err) = self
                        .channel
                        .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
                        .await
                    {
                        warn!("consumer cancel failed: queue={}, error={}", queue, err);
                    }
                    return Ok(());
                }
                Some(None) => {
                    return Err(QueueError::consume(queue, "delivery stream closed"));
                }
                Some(Some(Err(err))) => return Err(QueueError::consume(queue, err)),
                Some(Some(Ok(delivery))) => delivery,
            };

            let disposition = handler.handle(&delivery.data, self).await;
            self.settle(queue, &delivery, disposition).await?;
        }
    }
}

/// Masks the password in a broker URL for logging.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &url[authority_start..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    let Some(at) = authority.rfind('@') else {
        return url.to_string();
    };
    let userinfo = &authority[..at];
    let Some(colon) = userinfo.find(':') else {
        return url.to_string();
    };

    format!(
        "{}{}:***{}",
        &url[..authority_start],
        &userinfo[..colon],
        &rest[at..]
    )
}
