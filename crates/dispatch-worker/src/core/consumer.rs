use std::sync::Arc;

use async_trait::async_trait;
use dispatch_proto::{EmailJob, FailureRecord, decode_job, encode_json};
use dispatch_queue::{Broker, Disposition, MessageHandler};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::render::TemplateRenderer;
use super::transport::{MailTransport, OutboundEmail};

const DROP: Disposition = Disposition::Reject { requeue: false };

/// Handles one work-queue delivery end to end: decode, validate, render,
/// send, then ack or dead-letter.
///
/// Every outcome is terminal for the delivery. Only a transport failure
/// leaves a [`FailureRecord`] behind; decode and validation failures are
/// logged and dropped through the queue's dead-letter route.
pub struct DispatchConsumer {
    renderer: TemplateRenderer,
    transport: Arc<dyn MailTransport>,
    dead_letter_queue: String,
}

impl DispatchConsumer {
    pub fn new(
        renderer: TemplateRenderer,
        transport: Arc<dyn MailTransport>,
        dead_letter_queue: impl Into<String>,
    ) -> Self {
        Self { renderer, transport, dead_letter_queue: dead_letter_queue.into() }
    }

    /// Literal bodies win over templates; if either is present no template
    /// is rendered.
    fn compose(&self, job: &EmailJob, recipient: &str) -> OutboundEmail {
        let (text, html) = if job.has_literal_body() {
            (
                job.body_text.clone().unwrap_or_default(),
                job.body_html.clone().unwrap_or_default(),
            )
        } else {
            let rendered = self.renderer.render(job.template_id.as_deref(), &job.variables);
            (rendered.text, rendered.html)
        };

        OutboundEmail {
            to: recipient.to_string(),
            subject: job.subject_or_default().to_string(),
            text,
            html,
        }
    }

    async fn dead_letter(&self, broker: &dyn Broker, original: Value, error: String, message_id: &str) {
        let record = FailureRecord::new(original, error);
        let payload = match encode_json(&record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    "ERROR_CODE=DISPATCH_DLQ_PUBLISH_FAILED failure record encode failed: message_id={}, error={}",
                    message_id, err
                );
                return;
            }
        };

        match broker.publish(&self.dead_letter_queue, &payload).await {
            Ok(()) => debug!(
                "failure record published: queue={}, message_id={}",
                self.dead_letter_queue, message_id
            ),
            Err(err) => warn!(
                "ERROR_CODE=DISPATCH_DLQ_PUBLISH_FAILED failure record not published: queue={}, message_id={}, error={}",
                self.dead_letter_queue, message_id, err
            ),
        }
    }
}

#[async_trait]
impl MessageHandler for DispatchConsumer {
    async fn handle(&self, payload: &[u8], broker: &dyn Broker) -> Disposition {
        let (original, job) = match decode_job(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(
                    "ERROR_CODE=DISPATCH_{} job rejected: bytes={}, error={}",
                    err.code(),
                    payload.len(),
                    err
                );
                return DROP;
            }
        };

        let message_id = job.message_id.as_deref().unwrap_or("-");

        let recipient = match job.require_recipient() {
            Ok(recipient) => recipient,
            Err(err) => {
                warn!(
                    "ERROR_CODE=DISPATCH_{} job rejected: message_id={}, error={}",
                    err.code(),
                    message_id,
                    err
                );
                return DROP;
            }
        };

        let email = self.compose(&job, recipient);

        match self.transport.send(&email).await {
            Ok(()) => {
                info!(
                    "message delivered: recipient={}, message_id={}, template_id={}",
                    recipient,
                    message_id,
                    job.template_id.as_deref().unwrap_or("-")
                );
                Disposition::Ack
            }
            Err(err) => {
                warn!(
                    "ERROR_CODE=DISPATCH_SEND_FAILED message not delivered: recipient={}, message_id={}, error={}",
                    recipient, message_id, err
                );
                self.dead_letter(broker, original, err.to_string(), message_id).await;
                DROP
            }
        }
    }
}
