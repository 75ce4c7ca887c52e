use std::sync::Arc;

use dispatch_proto::{
    BatchEnqueueRequest, BatchEnqueueResponse, EnqueueRequest, EnqueueResponse,
    encode_json, rfc3339_timestamp,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::Broker;

const QUEUED: &str = "Email queued successfully";
const NOT_QUEUED: &str = "Failed to queue email";

/// Enqueue side of the pipeline. Reports only whether a job reached the
/// work queue; delivery happens later in the dispatch worker.
#[derive(Clone)]
pub struct Ingress {
    broker: Arc<dyn Broker>,
    work_queue: String,
}

impl Ingress {
    pub fn new(broker: Arc<dyn Broker>, work_queue: impl Into<String>) -> Self {
        Self { broker, work_queue: work_queue.into() }
    }

    pub fn work_queue(&self) -> &str {
        &self.work_queue
    }

    pub async fn enqueue(&self, request: EnqueueRequest) -> EnqueueResponse {
        let message_id = format!("email-{}", Uuid::now_v7());
        self.publish_one(request, message_id).await
    }

    /// Publishes each item independently; one failure does not stop the rest.
    pub async fn enqueue_batch(&self, batch: BatchEnqueueRequest) -> BatchEnqueueResponse {
        let batch_id = Uuid::now_v7();
        let mut results = Vec::with_capacity(batch.emails.len());

        for (index, mut request) in batch.emails.into_iter().enumerate() {
            if request.idempotency_key.is_none() {
                request.idempotency_key = batch.idempotency_key.clone();
            }
            let message_id = format!("batch-{batch_id}-{index:04}");
            results.push(self.publish_one(request, message_id).await);
        }

        let processed_count = results.iter().filter(|r| r.success).count();
        let failed_count = results.len() - processed_count;
        info!(
            "batch enqueued: batch_id={}, processed={}, failed={}",
            batch_id, processed_count, failed_count
        );

        BatchEnqueueResponse {
            success: failed_count == 0,
            processed_count,
            failed_count,
            message: format!("Processed {processed_count} emails, {failed_count} failed"),
            results,
        }
    }

    async fn publish_one(
        &self,
        request: EnqueueRequest,
        message_id: String,
    ) -> EnqueueResponse {
        if let Err(err) = request.validate() {
            warn!("enqueue rejected: message_id={}, error={}", message_id, err);
            return failed(message_id, err.to_string());
        }

        let job = request.into_job(message_id.clone());
        let payload = match encode_json(&job) {
            Ok(payload) => payload,
            Err(err) => return failed(message_id, err.to_string()),
        };

        match self.broker.publish(&self.work_queue, &payload).await {
            Ok(()) => {
                info!("email queued: message_id={}, queue={}", message_id, self.work_queue);
                EnqueueResponse {
                    success: true,
                    message_id,
                    message: QUEUED.to_string(),
                    error: None,
                    timestamp: rfc3339_timestamp(),
                }
            }
            Err(err) => {
                warn!("enqueue failed: message_id={}, error={}", message_id, err);
                failed(message_id, err.to_string())
            }
        }
    }
}

fn failed(message_id: String, error: String) -> EnqueueResponse {
    EnqueueResponse {
        success: false,
        message_id,
        message: NOT_QUEUED.to_string(),
        error: Some(error),
        timestamp: rfc3339_timestamp(),
    }
}
