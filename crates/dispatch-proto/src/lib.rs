//! Wire types exchanged between the ingress, the broker and the dispatch
//! worker.
//!
//! Jobs and failure records travel as flat JSON objects. Decoding is strict
//! about the types of known fields but tolerates unknown ones, so older or
//! richer producers can share a queue with this worker.

mod clock;
mod failure;
mod job;
mod request;

use serde::Serialize;
use thiserror::Error;

pub use clock::{failure_timestamp, rfc3339_timestamp};
pub use failure::FailureRecord;
pub use job::{DEFAULT_SUBJECT, EmailJob, JobError, decode_job};
pub use request::{
    BatchEnqueueRequest, BatchEnqueueResponse, EnqueueRequest, EnqueueResponse,
    RequestError, looks_like_address,
};

pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("payload encode error: {0}")]
    Encode(String),
}

/// Serializes any wire type into the JSON bytes published on the queue.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtoError> {
    serde_json::to_vec(value).map_err(|err| ProtoError::Encode(err.to_string()))
}
