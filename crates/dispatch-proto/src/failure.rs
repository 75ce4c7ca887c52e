use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::failure_timestamp;

/// Envelope published to the dead-letter queue when delivery fails
/// terminally. `original_message` is the job document as received, so an
/// operator can inspect or republish it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub original_message: Value,
    pub error: String,
    pub timestamp: String,
}

impl FailureRecord {
    pub fn new(original_message: Value, error: impl Into<String>) -> Self {
        Self {
            original_message,
            error: error.into(),
            timestamp: failure_timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::encode_json;

    #[test]
    fn serializes_with_queue_field_names() {
        let record = FailureRecord::new(
            json!({"recipient_email": "a@x.com", "template_id": "welcome"}),
            "smtp timed out",
        );
        let bytes = encode_json(&record).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["original_message"]["recipient_email"], json!("a@x.com"));
        assert_eq!(value["error"], json!("smtp timed out"));
        assert_eq!(value["timestamp"].as_str().map(str::len), Some(19));
    }
}
