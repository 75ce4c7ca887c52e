use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::job::EmailJob;

/// Single send request accepted by the ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnqueueRequest {
    pub recipient_email: String,
    pub template_id: String,
    pub subject: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchEnqueueRequest {
    pub emails: Vec<EnqueueRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Reports whether a job reached the queue. Delivery outcome is never known
/// at this point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub success: bool,
    pub message_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEnqueueResponse {
    pub success: bool,
    pub processed_count: usize,
    pub failed_count: usize,
    pub results: Vec<EnqueueResponse>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("invalid recipient address: {0:?}")]
    InvalidRecipient(String),
    #[error("template_id must not be empty")]
    MissingTemplate,
}

impl EnqueueRequest {
    /// The canned welcome email used to smoke-test a deployment end to end.
    pub fn test_email(recipient_email: impl Into<String>) -> Self {
        let mut variables = Map::new();
        variables.insert("name".to_string(), Value::from("Test User"));
        variables.insert("verification_code".to_string(), Value::from("123456"));

        Self {
            recipient_email: recipient_email.into(),
            template_id: "welcome".to_string(),
            subject: "Test Email from Notification System".to_string(),
            variables,
            idempotency_key: None,
        }
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if !looks_like_address(&self.recipient_email) {
            return Err(RequestError::InvalidRecipient(
                self.recipient_email.clone(),
            ));
        }
        if self.template_id.trim().is_empty() {
            return Err(RequestError::MissingTemplate);
        }
        Ok(())
    }

    pub fn into_job(self, message_id: String) -> EmailJob {
        EmailJob {
            recipient: Some(self.recipient_email.trim().to_string()),
            subject: Some(self.subject),
            template_id: Some(self.template_id.trim().to_string()),
            variables: self.variables,
            body_text: None,
            body_html: None,
            message_id: Some(message_id),
            idempotency_key: self.idempotency_key,
        }
    }
}

/// Cheap shape check for `local@domain`. Full address parsing happens in the
/// transport when the message is built.
pub fn looks_like_address(value: &str) -> bool {
    let value = value.trim();
    if value.chars().any(char::is_whitespace) {
        return false;
    }

    match value.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
