use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_SUBJECT: &str = "Notification from Our Service";

/// One queued email send.
///
/// On the wire the recipient may arrive under `recipient_email`, `to`,
/// `to_email` or `recipient`, and literal bodies under `body_text`/`body` and
/// `body_html`/`html`. Decoding folds the aliases into a single field each;
/// encoding always writes the canonical names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireEmailJob")]
pub struct EmailJob {
    #[serde(rename = "recipient_email", skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub variables: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job payload decode failed: {0}")]
    Decode(String),
    #[error("job has no recipient (recipient_email/to/to_email/recipient)")]
    MissingRecipient,
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DECODE_FAILED",
            Self::MissingRecipient => "MISSING_RECIPIENT",
        }
    }
}

impl EmailJob {
    /// Decodes a job from an already-parsed JSON document.
    pub fn from_value(value: &Value) -> Result<Self, JobError> {
        if !value.is_object() {
            return Err(JobError::Decode(
                "job payload must be a JSON object".to_string(),
            ));
        }

        Self::deserialize(value).map_err(|err| JobError::Decode(err.to_string()))
    }

    /// Returns the recipient address or the validation error that keeps the
    /// job away from the transport.
    pub fn require_recipient(&self) -> Result<&str, JobError> {
        self.recipient.as_deref().ok_or(JobError::MissingRecipient)
    }

    pub fn subject_or_default(&self) -> &str {
        self.subject.as_deref().unwrap_or(DEFAULT_SUBJECT)
    }

    pub fn has_literal_body(&self) -> bool {
        self.body_text.is_some() || self.body_html.is_some()
    }
}

/// Parses raw queue bytes into the JSON document and the typed job.
///
/// The document is returned alongside the job so failure records can carry
/// the payload exactly as it was received, unknown fields included.
pub fn decode_job(payload: &[u8]) -> Result<(Value, EmailJob), JobError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|err| JobError::Decode(err.to_string()))?;
    let job = EmailJob::from_value(&value)?;
    Ok((value, job))
}

#[derive(Deserialize)]
struct WireEmailJob {
    recipient_email: Option<String>,
    to: Option<String>,
    to_email: Option<String>,
    recipient: Option<String>,
    subject: Option<String>,
    template_id: Option<String>,
    variables: Option<Map<String, Value>>,
    body_text: Option<String>,
    body: Option<String>,
    body_html: Option<String>,
    html: Option<String>,
    message_id: Option<String>,
    idempotency_key: Option<String>,
}

impl From<WireEmailJob> for EmailJob {
    fn from(wire: WireEmailJob) -> Self {
        Self {
            recipient: first_present([
                wire.recipient_email,
                wire.to,
                wire.to_email,
                wire.recipient,
            ]),
            subject: first_present([wire.subject]),
            template_id: first_present([wire.template_id]),
            variables: wire.variables.unwrap_or_default(),
            body_text: non_empty(wire.body_text).or_else(|| non_empty(wire.body)),
            body_html: non_empty(wire.body_html).or_else(|| non_empty(wire.html)),
            message_id: first_present([wire.message_id]),
            idempotency_key: first_present([wire.idempotency_key]),
        }
    }
}

fn first_present<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().flatten().find_map(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    })
}

// Bodies keep their whitespace; only an empty string counts as absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|body| !body.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_recipient_aliases_in_priority_order() {
        let (_, job) = decode_job(
            br#"{"to":"second@x.com","recipient_email":"first@x.com","template_id":"welcome"}"#,
        )
        .unwrap();
        assert_eq!(job.recipient.as_deref(), Some("first@x.com"));

        let (_, job) = decode_job(br#"{"to_email":"third@x.com"}"#).unwrap();
        assert_eq!(job.recipient.as_deref(), Some("third@x.com"));
    }

    #[test]
    fn blank_alias_falls_through_to_next_one() {
        let (_, job) =
            decode_job(br#"{"recipient_email":"  ","to":"b@x.com"}"#).unwrap();
        assert_eq!(job.require_recipient(), Ok("b@x.com"));
    }

    #[test]
    fn missing_recipient_is_a_validation_error() {
        let (_, job) = decode_job(br#"{"template_id":"welcome"}"#).unwrap();
        assert_eq!(job.require_recipient(), Err(JobError::MissingRecipient));
        assert_eq!(JobError::MissingRecipient.code(), "MISSING_RECIPIENT");
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = decode_job(b"{not json").unwrap_err();
        assert!(matches!(err, JobError::Decode(_)));
        assert_eq!(err.code(), "DECODE_FAILED");
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = decode_job(br#"["a@x.com","welcome"]"#).unwrap_err();
        assert!(matches!(err, JobError::Decode(_)));
    }

    #[test]
    fn mistyped_known_field_is_rejected() {
        let err = decode_job(br#"{"to":42}"#).unwrap_err();
        assert!(matches!(err, JobError::Decode(_)));

        let err = decode_job(br#"{"to":"a@x.com","variables":"name=Ann"}"#)
            .unwrap_err();
        assert!(matches!(err, JobError::Decode(_)));
    }

    #[test]
    fn null_variables_and_unknown_fields_are_tolerated() {
        let (value, job) = decode_job(
            br#"{"to":"a@x.com","variables":null,"channel":"email"}"#,
        )
        .unwrap();
        assert!(job.variables.is_empty());
        assert_eq!(value["channel"], json!("email"));
    }

    #[test]
    fn body_aliases_fold_into_literal_bodies() {
        let (_, job) = decode_job(
            br#"{"to":"a@x.com","body":"plain","html":"<p>rich</p>"}"#,
        )
        .unwrap();
        assert_eq!(job.body_text.as_deref(), Some("plain"));
        assert_eq!(job.body_html.as_deref(), Some("<p>rich</p>"));
        assert!(job.has_literal_body());
    }

    #[test]
    fn subject_defaults_when_absent() {
        let (_, job) = decode_job(br#"{"to":"a@x.com"}"#).unwrap();
        assert_eq!(job.subject_or_default(), DEFAULT_SUBJECT);
    }

    #[test]
    fn encodes_recipient_under_canonical_name() {
        let job = EmailJob {
            recipient: Some("a@x.com".to_string()),
            template_id: Some("welcome".to_string()),
            ..EmailJob::default()
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["recipient_email"], json!("a@x.com"));
        assert!(value.get("body_text").is_none());
        assert_eq!(value["variables"], json!({}));
    }
}
