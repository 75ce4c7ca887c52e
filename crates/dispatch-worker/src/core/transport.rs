use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MailerConfig;

const IMPLICIT_TLS_PORT: u16 = 465;
const SUBMISSION_PORT: u16 = 587;
const AUTH_FAILURE_CODES: [&str; 3] = ["530", "534", "535"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS).
    Implicit,
    /// Plaintext connect, then `STARTTLS` before authenticating.
    StartTls,
}

impl TlsMode {
    pub fn for_port(port: u16) -> Self {
        if port == IMPLICIT_TLS_PORT { Self::Implicit } else { Self::StartTls }
    }

    /// The other strategy and the port it conventionally listens on.
    pub fn alternate(self) -> (Self, u16) {
        match self {
            Self::Implicit => (Self::StartTls, SUBMISSION_PORT),
            Self::StartTls => (Self::Implicit, IMPLICIT_TLS_PORT),
        }
    }
}

impl std::fmt::Display for TlsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Implicit => f.write_str("implicit-tls"),
            Self::StartTls => f.write_str("starttls"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("refusing to send: text and html bodies are both empty")]
    EmptyBody,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("message build failed: {0}")]
    Build(String),
    #[error("smtp timed out: {0}")]
    Timeout(String),
    #[error("smtp authentication failed: {0}")]
    Authentication(String),
    #[error("smtp connection failed: {0}")]
    Connection(String),
    #[error("smtp protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// One delivery, including at most one attempt on the alternate TLS
    /// strategy. Every network step is bounded by a timeout.
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError>;
}

/// Guard applied before any transmission, whatever the caller.
pub fn ensure_deliverable(email: &OutboundEmail) -> Result<(), TransportError> {
    if email.text.trim().is_empty() && email.html.trim().is_empty() {
        return Err(TransportError::EmptyBody);
    }
    Ok(())
}

pub struct SmtpMailTransport {
    config: Arc<MailerConfig>,
}

impl SmtpMailTransport {
    pub fn new(config: Arc<MailerConfig>) -> Self {
        Self { config }
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, TransportError> {
        let sender = self
            .config
            .sender()
            .ok_or_else(|| TransportError::InvalidAddress("no sender configured".to_string()))?;
        let from: Mailbox = sender
            .parse()
            .map_err(|err| TransportError::InvalidAddress(format!("from {sender}: {err}")))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|err| TransportError::InvalidAddress(format!("to {}: {err}", email.to)))?;

        let builder = Message::builder().from(from).to(to).subject(email.subject.clone());

        let has_text = !email.text.trim().is_empty();
        let has_html = !email.html.trim().is_empty();
        let message = match (has_text, has_html) {
            (true, true) => builder.multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            )),
            (true, false) => builder.singlepart(SinglePart::plain(email.text.clone())),
            (false, _) => builder.singlepart(SinglePart::html(email.html.clone())),
        };

        message.map_err(|err| TransportError::Build(err.to_string()))
    }

    async fn attempt(
        &self,
        mode: TlsMode,
        port: u16,
        message: &Message,
        credentials: Credentials,
    ) -> Result<(), TransportError> {
        let host = self.config.host.as_str();
        let builder = match mode {
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(host),
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host),
        }
        .map_err(|err| TransportError::Connection(err.to_string()))?;

        let transport = builder
            .port(port)
            .timeout(Some(self.config.connect_timeout))
            .credentials(credentials)
            .build();

        let bound = self.config.attempt_timeout();
        match tokio::time::timeout(bound, transport.send(message.clone())).await {
            Err(_) => Err(TransportError::Timeout(format!(
                "{mode} {host}:{port} exceeded {}ms",
                bound.as_millis()
            ))),
            Ok(Err(err)) => Err(classify(&err)),
            Ok(Ok(_)) => Ok(()),
        }
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        ensure_deliverable(email)?;

        let (Some(username), Some(password)) =
            (self.config.username.as_deref(), self.config.password.as_deref())
        else {
            warn!(
                "smtp not configured, skipping send: recipient={}, subject={}",
                email.to, email.subject
            );
            return Ok(());
        };

        let message = self.build_message(email)?;
        let credentials = Credentials::new(username.to_string(), password.to_string());

        let mode = self.config.tls_mode();
        let port = self.config.port;
        info!(
            "smtp send: host={}, port={}, mode={}, username={}",
            self.config.host, port, mode, username
        );

        let err = match self.attempt(mode, port, &message, credentials.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if !should_fallback(&err, self.config.fallback) {
            return Err(err);
        }

        let (alternate, alternate_port) = self.config.fallback_target();
        warn!(
            "smtp attempt failed, trying alternate: mode={}, port={}, error={}, alternate={}, alternate_port={}",
            mode, port, err, alternate, alternate_port
        );
        self.attempt(alternate, alternate_port, &message, credentials).await
    }
}

/// Whether a failed attempt earns the single try on the alternate strategy.
/// Bad credentials fail the same way on either strategy.
fn should_fallback(err: &TransportError, enabled: bool) -> bool {
    enabled && !matches!(err, TransportError::Authentication(_))
}

fn classify(err: &lettre::transport::smtp::Error) -> TransportError {
    let code = err.status().map(|code| code.to_string());
    classify_failure(err.to_string(), err.is_timeout(), code.as_deref())
}

fn classify_failure(detail: String, timed_out: bool, code: Option<&str>) -> TransportError {
    if timed_out {
        return TransportError::Timeout(detail);
    }
    if let Some(code) = code {
        if AUTH_FAILURE_CODES.contains(&code) {
            return TransportError::Authentication(detail);
        }
        return TransportError::Protocol(detail);
    }
    if detail.to_ascii_lowercase().contains("authentication") {
        return TransportError::Authentication(detail);
    }
    TransportError::Connection(detail)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use tokio::task::JoinHandle;

    use super::*;

    /// Accepts connections and never greets, counting each one.
    async fn silent_server() -> (u16, Arc<AtomicUsize>, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });
        (port, accepted, handle)
    }

    fn email(text: &str, html: &str) -> OutboundEmail {
        OutboundEmail {
            to: "ann@example.org".to_string(),
            subject: "Hi".to_string(),
            text: text.to_string(),
            html: html.to_string(),
        }
    }

    fn mailer(port: u16) -> MailerConfig {
        MailerConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: Some("ops@example.org".to_string()),
            password: Some("secret".to_string()),
            connect_timeout: Duration::from_millis(200),
            transmit_timeout: Duration::from_millis(200),
            fallback: false,
            ..MailerConfig::default()
        }
    }

    #[test]
    fn tls_mode_follows_port() {
        assert_eq!(TlsMode::for_port(465), TlsMode::Implicit);
        assert_eq!(TlsMode::for_port(587), TlsMode::StartTls);
        assert_eq!(TlsMode::for_port(2525), TlsMode::StartTls);
        assert_eq!(TlsMode::Implicit.alternate(), (TlsMode::StartTls, 587));
        assert_eq!(TlsMode::StartTls.alternate(), (TlsMode::Implicit, 465));
    }

    #[test]
    fn empty_bodies_are_refused() {
        assert_eq!(ensure_deliverable(&email("", "")), Err(TransportError::EmptyBody));
        assert_eq!(ensure_deliverable(&email(" \n", "\t")), Err(TransportError::EmptyBody));
        assert_eq!(ensure_deliverable(&email("hi", "")), Ok(()));
        assert_eq!(ensure_deliverable(&email("", "<p>hi</p>")), Ok(()));
    }

    #[tokio::test]
    async fn empty_body_is_refused_even_without_credentials() {
        let transport = SmtpMailTransport::new(Arc::new(MailerConfig::default()));
        let err = transport.send(&email("", "")).await.unwrap_err();
        assert_eq!(err, TransportError::EmptyBody);
    }

    #[tokio::test]
    async fn missing_credentials_is_a_logged_no_op() {
        let transport = SmtpMailTransport::new(Arc::new(MailerConfig::default()));
        assert_eq!(transport.send(&email("hello", "")).await, Ok(()));
    }

    #[test]
    fn both_bodies_build_multipart_alternative() {
        let transport = SmtpMailTransport::new(Arc::new(mailer(587)));
        let message = transport.build_message(&email("plain", "<p>rich</p>")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("From: ops@example.org"));
        assert!(raw.contains("To: ann@example.org"));
        assert!(raw.contains("Subject: Hi"));
    }

    #[test]
    fn html_only_builds_single_part() {
        let transport = SmtpMailTransport::new(Arc::new(mailer(587)));
        let message = transport.build_message(&email("", "<p>rich</p>")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(!raw.contains("multipart/alternative"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn invalid_recipient_is_reported_before_connecting() {
        let transport = SmtpMailTransport::new(Arc::new(mailer(587)));
        let mut bad = email("plain", "");
        bad.to = "not an address".to_string();

        assert!(matches!(
            transport.build_message(&bad),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn silent_server_fails_within_the_attempt_bound() {
        let (port, _, server) = silent_server().await;

        let transport = SmtpMailTransport::new(Arc::new(mailer(port)));
        let started = Instant::now();
        let err = transport.send(&email("hello", "")).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(
            matches!(err, TransportError::Timeout(_) | TransportError::Connection(_)),
            "unexpected error: {err}"
        );
        server.abort();
    }

    #[test]
    fn fallback_is_gated_and_skipped_for_bad_credentials() {
        let timeout = TransportError::Timeout("slow".to_string());
        let auth = TransportError::Authentication("535".to_string());
        let refused = TransportError::Connection("refused".to_string());

        assert!(should_fallback(&timeout, true));
        assert!(should_fallback(&refused, true));
        assert!(!should_fallback(&auth, true));
        assert!(!should_fallback(&timeout, false));
    }

    #[test]
    fn smtp_failures_are_classified() {
        let classify = |timed_out, code| classify_failure("detail".to_string(), timed_out, code);

        for code in ["530", "534", "535"] {
            assert!(matches!(classify(false, Some(code)), TransportError::Authentication(_)));
        }
        assert!(matches!(classify(false, Some("550")), TransportError::Protocol(_)));
        assert!(matches!(classify(false, Some("421")), TransportError::Protocol(_)));
        assert!(matches!(classify(true, None), TransportError::Timeout(_)));
        assert!(matches!(classify(false, None), TransportError::Connection(_)));
        assert!(matches!(
            classify_failure("Authentication rejected".to_string(), false, None),
            TransportError::Authentication(_)
        ));
    }

    #[tokio::test]
    async fn failed_attempt_tries_alternate_strategy_once() {
        let (primary_port, primary, primary_server) = silent_server().await;
        let (alternate_port, alternate, alternate_server) = silent_server().await;

        let config = MailerConfig {
            fallback: true,
            fallback_port: Some(alternate_port),
            ..mailer(primary_port)
        };
        assert_eq!(config.fallback_target(), (TlsMode::Implicit, alternate_port));

        let transport = SmtpMailTransport::new(Arc::new(config));
        let started = Instant::now();
        let err = transport.send(&email("hello", "")).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!matches!(err, TransportError::Authentication(_)), "unexpected error: {err}");
        assert_eq!(primary.load(Ordering::SeqCst), 1);
        assert_eq!(alternate.load(Ordering::SeqCst), 1);

        primary_server.abort();
        alternate_server.abort();
    }

    #[tokio::test]
    async fn disabled_fallback_makes_a_single_attempt() {
        let (primary_port, primary, primary_server) = silent_server().await;
        let (alternate_port, alternate, alternate_server) = silent_server().await;

        let config = MailerConfig {
            fallback_port: Some(alternate_port),
            ..mailer(primary_port)
        };
        let transport = SmtpMailTransport::new(Arc::new(config));
        assert!(transport.send(&email("hello", "")).await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(primary.load(Ordering::SeqCst), 1);
        assert_eq!(alternate.load(Ordering::SeqCst), 0);

        primary_server.abort();
        alternate_server.abort();
    }
}
