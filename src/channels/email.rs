//! Outbound mail: SMTP via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::ChannelError;

/// Sends plain-text mail to a set of recipients in one call.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        subject: &str,
        body: &str,
        from: &str,
        recipients: &[String],
    ) -> Result<(), ChannelError>;
}

// ── Configuration ───────────────────────────────────────────────────

/// SMTP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_SMTP_HOST` is not set (mail disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("EMAIL_SMTP_HOST").ok()?;

        let port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = std::env::var("EMAIL_PASSWORD").unwrap_or_default();

        Some(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
        })
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// lettre-backed SMTP mailer. Each send opens its own blocking connection
/// on the blocking pool.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "email".into(),
        reason,
    }
}

/// Build a plain-text message addressed to every recipient.
pub fn build_message(
    subject: &str,
    body: &str,
    from: &str,
    recipients: &[String],
) -> Result<Message, ChannelError> {
    if recipients.is_empty() {
        return Err(send_failed("No recipients".into()));
    }

    let from: Mailbox = from
        .parse()
        .map_err(|e| send_failed(format!("Invalid from address: {e}")))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN);

    for to in recipients {
        let to: Mailbox = to
            .parse()
            .map_err(|e| send_failed(format!("Invalid to address {to}: {e}")))?;
        builder = builder.to(to);
    }

    builder
        .body(body.to_string())
        .map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(
        &self,
        subject: &str,
        body: &str,
        from: &str,
        recipients: &[String],
    ) -> Result<(), ChannelError> {
        let email = build_message(subject, body, from, recipients)?;
        let config = self.config.clone();
        let count = recipients.len();

        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );

            let transport = SmtpTransport::relay(&config.host)
                .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
                .port(config.port)
                .credentials(creds)
                .build();

            transport
                .send(&email)
                .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
            Ok::<(), ChannelError>(())
        })
        .await
        .map_err(|e| send_failed(format!("SMTP task panicked: {e}")))??;

        tracing::info!(recipients = count, "Email sent");
        Ok(())
    }
}
