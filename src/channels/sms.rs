//! SMS provider: Twilio REST API over reqwest.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::error::ChannelError;

/// A message held by the SMS provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSms {
    pub sid: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub from: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub to: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
    /// `inbound`, `outbound-api`, `outbound-reply`, ...
    #[serde(default, deserialize_with = "null_as_empty")]
    pub direction: String,
    /// Not set by Twilio. Kept for providers that carry one.
    #[serde(default)]
    pub subject: Option<String>,
}

impl ProviderSms {
    pub fn is_inbound(&self) -> bool {
        self.direction.eq_ignore_ascii_case("inbound")
    }
}

/// Provider operations the relay needs.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Every message addressed to `to`.
    async fn list_messages(&self, to: &str) -> Result<Vec<ProviderSms>, ChannelError>;

    /// Delete a message by SID.
    async fn delete_message(&self, sid: &str) -> Result<(), ChannelError>;

    /// Send `body`. Returns the new message SID.
    async fn send_message(&self, body: &str, from: &str, to: &str) -> Result<String, ChannelError>;

    /// `false` for stand-ins with no provider behind them.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Twilio sends `null` for fields it has no value for.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Message of a Twilio error body (`{"code": ..., "message": ...}`), or the
/// body itself.
fn provider_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// The relay's own number; inbound replies are listed against it.
    pub phone_number: String,
    pub api_base: String,
}

impl TwilioConfig {
    /// Build config from environment variables.
    /// Returns `None` if `TWILIO_ACCOUNT_SID` is not set (SMS disabled).
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
        let phone_number = std::env::var("TWILIO_PHONE_NUMBER").unwrap_or_default();
        let api_base = std::env::var("TWILIO_API_BASE")
            .unwrap_or_else(|_| "https://api.twilio.com".to_string());

        Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            phone_number,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    messages: Vec<ProviderSms>,
    #[serde(default)]
    next_page_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    sid: String,
}

/// Twilio Messages API client.
pub struct TwilioClient {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base, self.config.account_sid
        )
    }

    fn message_url(&self, sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages/{sid}.json",
            self.config.api_base, self.config.account_sid
        )
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(
            &self.config.account_sid,
            Some(self.config.auth_token.expose_secret()),
        )
    }
}

fn fetch_failed(reason: String) -> ChannelError {
    ChannelError::FetchFailed {
        name: "sms".into(),
        reason,
    }
}

#[async_trait]
impl SmsProvider for TwilioClient {
    async fn list_messages(&self, to: &str) -> Result<Vec<ProviderSms>, ChannelError> {
        let mut messages = Vec::new();
        let mut request = self
            .auth(self.client.get(self.messages_url()))
            .query(&[("To", to), ("PageSize", "100")]);

        loop {
            let resp = request
                .send()
                .await
                .map_err(|e| ChannelError::Http(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let err = provider_error(&resp.text().await.unwrap_or_default());
                return Err(fetch_failed(format!("list messages {status}: {err}")));
            }

            let page: MessagePage = resp
                .json()
                .await
                .map_err(|e| fetch_failed(format!("Invalid message page: {e}")))?;
            messages.extend(page.messages);

            match page.next_page_uri.filter(|uri| !uri.is_empty()) {
                Some(next) => {
                    request = self.auth(
                        self.client
                            .get(format!("{}{next}", self.config.api_base)),
                    );
                }
                None => break,
            }
        }

        tracing::debug!(to, count = messages.len(), "Listed provider SMS");
        Ok(messages)
    }

    async fn delete_message(&self, sid: &str) -> Result<(), ChannelError> {
        let resp = self
            .auth(self.client.delete(self.message_url(sid)))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }

        let err = provider_error(&resp.text().await.unwrap_or_default());
        Err(ChannelError::DeleteFailed {
            name: "sms".into(),
            id: sid.to_string(),
            reason: format!("{status}: {err}"),
        })
    }

    async fn send_message(&self, body: &str, from: &str, to: &str) -> Result<String, ChannelError> {
        let resp = self
            .auth(self.client.post(self.messages_url()))
            .form(&[("Body", body), ("From", from), ("To", to)])
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "sms".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = provider_error(&resp.text().await.unwrap_or_default());
            return Err(ChannelError::SendFailed {
                name: "sms".into(),
                reason: format!("{status}: {err}"),
            });
        }

        let created: CreatedMessage = resp.json().await.map_err(|e| ChannelError::SendFailed {
            name: "sms".into(),
            reason: format!("Invalid create response: {e}"),
        })?;

        tracing::info!(sid = %created.sid, "SMS sent");
        Ok(created.sid)
    }
}
