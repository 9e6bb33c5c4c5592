//! Stand-in transport for channels without configuration.
//!
//! Every call fails, so dispatch flags stay unset and the work is retried
//! once the channel is configured.

use async_trait::async_trait;

use crate::channels::email::MailTransport;
use crate::channels::sms::{ProviderSms, SmsProvider};
use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub struct DisabledTransport {
    name: &'static str,
}

impl DisabledTransport {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }

    fn error(&self) -> ChannelError {
        ChannelError::NotConfigured {
            name: self.name.to_string(),
        }
    }
}

#[async_trait]
impl MailTransport for DisabledTransport {
    async fn send(
        &self,
        _subject: &str,
        _body: &str,
        _from: &str,
        _recipients: &[String],
    ) -> Result<(), ChannelError> {
        Err(self.error())
    }
}

#[async_trait]
impl SmsProvider for DisabledTransport {
    async fn list_messages(&self, _to: &str) -> Result<Vec<ProviderSms>, ChannelError> {
        Err(self.error())
    }

    async fn delete_message(&self, _sid: &str) -> Result<(), ChannelError> {
        Err(self.error())
    }

    async fn send_message(
        &self,
        _body: &str,
        _from: &str,
        _to: &str,
    ) -> Result<String, ChannelError> {
        Err(self.error())
    }

    fn is_configured(&self) -> bool {
        false
    }
}
