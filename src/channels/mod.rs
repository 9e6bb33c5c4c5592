//! Transports the relay talks through: SMTP out, IMAP in, SMS both ways.

pub mod disabled;
pub mod email;
pub mod imap;
pub mod mailbox_poller;
pub mod sms;

pub use disabled::DisabledTransport;
pub use email::{MailTransport, SmtpConfig, SmtpMailer};
pub use sms::{ProviderSms, SmsProvider, TwilioClient, TwilioConfig};
