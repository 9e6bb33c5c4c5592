//! Configuration types, built from environment variables.

use std::path::PathBuf;

use crate::channels::email::SmtpConfig;
use crate::channels::sms::TwilioConfig;
use crate::error::ConfigError;

/// Name the provisioned mailbox row is stored under.
pub const MAILBOX_NAME: &str = "Neighborow Mailbox";

/// Relay process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Username of the system actor credited with synthesized messages.
    pub admin_username: String,
    pub dispatch_interval_minutes: u32,
    pub fetch_interval_minutes: u32,
    /// Directory for daily-rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
    /// Outbound mail. `None` disables the mail transport.
    pub smtp: Option<SmtpConfig>,
    /// Sender address for outbound mail.
    pub from_address: String,
    /// Address of the inbound mailbox replies arrive at.
    pub inbound_address: String,
    /// IMAP URI of the inbound mailbox, e.g. `imap+ssl://user%40host:pw@imap.host:993`.
    pub mailbox_uri: Option<String>,
    /// SMS provider. `None` disables the SMS transport.
    pub twilio: Option<TwilioConfig>,
}

impl RelayConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("RELAY_DB_PATH")
            .unwrap_or_else(|_| "./data/neighborow.db".to_string())
            .into();

        let admin_username =
            std::env::var("RELAY_ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());

        let dispatch_interval_minutes = minutes_var("RELAY_DISPATCH_INTERVAL_MINUTES")?;
        let fetch_interval_minutes = minutes_var("RELAY_FETCH_INTERVAL_MINUTES")?;

        let log_dir = std::env::var("RELAY_LOG_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let smtp = SmtpConfig::from_env();
        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let inbound_address = std::env::var("EMAIL_HOST_USER").unwrap_or(username);

        let mailbox_uri = std::env::var("NEIGHBOROW_MAILBOX_URI")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            db_path,
            admin_username,
            dispatch_interval_minutes,
            fetch_interval_minutes,
            log_dir,
            smtp,
            from_address,
            inbound_address,
            mailbox_uri,
            twilio: TwilioConfig::from_env(),
        })
    }
}

/// Parse a positive minute count, defaulting to 1 when unset.
fn minutes_var(key: &str) -> Result<u32, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse_minutes(key, &raw),
        Err(_) => Ok(1),
    }
}

fn parse_minutes(key: &str, raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".to_string(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
