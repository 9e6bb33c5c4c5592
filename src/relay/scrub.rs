//! Provider-specific quote scrubbing.
//!
//! Some mail providers inject their own quote headers that the generic
//! reply parser does not recognize. Each [`ScrubRule`] matches senders by
//! their From header and trims the body at configured reply markers.

use regex::RegexBuilder;
use tracing::{debug, error};

use crate::messages::AppSettingKey;
use crate::store::Database;

/// One provider's scrub rule.
pub trait ScrubRule: Send + Sync {
    /// Rule name for logs.
    fn name(&self) -> &str;

    /// Whether mail from this From header needs the rule.
    fn applies_to(&self, from_header: &str) -> bool;

    /// Setting holding the comma-separated reply markers.
    fn marker_key(&self) -> AppSettingKey;

    /// Trim `body` using the configured markers.
    fn scrub(&self, body: &str, markers: &[String], mailbox_address: &str) -> String {
        trim_at_reply_marker(body, markers, mailbox_address)
    }
}

/// Rule keyed on a substring of the sender's From header.
#[derive(Debug, Clone)]
pub struct QuoteMarkerScrub {
    name: String,
    sender_fragment: String,
    marker_key: AppSettingKey,
}

impl QuoteMarkerScrub {
    pub fn new(name: impl Into<String>, sender_fragment: &str, marker_key: AppSettingKey) -> Self {
        Self {
            name: name.into(),
            sender_fragment: sender_fragment.to_lowercase(),
            marker_key,
        }
    }

    /// GMX: markers stored under the GMX reply-mail setting.
    pub fn gmx() -> Self {
        Self::new("gmx", "gmx", AppSettingKey::ReplyMailGmx)
    }
}

impl ScrubRule for QuoteMarkerScrub {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, from_header: &str) -> bool {
        from_header.to_lowercase().contains(&self.sender_fragment)
    }

    fn marker_key(&self) -> AppSettingKey {
        self.marker_key
    }
}

/// Ordered rules; every applicable rule runs in turn.
pub struct ScrubChain {
    rules: Vec<Box<dyn ScrubRule>>,
}

impl Default for ScrubChain {
    fn default() -> Self {
        Self::empty().with_rule(QuoteMarkerScrub::gmx())
    }
}

impl ScrubChain {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl ScrubRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Run the applicable rules over `body`.
    ///
    /// Empty bodies are returned as is. A rule whose markers cannot be
    /// loaded is skipped.
    pub async fn apply(
        &self,
        db: &dyn Database,
        from_header: &str,
        body: String,
        mailbox_address: &str,
    ) -> String {
        let mut body = body;
        for rule in &self.rules {
            if body.is_empty() || !rule.applies_to(from_header) {
                continue;
            }

            let markers = match db.get_app_setting(rule.marker_key()).await {
                Ok(Some(value)) => parse_markers(&value),
                Ok(None) => continue,
                Err(e) => {
                    error!(rule = rule.name(), "Failed to load reply markers: {e}");
                    continue;
                }
            };

            let scrubbed = rule.scrub(&body, &markers, mailbox_address);
            if scrubbed.len() != body.len() {
                debug!(
                    rule = rule.name(),
                    removed = body.len() - scrubbed.len(),
                    "Scrubbed provider quote"
                );
            }
            body = scrubbed;
        }
        body
    }
}

/// Split a comma-separated marker list.
pub fn parse_markers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

/// Cut `body` at the configured reply markers.
///
/// Markers are tried in order and matched case-insensitively. Each match
/// makes the text before it the candidate body; a marker that is not found
/// resets the candidate to the full body. Scanning stops at the first match
/// whose trailing text, with whitespace removed, contains `mailbox_address`
/// (case-insensitive).
pub fn trim_at_reply_marker(body: &str, markers: &[String], mailbox_address: &str) -> String {
    let address = mailbox_address.trim().to_lowercase();
    let mut candidate = body;

    for marker in markers {
        let found = RegexBuilder::new(&regex::escape(marker))
            .case_insensitive(true)
            .build()
            .ok()
            .and_then(|re| re.find(body));

        let Some(found) = found else {
            candidate = body;
            continue;
        };
        candidate = &body[..found.start()];

        let trailing: String = body[found.end()..]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        if trailing.contains(&address) {
            break;
        }
    }

    candidate.to_string()
}
