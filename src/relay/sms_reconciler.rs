//! Inbound SMS reconciliation.
//!
//! Provider-held messages addressed to the relay's number are matched by
//! their `Code: XXXXXXXXXXXXXXXX` text, or failing that by the sender's
//! registered SMS channel, and deleted from the provider once a local
//! message exists. Provider deletion is the only record of processing.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, info, warn};

use crate::channels::ProviderSms;
use crate::error::Error;
use crate::messages::{ChannelKind, MessageType, NewMessage, generate_unique_message_code};
use crate::relay::RelayContext;

/// Appended to SMS bodies that could not be matched by code.
pub const FALLBACK_SUFFIX: &str =
    "\nThis message could not be assigned to any sender because the code was missing.";

/// Title prefix of SMS matched by sender number.
pub const FALLBACK_TITLE: &str = "Fallback SMS:";

static SMS_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Code:\s*(\w{16})").unwrap_or_else(|e| panic!("SMS code pattern: {e}"))
});

/// Counts from one reconciliation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SmsReport {
    /// Messages created by code match.
    pub matched: usize,
    /// Messages created by sender-number fallback.
    pub fallback: usize,
    /// Outbound echoes removed from the provider.
    pub echoes_deleted: usize,
    /// SMS left on the provider for the next run.
    pub skipped: usize,
}

enum Outcome {
    Matched,
    Fallback,
    Skipped,
}

/// Correlation code quoted in an SMS body.
pub fn extract_sms_code(body: &str) -> Option<String> {
    SMS_CODE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reconcile every SMS the provider holds for the relay's number.
///
/// Fails when the system actor is missing or the provider cannot be listed;
/// per-SMS errors are logged and the SMS stays on the provider.
pub async fn reconcile_inbound_sms(ctx: &RelayContext) -> Result<SmsReport, Error> {
    let admin_id = ctx.system_actor().await?;
    let number = &ctx.settings.sms_number;
    let messages = ctx.sms.list_messages(number).await?;
    info!(count = messages.len(), number = %number, "SMS found");

    let mut report = SmsReport::default();
    for sms in &messages {
        if !sms.is_inbound() {
            match ctx.sms.delete_message(&sms.sid).await {
                Ok(()) => {
                    report.echoes_deleted += 1;
                    info!(sid = %sms.sid, direction = %sms.direction, "Deleted outbound SMS echo");
                }
                Err(e) => warn!(sid = %sms.sid, "Outbound SMS echo could not be deleted: {e}"),
            }
            continue;
        }

        let outcome = match reconcile_one(ctx, sms, admin_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(sid = %sms.sid, "SMS reconciliation failed: {e}");
                Outcome::Skipped
            }
        };

        match outcome {
            Outcome::Skipped => {
                report.skipped += 1;
                continue;
            }
            Outcome::Matched => report.matched += 1,
            Outcome::Fallback => report.fallback += 1,
        }

        match ctx.sms.delete_message(&sms.sid).await {
            Ok(()) => info!(sid = %sms.sid, "SMS deleted from provider"),
            Err(e) => warn!(sid = %sms.sid, "SMS could not be deleted from provider: {e}"),
        }
    }

    Ok(report)
}

async fn reconcile_one(
    ctx: &RelayContext,
    sms: &ProviderSms,
    admin_id: i64,
) -> Result<Outcome, Error> {
    if let Some(code) = extract_sms_code(&sms.body) {
        let Some(original) = ctx.db.latest_outbound_by_code(&code, false).await? else {
            warn!(sid = %sms.sid, code = %code, "No original message for code, SMS kept for retry");
            return Ok(Outcome::Skipped);
        };

        // The original body is carried over; the SMS text itself is not stored.
        let message = NewMessage::inbound(
            original.receiver_member_id,
            original.sender_member_id,
            format!("Re: {}", original.title),
            original.body.clone(),
            code.clone(),
        )
        .with_type(MessageType::IncomingSms, None)
        .created_by(admin_id);

        let id = ctx.db.insert_message(&message).await?;
        info!(message_id = id, code = %code, sid = %sms.sid, "Reply message created from SMS");
        return Ok(Outcome::Matched);
    }

    let Some(channel) = ctx
        .db
        .find_active_channel(ChannelKind::Sms, &sms.from)
        .await?
    else {
        warn!(sid = %sms.sid, from = %sms.from, "No SMS channel for sender, SMS kept for retry");
        return Ok(Outcome::Skipped);
    };

    let code = generate_unique_message_code(ctx.db.as_ref()).await?;
    let title = format!("{FALLBACK_TITLE}{}", sms.subject.as_deref().unwrap_or_default());
    let message = NewMessage::inbound(
        channel.member_id,
        channel.member_id,
        title,
        format!("{}{FALLBACK_SUFFIX}", sms.body),
        code.clone(),
    )
    .with_type(MessageType::IncomingSms, None)
    .created_by(admin_id);

    let id = ctx.db.insert_message(&message).await?;
    info!(
        message_id = id,
        code = %code,
        member_id = channel.member_id,
        sid = %sms.sid,
        "Fallback message created from SMS"
    );
    Ok(Outcome::Fallback)
}
