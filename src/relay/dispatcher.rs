//! Outbound dispatch: email, SMS and WhatsApp legs per pending message.

use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::messages::model::truncate_chars;
use crate::messages::{ChannelKind, Message, MessageType, SentFlag};
use crate::relay::RelayContext;

/// Longest SMS text sent, about three provider segments.
pub const MAX_SMS_CHARS: usize = 420;

/// Counts from one dispatch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub pending: usize,
    pub emails_sent: usize,
    pub sms_sent: usize,
    /// Messages whose dispatch hit a store error.
    pub failed: usize,
}

/// Subject line carrying the correlation code.
pub fn email_subject(message: &Message) -> String {
    format!("{} (Code: {})", message.title, message.message_code)
}

/// SMS text carrying the correlation code, capped at [`MAX_SMS_CHARS`].
pub fn sms_text(message: &Message) -> String {
    truncate_chars(
        &format!(
            "{} (Code: {}) {}",
            message.title, message.message_code, message.body
        ),
        MAX_SMS_CHARS,
    )
}

/// Deliver every pending outbound message.
///
/// Transport failures leave the channel flag unset for the next run; one
/// message never blocks another.
pub async fn dispatch_outbound(ctx: &RelayContext) -> Result<DispatchReport, Error> {
    let pending = ctx.db.pending_outbound_messages().await?;
    let mut report = DispatchReport {
        pending: pending.len(),
        ..Default::default()
    };

    for message in &pending {
        debug_assert!(message.is_pending_dispatch());
        if let Err(e) = dispatch_one(ctx, message, &mut report).await {
            error!(message_id = message.id, "Dispatch failed: {e}");
            report.failed += 1;
        }
    }

    if report.pending > 0 {
        info!(
            pending = report.pending,
            emails = report.emails_sent,
            sms = report.sms_sent,
            failed = report.failed,
            "Dispatch run complete"
        );
    }
    Ok(report)
}

async fn dispatch_one(
    ctx: &RelayContext,
    message: &Message,
    report: &mut DispatchReport,
) -> Result<(), Error> {
    if !message.is_sent(SentFlag::Email) && send_email_leg(ctx, message).await? {
        report.emails_sent += 1;
    }

    if !message.is_sent(SentFlag::Sms) && send_sms_leg(ctx, message).await? {
        report.sms_sent += 1;
    }

    // WhatsApp delivery is switched off; the leg is closed without sending.
    if !message.is_sent(SentFlag::WhatsApp) {
        mark(ctx, message, SentFlag::WhatsApp).await?;
    }

    if message.message_type == MessageType::BorrowRequest
        && let Some(recipient_id) = message.message_type_id
    {
        let linked = ctx
            .db
            .link_borrow_request_message(message.receiver_member_id, recipient_id, message.id)
            .await?;
        if linked > 0 {
            debug!(message_id = message.id, recipient_id, "Linked borrow request message");
        }
    }

    Ok(())
}

/// Returns whether an email went out.
async fn send_email_leg(ctx: &RelayContext, message: &Message) -> Result<bool, Error> {
    let channels = ctx
        .db
        .active_channels(message.receiver_member_id, ChannelKind::Email)
        .await?;

    if channels.is_empty() {
        mark(ctx, message, SentFlag::Email).await?;
        return Ok(false);
    }

    let recipients: Vec<String> = channels.into_iter().map(|c| c.identification).collect();
    let subject = email_subject(message);

    match ctx
        .mailer
        .send(&subject, &message.body, &ctx.settings.from_address, &recipients)
        .await
    {
        Ok(()) => {
            mark(ctx, message, SentFlag::Email).await?;
            info!(
                message_id = message.id,
                channel = ChannelKind::Email.as_str(),
                recipients = recipients.len(),
                "Message sent"
            );
            Ok(true)
        }
        Err(e) => {
            warn!(
                message_id = message.id,
                channel = ChannelKind::Email.as_str(),
                "Send failed: {e}"
            );
            Ok(false)
        }
    }
}

/// Returns whether at least one SMS went out.
async fn send_sms_leg(ctx: &RelayContext, message: &Message) -> Result<bool, Error> {
    let channels = ctx
        .db
        .active_channels(message.receiver_member_id, ChannelKind::Sms)
        .await?;

    if channels.is_empty() {
        mark(ctx, message, SentFlag::Sms).await?;
        return Ok(false);
    }

    let text = sms_text(message);
    let mut delivered = 0;
    for channel in &channels {
        match ctx
            .sms
            .send_message(&text, &ctx.settings.sms_number, &channel.identification)
            .await
        {
            Ok(sid) => {
                delivered += 1;
                info!(message_id = message.id, channel = ChannelKind::Sms.as_str(), sid = %sid, "Message sent");
            }
            Err(e) => {
                warn!(
                    message_id = message.id,
                    channel = ChannelKind::Sms.as_str(),
                    to = %channel.identification,
                    "Send failed: {e}"
                );
            }
        }
    }

    if delivered == 0 {
        return Ok(false);
    }
    mark(ctx, message, SentFlag::Sms).await?;
    Ok(true)
}

async fn mark(ctx: &RelayContext, message: &Message, flag: SentFlag) -> Result<(), Error> {
    if !ctx.db.mark_message_sent(message.id, flag).await? {
        debug!(
            message_id = message.id,
            flag = flag.column(),
            "Flag already set by another run"
        );
    }
    Ok(())
}
