//! Inbound email reconciliation.
//!
//! Each fetched email is matched to its outbound message by the
//! `(Code: XXXXXXXXXXXXXXXX)` annotation in the subject, turned into an
//! inbox message for the original sender, and deleted from the store.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::messages::model::{MAX_BODY_CHARS, truncate_chars};
use crate::messages::{InboundRawEmail, NewMessage};
use crate::relay::RelayContext;
use crate::relay::email_body::extract_plain_text;
use crate::relay::reply_parser::parse_reply;

/// Longest title taken from a reply subject.
pub const MAX_REPLY_TITLE_CHARS: usize = 150;

static SUBJECT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(Code:\s*(\w{16})\)").unwrap_or_else(|e| panic!("subject code pattern: {e}"))
});

/// Counts from one reconciliation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmailReport {
    pub created: usize,
    /// Emails without a code annotation.
    pub discarded: usize,
    /// Emails whose code matched no delivered outbound message.
    pub orphaned: usize,
    /// Emails left in the store after an error.
    pub failed: usize,
}

enum Outcome {
    Created(i64),
    Discarded,
    Orphaned,
}

/// Correlation code annotated in a subject.
pub fn extract_subject_code(subject: &str) -> Option<String> {
    SUBJECT_CODE
        .captures(subject)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Subject without the code annotation, trimmed and capped.
pub fn reply_title(subject: &str) -> String {
    let stripped = SUBJECT_CODE.replace_all(subject, "");
    truncate_chars(stripped.trim(), MAX_REPLY_TITLE_CHARS)
}

/// Reconcile every stored inbound email not flagged outgoing.
///
/// Fails only when the system actor is missing; per-email errors are
/// logged and the email is kept for the next run.
pub async fn reconcile_inbound_email(ctx: &RelayContext) -> Result<EmailReport, Error> {
    let admin_id = ctx.system_actor().await?;
    let emails = ctx.db.list_inbound_emails().await?;
    let mut report = EmailReport::default();

    for email in &emails {
        match reconcile_one(ctx, email, admin_id).await {
            Ok(Outcome::Created(id)) => {
                report.created += 1;
                debug!(email_id = email.id, message_id = id, "Email reconciled");
            }
            Ok(Outcome::Discarded) => report.discarded += 1,
            Ok(Outcome::Orphaned) => report.orphaned += 1,
            Err(e) => {
                error!(email_id = email.id, "Email reconciliation failed: {e}");
                report.failed += 1;
            }
        }
    }

    if !emails.is_empty() {
        info!(
            created = report.created,
            discarded = report.discarded,
            orphaned = report.orphaned,
            failed = report.failed,
            "Email reconciliation complete"
        );
    }
    Ok(report)
}

async fn reconcile_one(
    ctx: &RelayContext,
    email: &InboundRawEmail,
    admin_id: i64,
) -> Result<Outcome, Error> {
    let Some(code) = extract_subject_code(&email.subject) else {
        warn!(email_id = email.id, subject = %email.subject, "No message code in subject, discarding");
        ctx.db.delete_inbound_email(email.id).await?;
        return Ok(Outcome::Discarded);
    };

    let title = reply_title(&email.subject);

    let Some(original) = ctx.db.latest_outbound_by_code(&code, true).await? else {
        warn!(email_id = email.id, code = %code, "No sent message for code, discarding");
        ctx.db.delete_inbound_email(email.id).await?;
        return Ok(Outcome::Orphaned);
    };

    let plain = extract_plain_text(&email.body);
    let reply = truncate_chars(&parse_reply(&plain), MAX_BODY_CHARS);
    let body = ctx
        .scrubs
        .apply(
            ctx.db.as_ref(),
            &email.from_header,
            reply,
            &ctx.settings.inbound_address,
        )
        .await;

    let message = NewMessage::inbound(
        original.receiver_member_id,
        original.sender_member_id,
        title,
        body,
        code.clone(),
    )
    .with_sent(true, false, true)
    .created_by(admin_id);

    let id = ctx.db.insert_message(&message).await?;
    info!(message_id = id, code = %code, reply_to = original.id, "Reply message created from email");

    ctx.db.delete_inbound_email(email.id).await?;
    Ok(Outcome::Created(id))
}
