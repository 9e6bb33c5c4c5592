//! Mail fetch: pulls unseen mail from every provisioned mailbox into the
//! `inbound_emails` store.
//!
//! Per mailbox:
//! 1. Fetch unseen messages via IMAP (left unseen)
//! 2. Store each raw message as an inbound email row
//! 3. Mark the stored ones `\Seen`
//!
//! The email reconciler picks the rows up from the DB.

use mail_parser::MessageParser;
use tracing::{debug, error, info, warn};

use crate::channels::imap::{self, ImapMailbox};
use crate::error::DatabaseError;
use crate::messages::NewInboundEmail;
use crate::store::Database;

/// Poll every mailbox once. Returns the number of stored emails.
///
/// Unreachable or misconfigured mailboxes are logged and skipped.
pub async fn fetch_mailboxes(db: &dyn Database, own_address: &str) -> Result<usize, DatabaseError> {
    let mailboxes = db.list_mailboxes().await?;
    let mut stored = 0;

    for mailbox in mailboxes {
        let imap_box = match ImapMailbox::from_uri(&mailbox.uri) {
            Ok(m) => m,
            Err(e) => {
                error!(mailbox = %mailbox.name, "Skipping mailbox: {e}");
                continue;
            }
        };

        let cfg = imap_box.clone();
        let fetched = match tokio::task::spawn_blocking(move || imap::fetch_unseen(&cfg)).await {
            Ok(Ok(msgs)) => msgs,
            Ok(Err(e)) => {
                error!(mailbox = %mailbox.name, "Mail fetch failed: {e}");
                continue;
            }
            Err(e) => {
                error!(mailbox = %mailbox.name, "Mail fetch task panicked: {e}");
                continue;
            }
        };

        if fetched.is_empty() {
            continue;
        }
        debug!(mailbox = %mailbox.name, count = fetched.len(), "Fetched unseen emails");

        let mut uids_to_mark = Vec::new();
        for mail in &fetched {
            let email = to_inbound_email(&mail.raw, own_address);
            match db.insert_inbound_email(&email).await {
                Ok(id) => {
                    debug!(id, uid = %mail.uid, subject = %email.subject, "Stored inbound email");
                    uids_to_mark.push(mail.uid.clone());
                    stored += 1;
                }
                Err(e) => {
                    error!(uid = %mail.uid, "Failed to store inbound email: {e}");
                }
            }
        }

        let cfg = imap_box;
        let marked = tokio::task::spawn_blocking(move || imap::mark_seen(&cfg, &uids_to_mark))
            .await
            .unwrap_or_else(|e| Err(e.to_string().into()));
        if let Err(e) = marked {
            warn!(mailbox = %mailbox.name, "Failed to mark emails as seen: {e}");
        }
    }

    if stored > 0 {
        info!(stored, "Mail fetch complete");
    }
    Ok(stored)
}

/// Build an inbound email row from raw RFC 822 bytes.
///
/// Mail sent from the relay's own address is flagged outgoing so the
/// reconciler ignores it.
pub fn to_inbound_email(raw: &[u8], own_address: &str) -> NewInboundEmail {
    let body = String::from_utf8_lossy(raw).to_string();

    let Some(parsed) = MessageParser::default().parse(raw) else {
        return NewInboundEmail {
            subject: String::new(),
            from_header: String::new(),
            body,
            outgoing: false,
        };
    };

    let sender = parsed.from().and_then(|addr| addr.first());
    let address = sender.and_then(|a| a.address()).unwrap_or_default();
    let from_header = match sender.and_then(|a| a.name()) {
        Some(name) if !address.is_empty() => format!("{name} <{address}>"),
        _ => address.to_string(),
    };

    NewInboundEmail {
        subject: parsed.subject().unwrap_or_default().to_string(),
        outgoing: !own_address.is_empty() && address.eq_ignore_ascii_case(own_address),
        from_header,
        body,
    }
}
