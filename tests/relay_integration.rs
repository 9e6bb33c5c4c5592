//! End-to-end relay runs against an in-memory store and recording transports.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use neighborow_relay::channels::{DisabledTransport, MailTransport, ProviderSms, SmsProvider};
use neighborow_relay::error::{ChannelError, Error, ReconcileError};
use neighborow_relay::messages::{
    AppSettingKey, ChannelKind, MessageType, NewInboundEmail, NewMessage,
};
use neighborow_relay::relay::{
    self, RelayContext, RelaySettings,
    dispatcher::MAX_SMS_CHARS,
    sms_reconciler::{FALLBACK_SUFFIX, FALLBACK_TITLE},
};
use neighborow_relay::store::{Database, LibSqlBackend};
use neighborow_relay::worker::{Job, Scheduler, run_job};

const RELAY_NUMBER: &str = "+4930111111";
const BOB_NUMBER: &str = "+4915122222";
const CODE: &str = "ABCD1234EFGH5678";

// ── Stub transports ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SentMail {
    subject: String,
    body: String,
    recipients: Vec<String>,
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    fail: Mutex<bool>,
    delay: Option<Duration>,
}

impl RecordingMailer {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(
        &self,
        subject: &str,
        body: &str,
        _from: &str,
        recipients: &[String],
    ) -> Result<(), ChannelError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock().unwrap() {
            return Err(ChannelError::SendFailed {
                name: "email".into(),
                reason: "smtp down".into(),
            });
        }
        self.sent.lock().unwrap().push(SentMail {
            subject: subject.to_string(),
            body: body.to_string(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct StubSms {
    held: Mutex<Vec<ProviderSms>>,
    deleted: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String, String)>>,
    failing_numbers: Mutex<HashSet<String>>,
    fail_deletes: Mutex<bool>,
    fail_listing: Mutex<bool>,
}

impl StubSms {
    fn hold(&self, sid: &str, from: &str, body: &str, direction: &str) {
        self.held.lock().unwrap().push(ProviderSms {
            sid: sid.into(),
            from: from.into(),
            to: RELAY_NUMBER.into(),
            body: body.into(),
            direction: direction.into(),
            subject: None,
        });
    }

    fn fail_for(&self, number: &str) {
        self.failing_numbers.lock().unwrap().insert(number.to_string());
    }

    fn fail_deletes(&self) {
        *self.fail_deletes.lock().unwrap() = true;
    }

    fn fail_listing(&self) {
        *self.fail_listing.lock().unwrap() = true;
    }

    fn held_sids(&self) -> Vec<String> {
        self.held.lock().unwrap().iter().map(|s| s.sid.clone()).collect()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsProvider for StubSms {
    async fn list_messages(&self, to: &str) -> Result<Vec<ProviderSms>, ChannelError> {
        if *self.fail_listing.lock().unwrap() {
            return Err(ChannelError::FetchFailed {
                name: "sms".into(),
                reason: "provider unavailable".into(),
            });
        }
        Ok(self
            .held
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.to == to)
            .cloned()
            .collect())
    }

    async fn delete_message(&self, sid: &str) -> Result<(), ChannelError> {
        if *self.fail_deletes.lock().unwrap() {
            return Err(ChannelError::DeleteFailed {
                name: "sms".into(),
                id: sid.to_string(),
                reason: "provider unavailable".into(),
            });
        }
        self.held.lock().unwrap().retain(|s| s.sid != sid);
        self.deleted.lock().unwrap().push(sid.to_string());
        Ok(())
    }

    async fn send_message(&self, body: &str, from: &str, to: &str) -> Result<String, ChannelError> {
        if self.failing_numbers.lock().unwrap().contains(to) {
            return Err(ChannelError::SendFailed {
                name: "sms".into(),
                reason: "undeliverable".into(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((body.to_string(), from.to_string(), to.to_string()));
        Ok(format!("SM{}", sent.len()))
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    db: Arc<LibSqlBackend>,
    mailer: Arc<RecordingMailer>,
    sms: Arc<StubSms>,
    ctx: Arc<RelayContext>,
    alice: i64,
    bob: i64,
    admin: i64,
}

async fn harness_with(mailer: RecordingMailer, with_admin: bool) -> Harness {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let admin = if with_admin {
        db.insert_user("admin").await.unwrap()
    } else {
        0
    };
    let alice = db.insert_member("alice").await.unwrap();
    let bob = db.insert_member("bob").await.unwrap();

    let mailer = Arc::new(mailer);
    let sms = Arc::new(StubSms::default());
    let dyn_db: Arc<dyn Database> = db.clone();
    let ctx = Arc::new(RelayContext::new(
        dyn_db,
        mailer.clone(),
        sms.clone(),
        RelaySettings {
            admin_username: "admin".into(),
            from_address: "relay@neighborow.test".into(),
            sms_number: RELAY_NUMBER.into(),
            inbound_address: "support@ourdomain.test".into(),
        },
    ));

    Harness {
        db,
        mailer,
        sms,
        ctx,
        alice,
        bob,
        admin,
    }
}

async fn harness() -> Harness {
    harness_with(RecordingMailer::default(), true).await
}

impl Harness {
    /// Outbound message from alice to bob.
    async fn outbound(&self, title: &str, body: &str, code: &str) -> i64 {
        self.db
            .insert_message(&NewMessage::outbound(self.alice, self.bob, title, body, code))
            .await
            .unwrap()
    }

    async fn bob_email(&self) {
        self.db
            .insert_channel(self.bob, ChannelKind::Email, "bob@example.com", true)
            .await
            .unwrap();
    }

    async fn bob_sms(&self) {
        self.db
            .insert_channel(self.bob, ChannelKind::Sms, BOB_NUMBER, true)
            .await
            .unwrap();
    }

    async fn store_email(&self, subject: &str, from: &str, text: &str) -> i64 {
        let raw = format!(
            "From: {from}\r\nTo: support@ourdomain.test\r\nSubject: {subject}\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\r\n{text}\r\n"
        );
        self.db
            .insert_inbound_email(&NewInboundEmail {
                subject: subject.into(),
                from_header: from.into(),
                body: raw,
                outgoing: false,
            })
            .await
            .unwrap()
    }
}

// ── Dispatch ────────────────────────────────────────────────────────

#[tokio::test]
async fn dispatch_sends_once_per_channel() {
    let h = harness().await;
    h.bob_email().await;
    h.bob_sms().await;
    let id = h.outbound("Ladder", "May I borrow your ladder?", CODE).await;

    let first = relay::dispatch_outbound(&h.ctx).await.unwrap();
    assert_eq!(first.pending, 1);
    assert_eq!(first.emails_sent, 1);
    assert_eq!(first.sms_sent, 1);

    let second = relay::dispatch_outbound(&h.ctx).await.unwrap();
    assert_eq!(second.pending, 0);

    let mails = h.mailer.sent();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].subject, format!("Ladder (Code: {CODE})"));
    assert_eq!(mails[0].body, "May I borrow your ladder?");
    assert_eq!(mails[0].recipients, vec!["bob@example.com".to_string()]);

    let sms = h.sms.sent();
    assert_eq!(sms.len(), 1);
    assert_eq!(sms[0].0, format!("Ladder (Code: {CODE}) May I borrow your ladder?"));
    assert_eq!(sms[0].1, RELAY_NUMBER);
    assert_eq!(sms[0].2, BOB_NUMBER);

    let msg = h.db.get_message(id).await.unwrap().unwrap();
    assert!(msg.sent_email && msg.sent_sms && msg.sent_whatsapp);
}

#[tokio::test]
async fn dispatch_without_channels_marks_sent_without_sending() {
    let h = harness().await;
    let id = h.outbound("Ladder", "Hi", CODE).await;

    relay::dispatch_outbound(&h.ctx).await.unwrap();

    assert!(h.mailer.sent().is_empty());
    assert!(h.sms.sent().is_empty());
    let msg = h.db.get_message(id).await.unwrap().unwrap();
    assert!(msg.sent_email && msg.sent_sms && msg.sent_whatsapp);
}

#[tokio::test]
async fn dispatch_ignores_inactive_channels() {
    let h = harness().await;
    h.db.insert_channel(h.bob, ChannelKind::Email, "old@example.com", false)
        .await
        .unwrap();
    h.outbound("Ladder", "Hi", CODE).await;

    relay::dispatch_outbound(&h.ctx).await.unwrap();
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn failed_email_is_retried_next_run() {
    let h = harness().await;
    h.bob_email().await;
    let id = h.outbound("Ladder", "Hi", CODE).await;

    h.mailer.set_failing(true);
    let report = relay::dispatch_outbound(&h.ctx).await.unwrap();
    assert_eq!(report.emails_sent, 0);
    let msg = h.db.get_message(id).await.unwrap().unwrap();
    assert!(!msg.sent_email);
    assert!(msg.sent_sms, "no SMS channel closes the SMS leg");

    h.mailer.set_failing(false);
    relay::dispatch_outbound(&h.ctx).await.unwrap();
    assert_eq!(h.mailer.sent().len(), 1);
    assert!(h.db.get_message(id).await.unwrap().unwrap().sent_email);
}

#[tokio::test]
async fn one_delivered_sms_is_enough() {
    let h = harness().await;
    h.bob_sms().await;
    h.db.insert_channel(h.bob, ChannelKind::Sms, "+4915199999", true)
        .await
        .unwrap();
    h.sms.fail_for("+4915199999");
    let id = h.outbound("Ladder", "Hi", CODE).await;

    relay::dispatch_outbound(&h.ctx).await.unwrap();
    assert_eq!(h.sms.sent().len(), 1);
    assert!(h.db.get_message(id).await.unwrap().unwrap().sent_sms);
}

#[tokio::test]
async fn undelivered_sms_stays_pending() {
    let h = harness().await;
    h.bob_sms().await;
    h.sms.fail_for(BOB_NUMBER);
    let id = h.outbound("Ladder", "Hi", CODE).await;

    relay::dispatch_outbound(&h.ctx).await.unwrap();
    let msg = h.db.get_message(id).await.unwrap().unwrap();
    assert!(!msg.sent_sms);
    assert!(msg.sent_email && msg.sent_whatsapp);
}

#[tokio::test]
async fn long_sms_is_truncated() {
    let h = harness().await;
    h.bob_sms().await;
    h.outbound("Ladder", &"x".repeat(600), CODE).await;

    relay::dispatch_outbound(&h.ctx).await.unwrap();
    let sent = h.sms.sent();
    assert_eq!(sent[0].0.chars().count(), MAX_SMS_CHARS);
}

#[tokio::test]
async fn borrow_request_is_linked_once() {
    let h = harness().await;
    let recipient = h.db.insert_borrow_request_recipient(h.bob, 77).await.unwrap();

    let first = h
        .db
        .insert_message(
            &NewMessage::outbound(h.alice, h.bob, "Borrow", "Drill?", CODE)
                .with_type(MessageType::BorrowRequest, Some(recipient)),
        )
        .await
        .unwrap();
    relay::dispatch_outbound(&h.ctx).await.unwrap();

    h.db.insert_message(
        &NewMessage::outbound(h.alice, h.bob, "Borrow", "Drill?", "ZZZZ1234EFGH5678")
            .with_type(MessageType::BorrowRequest, Some(recipient)),
    )
    .await
    .unwrap();
    relay::dispatch_outbound(&h.ctx).await.unwrap();

    let row = h.db.get_borrow_request_recipient(recipient).await.unwrap().unwrap();
    assert_eq!(row.message_id, Some(first));
}

// ── Inbound email ───────────────────────────────────────────────────

#[tokio::test]
async fn email_reply_becomes_inbox_message() {
    let h = harness().await;
    h.bob_email().await;
    let original = h.outbound("loan", "Can I borrow the ladder?", CODE).await;
    relay::dispatch_outbound(&h.ctx).await.unwrap();

    let email_id = h
        .store_email(
            &format!("Re: loan (Code: {CODE})"),
            "bob@example.com",
            "Sure, here you go.\r\n\r\n> original text",
        )
        .await;

    let report = relay::reconcile_inbound_email(&h.ctx).await.unwrap();
    assert_eq!(report.created, 1);

    let inbox = h.db.inbox_messages(h.alice).await.unwrap();
    assert_eq!(inbox.len(), 1);
    let reply = &inbox[0];
    assert_eq!(reply.message_code, CODE);
    assert_eq!(reply.sender_member_id, h.bob);
    assert_eq!(reply.receiver_member_id, h.alice);
    assert_eq!(reply.title, "Re: loan");
    assert!(reply.body.starts_with("Sure, here you go."));
    assert!(!reply.body.contains("> original text"));
    assert!(reply.inbox && !reply.outbox);
    assert!(reply.sent_email && !reply.sent_sms && reply.sent_whatsapp);
    assert_eq!(reply.created_by, Some(h.admin));
    assert_ne!(reply.id, original);

    assert!(h.db.list_inbound_emails().await.unwrap().is_empty());
    assert!(!h.db.delete_inbound_email(email_id).await.unwrap());

    // The reply is not dispatched again.
    assert_eq!(relay::dispatch_outbound(&h.ctx).await.unwrap().pending, 0);
}

#[tokio::test]
async fn each_reply_gets_its_own_message() {
    let h = harness().await;
    h.bob_email().await;
    h.outbound("loan", "Ladder?", CODE).await;
    relay::dispatch_outbound(&h.ctx).await.unwrap();

    let subject = format!("Re: loan (Code: {CODE})");
    h.store_email(&subject, "bob@example.com", "Yes").await;
    h.store_email(&subject, "bob@example.com", "Also, tomorrow works").await;

    relay::reconcile_inbound_email(&h.ctx).await.unwrap();
    assert_eq!(h.db.inbox_messages(h.alice).await.unwrap().len(), 2);
}

#[tokio::test]
async fn email_without_code_is_discarded() {
    let h = harness().await;
    h.store_email("Hello there", "bob@example.com", "Hi").await;

    let report = relay::reconcile_inbound_email(&h.ctx).await.unwrap();
    assert_eq!(report.discarded, 1);
    assert_eq!(report.created, 0);
    assert!(h.db.list_inbound_emails().await.unwrap().is_empty());
    assert!(h.db.messages_by_code(CODE).await.unwrap().is_empty());
}

#[tokio::test]
async fn email_for_unsent_message_is_orphaned() {
    let h = harness().await;
    h.outbound("loan", "Ladder?", CODE).await;
    h.store_email(&format!("Re: loan (Code: {CODE})"), "bob@example.com", "Yes")
        .await;

    let report = relay::reconcile_inbound_email(&h.ctx).await.unwrap();
    assert_eq!(report.orphaned, 1);
    assert!(h.db.list_inbound_emails().await.unwrap().is_empty());
    assert!(h.db.inbox_messages(h.alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn outgoing_mail_is_not_reconciled() {
    let h = harness().await;
    h.db.insert_inbound_email(&NewInboundEmail {
        subject: format!("loan (Code: {CODE})"),
        from_header: "relay@neighborow.test".into(),
        body: "raw".into(),
        outgoing: true,
    })
    .await
    .unwrap();

    let report = relay::reconcile_inbound_email(&h.ctx).await.unwrap();
    assert_eq!(report, relay::EmailReport::default());
}

#[tokio::test]
async fn long_email_reply_is_truncated() {
    let h = harness().await;
    h.bob_email().await;
    h.outbound("loan", "Ladder?", CODE).await;
    relay::dispatch_outbound(&h.ctx).await.unwrap();

    h.store_email(
        &format!("Re: loan (Code: {CODE})"),
        "bob@example.com",
        &"y".repeat(3000),
    )
    .await;
    relay::reconcile_inbound_email(&h.ctx).await.unwrap();

    let inbox = h.db.inbox_messages(h.alice).await.unwrap();
    assert_eq!(inbox[0].body.chars().count(), 2100);
}

#[tokio::test]
async fn gmx_reply_markers_are_scrubbed() {
    let h = harness().await;
    h.bob_email().await;
    h.db.set_app_setting(1, AppSettingKey::ReplyMailGmx, "Thanks,, Best regards")
        .await
        .unwrap();
    h.outbound("loan", "Ladder?", CODE).await;
    relay::dispatch_outbound(&h.ctx).await.unwrap();

    h.store_email(
        &format!("Re: loan (Code: {CODE})"),
        "Bob <bob@gmx.de>",
        "My reply text\r\nThanks,\r\nOriginal sender wrote ... support@ourdomain.test ...",
    )
    .await;
    relay::reconcile_inbound_email(&h.ctx).await.unwrap();

    let inbox = h.db.inbox_messages(h.alice).await.unwrap();
    assert_eq!(inbox[0].body, "My reply text\n");
}

#[tokio::test]
async fn missing_admin_fails_reconciliation() {
    let h = harness_with(RecordingMailer::default(), false).await;

    let err = relay::reconcile_inbound_email(&h.ctx).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Reconcile(ReconcileError::MissingSystemActor { .. })
    ));

    let err = relay::reconcile_inbound_sms(&h.ctx).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Reconcile(ReconcileError::MissingSystemActor { .. })
    ));
}

// ── Inbound SMS ─────────────────────────────────────────────────────

#[tokio::test]
async fn sms_with_code_creates_reply() {
    let h = harness().await;
    h.outbound("Ladder", "May I borrow your ladder?", CODE).await;
    h.sms.hold("SM1", BOB_NUMBER, &format!("Yes! Code: {CODE}"), "inbound");

    let report = relay::reconcile_inbound_sms(&h.ctx).await.unwrap();
    assert_eq!(report.matched, 1);

    let inbox = h.db.inbox_messages(h.alice).await.unwrap();
    assert_eq!(inbox.len(), 1);
    let reply = &inbox[0];
    assert_eq!(reply.title, "Re: Ladder");
    assert_eq!(reply.body, "May I borrow your ladder?");
    assert_eq!(reply.message_code, CODE);
    assert_eq!(reply.sender_member_id, h.bob);
    assert_eq!(reply.message_type, MessageType::IncomingSms);
    assert!(reply.sent_email && reply.sent_sms && reply.sent_whatsapp);
    assert_eq!(reply.created_by, Some(h.admin));

    assert_eq!(h.sms.deleted(), vec!["SM1".to_string()]);
}

#[tokio::test]
async fn sms_fallback_uses_sender_channel() {
    let h = harness().await;
    h.bob_sms().await;
    h.outbound("Ladder", "Hi", CODE).await;
    h.sms.hold("SM2", BOB_NUMBER, "Sure, come by later", "inbound");

    let report = relay::reconcile_inbound_sms(&h.ctx).await.unwrap();
    assert_eq!(report.fallback, 1);

    let inbox = h.db.inbox_messages(h.bob).await.unwrap();
    assert_eq!(inbox.len(), 1);
    let msg = &inbox[0];
    assert_eq!(msg.sender_member_id, h.bob);
    assert_eq!(msg.receiver_member_id, h.bob);
    assert_eq!(msg.title, FALLBACK_TITLE);
    assert_eq!(msg.body, format!("Sure, come by later{FALLBACK_SUFFIX}"));
    assert_eq!(msg.message_code.len(), 16);
    assert!(msg.message_code.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(msg.message_code, CODE);
    assert_eq!(h.db.messages_by_code(&msg.message_code).await.unwrap().len(), 1);

    assert_eq!(h.sms.deleted(), vec!["SM2".to_string()]);
}

#[tokio::test]
async fn outbound_echo_is_deleted_without_message() {
    let h = harness().await;
    h.outbound("Ladder", "Hi", CODE).await;
    h.sms.hold("SM3", RELAY_NUMBER, &format!("Ladder (Code: {CODE}) Hi"), "outbound-api");

    let report = relay::reconcile_inbound_sms(&h.ctx).await.unwrap();
    assert_eq!(report.echoes_deleted, 1);
    assert_eq!(report.matched, 0);
    assert!(h.db.inbox_messages(h.alice).await.unwrap().is_empty());
    assert!(h.sms.held_sids().is_empty());
}

#[tokio::test]
async fn unmatched_code_is_kept_for_retry() {
    let h = harness().await;
    h.sms.hold("SM4", BOB_NUMBER, "Code: QQQQ1234EFGH5678", "inbound");

    for _ in 0..2 {
        let report = relay::reconcile_inbound_sms(&h.ctx).await.unwrap();
        assert_eq!(report.skipped, 1);
    }
    assert_eq!(h.sms.held_sids(), vec!["SM4".to_string()]);
    assert!(h.sms.deleted().is_empty());
}

#[tokio::test]
async fn unknown_sender_is_kept_for_retry() {
    let h = harness().await;
    h.sms.hold("SM5", "+4917000000", "Who is this?", "inbound");

    let report = relay::reconcile_inbound_sms(&h.ctx).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(h.sms.held_sids(), vec!["SM5".to_string()]);
}

#[tokio::test]
async fn matched_sms_counts_when_delete_fails() {
    let h = harness().await;
    h.outbound("Ladder", "May I borrow your ladder?", CODE).await;
    h.sms.hold("SM7", BOB_NUMBER, &format!("Yes! Code: {CODE}"), "inbound");
    h.sms.fail_deletes();

    let report = relay::reconcile_inbound_sms(&h.ctx).await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.skipped, 0);

    let inbox = h.db.inbox_messages(h.alice).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message_code, CODE);
    assert_eq!(h.sms.held_sids(), vec!["SM7".to_string()]);
}

#[tokio::test]
async fn fallback_sms_counts_when_delete_fails() {
    let h = harness().await;
    h.bob_sms().await;
    h.sms.hold("SM8", BOB_NUMBER, "Sure, come by later", "inbound");
    h.sms.fail_deletes();

    let report = relay::reconcile_inbound_sms(&h.ctx).await.unwrap();
    assert_eq!(report.fallback, 1);

    let inbox = h.db.inbox_messages(h.bob).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].title, FALLBACK_TITLE);
    assert_eq!(h.sms.held_sids(), vec!["SM8".to_string()]);
}

#[tokio::test]
async fn undeletable_echo_is_left_alone() {
    let h = harness().await;
    h.outbound("Ladder", "Hi", CODE).await;
    h.sms.hold("SM9", RELAY_NUMBER, &format!("Ladder (Code: {CODE}) Hi"), "outbound-api");
    h.sms.fail_deletes();

    let report = relay::reconcile_inbound_sms(&h.ctx).await.unwrap();
    assert_eq!(report, relay::SmsReport::default());
    assert!(h.db.inbox_messages(h.alice).await.unwrap().is_empty());
    assert_eq!(h.sms.held_sids(), vec!["SM9".to_string()]);
}

#[tokio::test]
async fn provider_listing_failure_fails_the_run() {
    let h = harness().await;
    h.sms.fail_listing();

    let err = relay::reconcile_inbound_sms(&h.ctx).await.unwrap_err();
    assert!(matches!(err, Error::Channel(ChannelError::FetchFailed { .. })));
}

// ── Scheduler ───────────────────────────────────────────────────────

#[tokio::test]
async fn overlapping_dispatch_runs_are_skipped() {
    let h = harness_with(RecordingMailer::slow(Duration::from_millis(300)), true).await;
    h.bob_email().await;
    h.outbound("Ladder", "Hi", CODE).await;

    let scheduler = Scheduler::new(Arc::clone(&h.ctx));
    let (first, second) = tokio::join!(scheduler.trigger(Job::DispatchOutbound), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.trigger(Job::DispatchOutbound).await
    });

    assert!(first);
    assert!(!second);
    assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn fetch_job_reconciles_stored_mail_and_sms() {
    let h = harness().await;
    h.bob_email().await;
    h.outbound("loan", "Ladder?", CODE).await;
    run_job(&h.ctx, Job::DispatchOutbound).await.unwrap();

    h.store_email(&format!("Re: loan (Code: {CODE})"), "bob@example.com", "Yes")
        .await;
    h.sms.hold("SM6", BOB_NUMBER, &format!("ok Code: {CODE}"), "inbound");

    run_job(&h.ctx, Job::FetchMails).await.unwrap();

    assert_eq!(h.db.inbox_messages(h.alice).await.unwrap().len(), 2);
    assert!(h.db.list_inbound_emails().await.unwrap().is_empty());
    assert!(h.sms.held_sids().is_empty());
}

#[tokio::test]
async fn fetch_job_keeps_going_after_sms_listing_fails() {
    let h = harness().await;
    h.bob_email().await;
    h.outbound("loan", "Ladder?", CODE).await;
    run_job(&h.ctx, Job::DispatchOutbound).await.unwrap();
    h.store_email(&format!("Re: loan (Code: {CODE})"), "bob@example.com", "Yes")
        .await;
    h.sms.fail_listing();

    let err = run_job(&h.ctx, Job::FetchMails).await.unwrap_err();
    assert!(matches!(err, Error::Channel(ChannelError::FetchFailed { .. })));
    assert_eq!(h.db.inbox_messages(h.alice).await.unwrap().len(), 1);
}

#[tokio::test]
async fn fetch_job_skips_sms_without_provider() {
    let h = harness().await;
    let ctx = RelayContext::new(
        Arc::clone(&h.ctx.db),
        h.mailer.clone(),
        Arc::new(DisabledTransport::new("sms")),
        h.ctx.settings.clone(),
    );
    h.store_email("No code here", "bob@example.com", "Hi").await;

    run_job(&ctx, Job::FetchMails).await.unwrap();
    assert!(h.db.list_inbound_emails().await.unwrap().is_empty());
}
