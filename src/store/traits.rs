//! Unified `Database` trait: single async interface for all persistence
//! the relay touches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::messages::{
    AppSettingKey, BorrowRequestRecipient, ChannelKind, CommunicationChannel, InboundRawEmail,
    Message, NewInboundEmail, NewMessage, SentFlag,
};

/// A persisted periodic task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub name: String,
    /// Job the scheduler runs for this row.
    pub func: String,
    pub interval_minutes: u32,
    /// Remaining runs; negative repeats forever.
    pub repeats: i64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// A mailbox the mail fetcher polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub id: i64,
    pub name: String,
    pub uri: String,
}

/// Backend-agnostic database trait covering messages, channels, the raw
/// mailbox store, settings and schedules.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users & members ─────────────────────────────────────────────

    /// Insert a user. Returns the new id.
    async fn insert_user(&self, username: &str) -> Result<i64, DatabaseError>;

    /// Look up a user id by username.
    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, DatabaseError>;

    /// Insert a member. Returns the new id.
    async fn insert_member(&self, nickname: &str) -> Result<i64, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message. Returns the new id.
    async fn insert_message(&self, message: &NewMessage) -> Result<i64, DatabaseError>;

    /// Get a message by id.
    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError>;

    /// Whether any message already carries `code`.
    async fn message_code_exists(&self, code: &str) -> Result<bool, DatabaseError>;

    /// Outbound, non-inbox messages with at least one unsent channel flag.
    async fn pending_outbound_messages(&self) -> Result<Vec<Message>, DatabaseError>;

    /// Flip a sent flag from false to true.
    ///
    /// Returns `false` when the flag was already set (another run got there
    /// first).
    async fn mark_message_sent(&self, id: i64, flag: SentFlag) -> Result<bool, DatabaseError>;

    /// Most recently created outbound message with `code`.
    ///
    /// With `require_sent_email`, only messages already delivered by email
    /// qualify.
    async fn latest_outbound_by_code(
        &self,
        code: &str,
        require_sent_email: bool,
    ) -> Result<Option<Message>, DatabaseError>;

    /// All messages carrying `code`, oldest first.
    async fn messages_by_code(&self, code: &str) -> Result<Vec<Message>, DatabaseError>;

    /// Messages received by `member_id` with `inbox` set, newest first.
    async fn inbox_messages(&self, member_id: i64) -> Result<Vec<Message>, DatabaseError>;

    // ── Communication channels ─────────────────────────────────────

    /// Register a channel address for a member. Returns the new id.
    async fn insert_channel(
        &self,
        member_id: i64,
        kind: ChannelKind,
        identification: &str,
        is_active: bool,
    ) -> Result<i64, DatabaseError>;

    /// Active channels of one kind for a member.
    async fn active_channels(
        &self,
        member_id: i64,
        kind: ChannelKind,
    ) -> Result<Vec<CommunicationChannel>, DatabaseError>;

    /// First active channel of `kind` with this identification.
    async fn find_active_channel(
        &self,
        kind: ChannelKind,
        identification: &str,
    ) -> Result<Option<CommunicationChannel>, DatabaseError>;

    // ── Borrow-request recipients ──────────────────────────────────

    /// Insert a recipient row for a borrowing request. Returns the new id.
    async fn insert_borrow_request_recipient(
        &self,
        member_id: i64,
        borrowing_request_id: i64,
    ) -> Result<i64, DatabaseError>;

    async fn get_borrow_request_recipient(
        &self,
        id: i64,
    ) -> Result<Option<BorrowRequestRecipient>, DatabaseError>;

    /// Link `message_id` to the recipient row `(member_id, id)` unless it
    /// already has a message. Returns the number of rows updated.
    async fn link_borrow_request_message(
        &self,
        member_id: i64,
        recipient_id: i64,
        message_id: i64,
    ) -> Result<u64, DatabaseError>;

    // ── Raw inbound email ──────────────────────────────────────────

    /// Store a fetched email. Returns the new id.
    async fn insert_inbound_email(&self, email: &NewInboundEmail) -> Result<i64, DatabaseError>;

    /// Stored emails not flagged outgoing, in insertion order.
    async fn list_inbound_emails(&self) -> Result<Vec<InboundRawEmail>, DatabaseError>;

    /// Delete a stored email. Returns whether a row was removed.
    async fn delete_inbound_email(&self, id: i64) -> Result<bool, DatabaseError>;

    // ── Application settings ───────────────────────────────────────

    /// First value stored under `key` across buildings.
    async fn get_app_setting(&self, key: AppSettingKey) -> Result<Option<String>, DatabaseError>;

    /// Insert or replace a building's value for `key`.
    async fn set_app_setting(
        &self,
        building_id: i64,
        key: AppSettingKey,
        value: &str,
    ) -> Result<(), DatabaseError>;

    // ── Schedules & mailboxes ──────────────────────────────────────

    /// Delete any schedule with this name, then insert `schedule`.
    async fn replace_schedule(&self, schedule: &Schedule) -> Result<(), DatabaseError>;

    async fn list_schedules(&self) -> Result<Vec<Schedule>, DatabaseError>;

    async fn record_schedule_run(&self, name: &str, at: DateTime<Utc>)
    -> Result<(), DatabaseError>;

    /// Delete every mailbox, then insert one with `name`/`uri` if given.
    async fn replace_mailboxes(&self, mailbox: Option<(&str, &str)>)
    -> Result<(), DatabaseError>;

    async fn list_mailboxes(&self) -> Result<Vec<Mailbox>, DatabaseError>;
}
