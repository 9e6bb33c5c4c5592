//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases over a single shared
//! connection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::messages::{
    AppSettingKey, BorrowRequestRecipient, ChannelKind, CommunicationChannel, InboundRawEmail,
    Message, MessageType, NewInboundEmail, NewMessage, SentFlag,
};
use crate::store::migrations;
use crate::store::traits::{Database, Mailbox, Schedule};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a message query and collect every parsable row.
    async fn query_messages(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => tracing::warn!("Skipping message row: {e}"),
            }
        }
        Ok(messages)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Microsecond precision keeps text order
/// chronological.
fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn bool_int(b: bool) -> i64 {
    i64::from(b)
}

/// Convert `Option<i64>` to libsql Value.
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

const MESSAGE_COLUMNS: &str = "id, sender_member_id, receiver_member_id, title, body, message_code, \
     inbox, outbox, internal, sent_email, sent_sms, sent_whatsapp, message_type, message_type_id, \
     created_by, created, modified";

const CHANNEL_COLUMNS: &str = "id, member_id, channel, identification, is_active";

/// Map a libsql Row to a Message. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let type_code: String = row.get(12)?;
    let created: String = row.get(15)?;
    let modified: String = row.get(16)?;

    Ok(Message {
        id: row.get(0)?,
        sender_member_id: row.get(1)?,
        receiver_member_id: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        message_code: row.get(5)?,
        inbox: row.get::<i64>(6)? != 0,
        outbox: row.get::<i64>(7)? != 0,
        internal: row.get::<i64>(8)? != 0,
        sent_email: row.get::<i64>(9)? != 0,
        sent_sms: row.get::<i64>(10)? != 0,
        sent_whatsapp: row.get::<i64>(11)? != 0,
        message_type: MessageType::from_code(&type_code),
        message_type_id: row.get::<i64>(13).ok(),
        created_by: row.get::<i64>(14).ok(),
        created: parse_datetime(&created),
        modified: parse_datetime(&modified),
    })
}

fn row_to_channel(row: &libsql::Row) -> Result<CommunicationChannel, libsql::Error> {
    let kind: String = row.get(2)?;
    Ok(CommunicationChannel {
        id: row.get(0)?,
        member_id: row.get(1)?,
        channel: ChannelKind::from_code(&kind),
        identification: row.get(3)?,
        is_active: row.get::<i64>(4)? != 0,
    })
}

fn row_to_inbound_email(row: &libsql::Row) -> Result<InboundRawEmail, libsql::Error> {
    let processed: String = row.get(5)?;
    Ok(InboundRawEmail {
        id: row.get(0)?,
        subject: row.get(1)?,
        from_header: row.get(2)?,
        body: row.get(3)?,
        outgoing: row.get::<i64>(4)? != 0,
        processed: parse_datetime(&processed),
    })
}

fn row_to_schedule(row: &libsql::Row) -> Result<Schedule, libsql::Error> {
    let interval: i64 = row.get(2)?;
    let last_run: Option<String> = row.get::<String>(4).ok();
    Ok(Schedule {
        name: row.get(0)?,
        func: row.get(1)?,
        interval_minutes: u32::try_from(interval).unwrap_or(1),
        repeats: row.get(3)?,
        last_run_at: last_run.as_deref().map(parse_datetime),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users & members ─────────────────────────────────────────────

    async fn insert_user(&self, username: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute("INSERT INTO users (username) VALUES (?1)", params![username])
            .await
            .map_err(|e| DatabaseError::Constraint(format!("insert_user: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id FROM users WHERE username = ?1", params![username])
            .await
            .map_err(|e| DatabaseError::Query(format!("find_user_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_user_id: {e}"))),
        }
    }

    async fn insert_member(&self, nickname: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute("INSERT INTO members (nickname) VALUES (?1)", params![nickname])
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_member: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let now = now_str();
        conn.execute(
            "INSERT INTO messages (sender_member_id, receiver_member_id, title, body, message_code,
                inbox, outbox, internal, sent_email, sent_sms, sent_whatsapp,
                message_type, message_type_id, created_by, created, modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                message.sender_member_id,
                message.receiver_member_id,
                message.title.as_str(),
                message.body.as_str(),
                message.message_code.as_str(),
                bool_int(message.inbox),
                bool_int(message.outbox),
                bool_int(message.internal),
                bool_int(message.sent_email),
                bool_int(message.sent_sms),
                bool_int(message.sent_whatsapp),
                message.message_type.code(),
                opt_int(message.message_type_id),
                opt_int(message.created_by),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(id, code = %message.message_code, "Message inserted into DB");
        Ok(id)
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError> {
        let mut found = self
            .query_messages(
                "get_message",
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await?;
        Ok(found.pop())
    }

    async fn message_code_exists(&self, code: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM messages WHERE message_code = ?1 LIMIT 1",
                params![code],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("message_code_exists: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("message_code_exists: {e}"))),
        }
    }

    async fn pending_outbound_messages(&self) -> Result<Vec<Message>, DatabaseError> {
        self.query_messages(
            "pending_outbound_messages",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE outbox = 1 AND inbox = 0
                   AND (sent_email = 0 OR sent_sms = 0 OR sent_whatsapp = 0)"
            ),
            (),
        )
        .await
    }

    async fn mark_message_sent(&self, id: i64, flag: SentFlag) -> Result<bool, DatabaseError> {
        let column = flag.column();
        let count = self
            .conn()
            .execute(
                &format!(
                    "UPDATE messages SET {column} = 1, modified = ?1 WHERE id = ?2 AND {column} = 0"
                ),
                params![now_str(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_message_sent: {e}")))?;

        debug!(id, flag = column, updated = count, "Message sent flag updated");
        Ok(count > 0)
    }

    async fn latest_outbound_by_code(
        &self,
        code: &str,
        require_sent_email: bool,
    ) -> Result<Option<Message>, DatabaseError> {
        let sent_filter = if require_sent_email {
            " AND sent_email = 1"
        } else {
            ""
        };
        let mut found = self
            .query_messages(
                "latest_outbound_by_code",
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE message_code = ?1 AND outbox = 1 AND inbox = 0{sent_filter}
                     ORDER BY created DESC, id DESC LIMIT 1"
                ),
                params![code],
            )
            .await?;
        Ok(found.pop())
    }

    async fn messages_by_code(&self, code: &str) -> Result<Vec<Message>, DatabaseError> {
        self.query_messages(
            "messages_by_code",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_code = ?1
                 ORDER BY created ASC, id ASC"
            ),
            params![code],
        )
        .await
    }

    async fn inbox_messages(&self, member_id: i64) -> Result<Vec<Message>, DatabaseError> {
        self.query_messages(
            "inbox_messages",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE receiver_member_id = ?1 AND inbox = 1
                 ORDER BY created DESC, id DESC"
            ),
            params![member_id],
        )
        .await
    }

    // ── Communication channels ─────────────────────────────────────

    async fn insert_channel(
        &self,
        member_id: i64,
        kind: ChannelKind,
        identification: &str,
        is_active: bool,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO communication_channels (member_id, channel, identification, is_active)
             VALUES (?1, ?2, ?3, ?4)",
            params![member_id, kind.code(), identification, bool_int(is_active)],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_channel: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    async fn active_channels(
        &self,
        member_id: i64,
        kind: ChannelKind,
    ) -> Result<Vec<CommunicationChannel>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM communication_channels
                     WHERE member_id = ?1 AND channel = ?2 AND is_active = 1
                     ORDER BY id"
                ),
                params![member_id, kind.code()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("active_channels: {e}")))?;

        let mut channels = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_channel(&row) {
                Ok(ch) => channels.push(ch),
                Err(e) => tracing::warn!("Skipping channel row: {e}"),
            }
        }
        Ok(channels)
    }

    async fn find_active_channel(
        &self,
        kind: ChannelKind,
        identification: &str,
    ) -> Result<Option<CommunicationChannel>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM communication_channels
                     WHERE channel = ?1 AND identification = ?2 AND is_active = 1
                     ORDER BY id LIMIT 1"
                ),
                params![kind.code(), identification],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_active_channel: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_channel(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_active_channel: {e}"))),
        }
    }

    // ── Borrow-request recipients ──────────────────────────────────

    async fn insert_borrow_request_recipient(
        &self,
        member_id: i64,
        borrowing_request_id: i64,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO borrow_request_recipients (member_id, borrowing_request_id)
             VALUES (?1, ?2)",
            params![member_id, borrowing_request_id],
        )
        .await
        .map_err(|e| DatabaseError::Constraint(format!("insert_borrow_request_recipient: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_borrow_request_recipient(
        &self,
        id: i64,
    ) -> Result<Option<BorrowRequestRecipient>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, member_id, borrowing_request_id, message_id
                 FROM borrow_request_recipients WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_borrow_request_recipient: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let parse = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));
                Ok(Some(BorrowRequestRecipient {
                    id: row.get(0).map_err(parse)?,
                    member_id: row.get(1).map_err(parse)?,
                    borrowing_request_id: row.get(2).map_err(parse)?,
                    message_id: row.get::<i64>(3).ok(),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "get_borrow_request_recipient: {e}"
            ))),
        }
    }

    async fn link_borrow_request_message(
        &self,
        member_id: i64,
        recipient_id: i64,
        message_id: i64,
    ) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(
                "UPDATE borrow_request_recipients SET message_id = ?1
                 WHERE id = ?2 AND member_id = ?3 AND message_id IS NULL",
                params![message_id, recipient_id, member_id],
            )
            .await
            .map_err(|e| DatabaseError::Constraint(format!("link_borrow_request_message: {e}")))
    }

    // ── Raw inbound email ──────────────────────────────────────────

    async fn insert_inbound_email(&self, email: &NewInboundEmail) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO inbound_emails (subject, from_header, body, outgoing, processed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                email.subject.as_str(),
                email.from_header.as_str(),
                email.body.as_str(),
                bool_int(email.outgoing),
                now_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_inbound_email: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    async fn list_inbound_emails(&self) -> Result<Vec<InboundRawEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, subject, from_header, body, outgoing, processed
                 FROM inbound_emails WHERE outgoing = 0 ORDER BY id",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_inbound_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_inbound_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => tracing::warn!("Skipping inbound email row: {e}"),
            }
        }
        Ok(emails)
    }

    async fn delete_inbound_email(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM inbound_emails WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_inbound_email: {e}")))?;
        Ok(count > 0)
    }

    // ── Application settings ───────────────────────────────────────

    async fn get_app_setting(&self, key: AppSettingKey) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM app_settings WHERE key = ?1 ORDER BY id LIMIT 1",
                params![key.code()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_app_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_app_setting: {e}"))),
        }
    }

    async fn set_app_setting(
        &self,
        building_id: i64,
        key: AppSettingKey,
        value: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO app_settings (building_id, key, value, modified) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (building_id, key) DO UPDATE SET value = ?3, modified = ?4",
                params![building_id, key.code(), value, now_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_app_setting: {e}")))?;
        Ok(())
    }

    // ── Schedules & mailboxes ──────────────────────────────────────

    async fn replace_schedule(&self, schedule: &Schedule) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM schedules WHERE name = ?1",
            params![schedule.name.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("replace_schedule: {e}")))?;

        conn.execute(
            "INSERT INTO schedules (name, func, interval_minutes, repeats) VALUES (?1, ?2, ?3, ?4)",
            params![
                schedule.name.as_str(),
                schedule.func.as_str(),
                i64::from(schedule.interval_minutes),
                schedule.repeats,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("replace_schedule: {e}")))?;
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT name, func, interval_minutes, repeats, last_run_at
                 FROM schedules ORDER BY name",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_schedules: {e}")))?;

        let mut schedules = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_schedule(&row) {
                Ok(s) => schedules.push(s),
                Err(e) => tracing::warn!("Skipping schedule row: {e}"),
            }
        }
        Ok(schedules)
    }

    async fn record_schedule_run(
        &self,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE schedules SET last_run_at = ?1 WHERE name = ?2",
                params![at.to_rfc3339_opts(SecondsFormat::Micros, true), name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_schedule_run: {e}")))?;
        Ok(())
    }

    async fn replace_mailboxes(
        &self,
        mailbox: Option<(&str, &str)>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute("DELETE FROM mailboxes", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_mailboxes: {e}")))?;

        if let Some((name, uri)) = mailbox {
            conn.execute(
                "INSERT INTO mailboxes (name, uri) VALUES (?1, ?2)",
                params![name, uri],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_mailboxes: {e}")))?;
        }
        Ok(())
    }

    async fn list_mailboxes(&self) -> Result<Vec<Mailbox>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, name, uri FROM mailboxes ORDER BY id", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_mailboxes: {e}")))?;

        let mut mailboxes = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let parsed = (|| -> Result<Mailbox, libsql::Error> {
                Ok(Mailbox {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    uri: row.get(2)?,
                })
            })();
            match parsed {
                Ok(m) => mailboxes.push(m),
                Err(e) => tracing::warn!("Skipping mailbox row: {e}"),
            }
        }
        Ok(mailboxes)
    }
}
