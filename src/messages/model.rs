//! Message, channel and mailbox records shared by the dispatcher and the
//! reconcilers.
//!
//! Enumerations keep the two-character codes the application database
//! already uses (`'0'`, `'1'`, ...), so rows written by the web app and by
//! the relay stay interchangeable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of a correlation code.
pub const MESSAGE_CODE_LEN: usize = 16;

/// Column limit for `messages.title`.
pub const MAX_TITLE_CHARS: usize = 175;

/// Column limit for `messages.body`.
pub const MAX_BODY_CHARS: usize = 2100;

/// Kind of application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Undefined,
    Other,
    Internal,
    BorrowRequest,
    ReplyInbox,
    ReplyEmail,
    IncomingSms,
    FreeMessage,
    Reminder,
}

impl MessageType {
    /// Storage code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Undefined => "0",
            Self::Other => "1",
            Self::Internal => "2",
            Self::BorrowRequest => "3",
            Self::ReplyInbox => "4",
            Self::ReplyEmail => "5",
            Self::IncomingSms => "6",
            Self::FreeMessage => "7",
            Self::Reminder => "8",
        }
    }

    /// Parse a storage code. Unknown codes map to `Undefined`.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => Self::Other,
            "2" => Self::Internal,
            "3" => Self::BorrowRequest,
            "4" => Self::ReplyInbox,
            "5" => Self::ReplyEmail,
            "6" => Self::IncomingSms,
            "7" => Self::FreeMessage,
            "8" => Self::Reminder,
            _ => Self::Undefined,
        }
    }
}

/// Kind of communication channel a member can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    BuiltIn,
    Email,
    Sms,
    WhatsApp,
}

impl ChannelKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::BuiltIn => "0",
            Self::Email => "1",
            Self::Sms => "2",
            Self::WhatsApp => "3",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => Self::Email,
            "2" => Self::Sms,
            "3" => Self::WhatsApp,
            _ => Self::BuiltIn,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuiltIn => "builtin",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::WhatsApp => "whatsapp",
        }
    }
}

/// One of the per-channel delivery flags on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentFlag {
    Email,
    Sms,
    WhatsApp,
}

impl SentFlag {
    /// Column holding this flag.
    pub fn column(self) -> &'static str {
        match self {
            Self::Email => "sent_email",
            Self::Sms => "sent_sms",
            Self::WhatsApp => "sent_whatsapp",
        }
    }
}

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_member_id: i64,
    pub receiver_member_id: i64,
    pub title: String,
    pub body: String,
    pub message_code: String,
    pub inbox: bool,
    pub outbox: bool,
    pub internal: bool,
    pub sent_email: bool,
    pub sent_sms: bool,
    pub sent_whatsapp: bool,
    pub message_type: MessageType,
    /// Id of the type-specific record this message came from, e.g. the
    /// borrow-request recipient row for `BorrowRequest` messages.
    pub message_type_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Message {
    /// Outbound, not a reply, and at least one channel still open.
    pub fn is_pending_dispatch(&self) -> bool {
        self.outbox && !self.inbox && !(self.sent_email && self.sent_sms && self.sent_whatsapp)
    }

    pub fn is_sent(&self, flag: SentFlag) -> bool {
        match flag {
            SentFlag::Email => self.sent_email,
            SentFlag::Sms => self.sent_sms,
            SentFlag::WhatsApp => self.sent_whatsapp,
        }
    }
}

/// Fields for inserting a message.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_member_id: i64,
    pub receiver_member_id: i64,
    pub title: String,
    pub body: String,
    pub message_code: String,
    pub inbox: bool,
    pub outbox: bool,
    pub internal: bool,
    pub sent_email: bool,
    pub sent_sms: bool,
    pub sent_whatsapp: bool,
    pub message_type: MessageType,
    pub message_type_id: Option<i64>,
    pub created_by: Option<i64>,
}

impl NewMessage {
    /// An outbound message awaiting dispatch on every channel.
    pub fn outbound(
        sender_member_id: i64,
        receiver_member_id: i64,
        title: impl Into<String>,
        body: impl Into<String>,
        message_code: impl Into<String>,
    ) -> Self {
        Self {
            sender_member_id,
            receiver_member_id,
            title: title.into(),
            body: body.into(),
            message_code: message_code.into(),
            inbox: false,
            outbox: true,
            internal: false,
            sent_email: false,
            sent_sms: false,
            sent_whatsapp: false,
            message_type: MessageType::Undefined,
            message_type_id: None,
            created_by: None,
        }
    }

    /// A reconciled reply. No channel needs dispatching.
    pub fn inbound(
        sender_member_id: i64,
        receiver_member_id: i64,
        title: impl Into<String>,
        body: impl Into<String>,
        message_code: impl Into<String>,
    ) -> Self {
        Self {
            sender_member_id,
            receiver_member_id,
            title: truncate_chars(&title.into(), MAX_TITLE_CHARS),
            body: truncate_chars(&body.into(), MAX_BODY_CHARS),
            message_code: message_code.into(),
            inbox: true,
            outbox: false,
            internal: false,
            sent_email: true,
            sent_sms: true,
            sent_whatsapp: true,
            message_type: MessageType::Undefined,
            message_type_id: None,
            created_by: None,
        }
    }

    pub fn with_type(mut self, message_type: MessageType, type_id: Option<i64>) -> Self {
        self.message_type = message_type;
        self.message_type_id = type_id;
        self
    }

    pub fn with_sent(mut self, email: bool, sms: bool, whatsapp: bool) -> Self {
        self.sent_email = email;
        self.sent_sms = sms;
        self.sent_whatsapp = whatsapp;
        self
    }

    pub fn created_by(mut self, user_id: i64) -> Self {
        self.created_by = Some(user_id);
        self
    }
}

/// A member's address on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationChannel {
    pub id: i64,
    pub member_id: i64,
    pub channel: ChannelKind,
    pub identification: String,
    pub is_active: bool,
}

/// Recipient row of a borrowing request, linked once to its outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowRequestRecipient {
    pub id: i64,
    pub member_id: i64,
    pub borrowing_request_id: i64,
    pub message_id: Option<i64>,
}

/// A fetched, not yet reconciled email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRawEmail {
    pub id: i64,
    pub subject: String,
    pub from_header: String,
    /// Full RFC 822 source.
    pub body: String,
    pub outgoing: bool,
    pub processed: DateTime<Utc>,
}

/// Fields for storing a fetched email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInboundEmail {
    pub subject: String,
    pub from_header: String,
    pub body: String,
    pub outgoing: bool,
}

/// Keys of the per-building application settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSettingKey {
    /// Comma-separated reply markers used to trim GMX auto-quotes.
    ReplyMailGmx,
}

impl AppSettingKey {
    pub fn code(self) -> &'static str {
        match self {
            Self::ReplyMailGmx => "1",
        }
    }
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}
