//! Message records and correlation codes.

pub mod code;
pub mod model;

pub use code::generate_unique_message_code;
pub use model::{
    AppSettingKey, BorrowRequestRecipient, ChannelKind, CommunicationChannel, InboundRawEmail,
    Message, MessageType, NewInboundEmail, NewMessage, SentFlag,
};
