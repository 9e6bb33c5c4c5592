//! Persistence layer: libSQL-backed storage for messages, channels, the
//! raw mailbox and schedules.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, Mailbox, Schedule};
