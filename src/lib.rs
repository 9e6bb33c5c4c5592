//! Neighborow relay: multi-channel message delivery and reply reconciliation.

pub mod channels;
pub mod config;
pub mod error;
pub mod messages;
pub mod relay;
pub mod store;
pub mod worker;
