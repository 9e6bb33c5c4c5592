//! Background work: startup provisioning and the periodic scheduler.
//!
//! Core components:
//! - `provision`: recreates schedule rows and the mailbox entry at startup
//! - `scheduler`: per-schedule tickers with a run lock per job

pub mod provision;
pub mod scheduler;

pub use provision::provision;
pub use scheduler::{Job, Scheduler, run_job};
