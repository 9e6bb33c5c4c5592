//! Startup provisioning of schedules and the inbound mailbox.
//!
//! Delete-then-recreate throughout, so running it on every start is safe.

use tracing::{error, info};

use crate::config::{MAILBOX_NAME, RelayConfig};
use crate::error::DatabaseError;
use crate::store::{Database, Schedule};
use crate::worker::scheduler::Job;

/// Schedule rows this process runs.
pub fn default_schedules(dispatch_minutes: u32, fetch_minutes: u32) -> Vec<Schedule> {
    [(Job::DispatchOutbound, dispatch_minutes), (Job::FetchMails, fetch_minutes)]
        .into_iter()
        .map(|(job, minutes)| Schedule {
            name: job.schedule_name().to_string(),
            func: job.func().to_string(),
            interval_minutes: minutes,
            repeats: -1,
            last_run_at: None,
        })
        .collect()
}

/// Recreate both schedules and replace the mailbox rows.
///
/// A missing mailbox URI is logged and leaves no mailbox behind; the mail
/// fetch then has nothing to poll.
pub async fn provision(db: &dyn Database, config: &RelayConfig) -> Result<(), DatabaseError> {
    for schedule in default_schedules(config.dispatch_interval_minutes, config.fetch_interval_minutes)
    {
        db.replace_schedule(&schedule).await?;
        info!(
            schedule = %schedule.name,
            minutes = schedule.interval_minutes,
            "Schedule created"
        );
    }

    match config.mailbox_uri.as_deref() {
        Some(uri) => {
            db.replace_mailboxes(Some((MAILBOX_NAME, uri))).await?;
            info!(mailbox = MAILBOX_NAME, "Mailbox provisioned");
        }
        None => {
            db.replace_mailboxes(None).await?;
            error!("NEIGHBOROW_MAILBOX_URI is not set; no mailbox will be polled");
        }
    }

    info!("Provisioning complete");
    Ok(())
}
