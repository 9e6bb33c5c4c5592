//! Periodic job runner.
//!
//! One interval ticker per schedule row. Each job has its own run lock: a
//! tick that finds the previous run of the same job still active is skipped,
//! so two dispatch runs never overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channels::mailbox_poller::fetch_mailboxes;
use crate::error::Error;
use crate::relay::{self, RelayContext};
use crate::store::Schedule;

/// Work a schedule row can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Deliver pending outbound messages.
    DispatchOutbound,
    /// Fetch mail, then reconcile inbound email and SMS.
    FetchMails,
}

impl Job {
    pub fn schedule_name(self) -> &'static str {
        match self {
            Self::DispatchOutbound => "mail_sender_task",
            Self::FetchMails => "fetch_mails",
        }
    }

    pub fn func(self) -> &'static str {
        match self {
            Self::DispatchOutbound => "relay::dispatch_outbound",
            Self::FetchMails => "relay::fetch_mails",
        }
    }

    pub fn from_func(func: &str) -> Option<Self> {
        match func {
            "relay::dispatch_outbound" => Some(Self::DispatchOutbound),
            "relay::fetch_mails" => Some(Self::FetchMails),
            _ => None,
        }
    }
}

/// Run `job` once.
pub async fn run_job(ctx: &RelayContext, job: Job) -> Result<(), Error> {
    match job {
        Job::DispatchOutbound => relay::dispatch_outbound(ctx).await.map(|_| ()),
        Job::FetchMails => fetch_mails(ctx).await,
    }
}

/// Mail fetch, email reconciliation, SMS reconciliation, in that order.
///
/// Every step runs even if an earlier one failed; the first failure is
/// returned. SMS reconciliation is skipped without an SMS provider.
async fn fetch_mails(ctx: &RelayContext) -> Result<(), Error> {
    let fetched = fetch_mailboxes(ctx.db.as_ref(), &ctx.settings.inbound_address)
        .await
        .map(|_| ())
        .map_err(Error::from);
    let emails = relay::reconcile_inbound_email(ctx).await.map(|_| ());
    let sms = if ctx.sms.is_configured() {
        relay::reconcile_inbound_sms(ctx).await.map(|_| ())
    } else {
        debug!("SMS provider not configured, skipping SMS reconciliation");
        Ok(())
    };

    let mut first = None;
    for (step, result) in [("mail fetch", fetched), ("email", emails), ("sms", sms)] {
        if let Err(e) = result {
            error!(step, "Fetch step failed: {e}");
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Spawns and owns the schedule tickers.
pub struct Scheduler {
    ctx: Arc<RelayContext>,
    dispatch_lock: Arc<Mutex<()>>,
    fetch_lock: Arc<Mutex<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(ctx: Arc<RelayContext>) -> Self {
        Self {
            ctx,
            dispatch_lock: Arc::new(Mutex::new(())),
            fetch_lock: Arc::new(Mutex::new(())),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set to stop every ticker at its next tick.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn lock_for(&self, job: Job) -> Arc<Mutex<()>> {
        match job {
            Job::DispatchOutbound => Arc::clone(&self.dispatch_lock),
            Job::FetchMails => Arc::clone(&self.fetch_lock),
        }
    }

    /// Run `job` now unless a run of it is already active.
    ///
    /// Returns `false` when skipped.
    pub async fn trigger(&self, job: Job) -> bool {
        run_locked(&self.ctx, &self.lock_for(job), job, job.schedule_name()).await
    }

    /// Load schedule rows and spawn a ticker for each known job.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, Error> {
        let schedules = self.ctx.db.list_schedules().await?;
        let mut handles = Vec::new();

        for schedule in schedules {
            let Some(job) = Job::from_func(&schedule.func) else {
                warn!(schedule = %schedule.name, func = %schedule.func, "Unknown schedule function");
                continue;
            };
            if schedule.repeats == 0 {
                debug!(schedule = %schedule.name, "Schedule has no runs left");
                continue;
            }
            handles.push(self.spawn_ticker(schedule, job));
        }

        info!(tickers = handles.len(), "Scheduler started");
        Ok(handles)
    }

    fn spawn_ticker(&self, schedule: Schedule, job: Job) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let lock = self.lock_for(job);
        let shutdown = Arc::clone(&self.shutdown);
        let period = Duration::from_secs(u64::from(schedule.interval_minutes.max(1)) * 60);

        tokio::spawn(async move {
            info!(
                schedule = %schedule.name,
                minutes = schedule.interval_minutes,
                "Schedule ticker started"
            );

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut remaining = schedule.repeats;

            loop {
                ticker.tick().await;

                if shutdown.load(Ordering::Relaxed) {
                    info!(schedule = %schedule.name, "Schedule ticker shutting down");
                    return;
                }

                let ctx = Arc::clone(&ctx);
                let lock = Arc::clone(&lock);
                let name = schedule.name.clone();
                tokio::spawn(async move {
                    run_locked(&ctx, &lock, job, &name).await;
                });

                if remaining > 0 {
                    remaining -= 1;
                    if remaining == 0 {
                        info!(schedule = %schedule.name, "Schedule exhausted");
                        return;
                    }
                }
            }
        })
    }
}

/// Run under the job's lock and record the run. Returns `false` if skipped.
async fn run_locked(ctx: &RelayContext, lock: &Arc<Mutex<()>>, job: Job, name: &str) -> bool {
    let Ok(_guard) = Arc::clone(lock).try_lock_owned() else {
        warn!(schedule = name, "Previous run still active, skipping tick");
        return false;
    };

    let started = Utc::now();
    if let Err(e) = run_job(ctx, job).await {
        error!(schedule = name, "Scheduled run failed: {e}");
    }

    if let Err(e) = ctx.db.record_schedule_run(name, started).await {
        warn!(schedule = name, "Failed to record schedule run: {e}");
    }
    true
}
